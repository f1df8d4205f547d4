//! Factory resolution: from scheme uuid to a loaded vendor factory.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::library::SharedLibrary;
use crate::plugin::{CreateDrmFactoryFn, DrmPluginFactory, CREATE_DRM_FACTORY};
use crate::registry::PluginRegistry;

/// Directory scanned for vendor plugin images when a scheme has no cached
/// resolution yet.
pub const DEFAULT_PLUGIN_DIR: &str = "/vendor/lib/mediadrm";

/// Resolves a scheme uuid to a `(library, factory)` pair.
///
/// Resolution consults the registry's scheme cache first and otherwise
/// scans the plugin directory, remembering the first image whose factory
/// accepts the uuid. The scan never falls back past the first match: if
/// that plugin later misbehaves, no alternative is tried.
#[derive(Debug)]
pub struct FactoryLoader {
    registry: Arc<PluginRegistry>,
    plugin_dir: PathBuf,
}

impl FactoryLoader {
    /// Loader over the process-wide registry and [`DEFAULT_PLUGIN_DIR`].
    pub fn new() -> Self {
        Self::with_plugin_dir(DEFAULT_PLUGIN_DIR)
    }

    /// Loader over the process-wide registry and a custom directory.
    pub fn with_plugin_dir(plugin_dir: impl Into<PathBuf>) -> Self {
        Self::with_registry(PluginRegistry::global(), plugin_dir)
    }

    /// Loader over a private registry, for hosts that must not share
    /// caches with the rest of the process.
    pub fn with_registry(registry: Arc<PluginRegistry>, plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            plugin_dir: plugin_dir.into(),
        }
    }

    /// Directory this loader scans.
    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// Resolve `uuid` to a loaded image and a factory that accepts it.
    ///
    /// Every failure surfaces as [`Error::Unsupported`]; underlying load
    /// diagnostics are logged, not returned. A cached path is trusted: if
    /// it no longer loads or its factory no longer accepts the uuid, the
    /// scheme is unsupported and no rescan happens.
    pub fn find_factory(&self, uuid: &Uuid) -> Result<(Arc<SharedLibrary>, Box<dyn DrmPluginFactory>)> {
        if let Some(path) = self.registry.find_path(uuid) {
            return self.load_factory(&path, uuid).map_err(|err| {
                warn!(%uuid, path = %path.display(), %err, "cached plugin path failed");
                Error::Unsupported(*uuid)
            });
        }

        let entries = fs::read_dir(&self.plugin_dir).map_err(|err| {
            warn!(dir = %self.plugin_dir.display(), %err, "failed to open plugin directory");
            Error::Unsupported(*uuid)
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(env::consts::DLL_EXTENSION) {
                continue;
            }
            match self.load_factory(&path, uuid) {
                Ok(found) => {
                    info!(%uuid, path = %path.display(), "resolved scheme to plugin");
                    self.registry.remember_path(uuid, &path);
                    return Ok(found);
                }
                Err(err) => debug!(path = %path.display(), %err, "candidate rejected"),
            }
        }

        warn!(%uuid, "no plugin supports scheme");
        Err(Error::Unsupported(*uuid))
    }

    /// Acquire the image at `path` and instantiate a factory from it,
    /// verifying it accepts `uuid`. A rejected factory is dropped but the
    /// image stays cached; another scheme may match it later.
    fn load_factory(
        &self,
        path: &Path,
        uuid: &Uuid,
    ) -> Result<(Arc<SharedLibrary>, Box<dyn DrmPluginFactory>)> {
        let library = self.registry.acquire_image(path, SharedLibrary::open)?;

        let create: CreateDrmFactoryFn = match unsafe { library.get(CREATE_DRM_FACTORY) } {
            Some(symbol) => *symbol,
            None => return Err(Error::Load(library.last_error())),
        };

        let raw = unsafe { create() };
        if raw.is_null() {
            return Err(Error::Load(format!(
                "createDrmFactory returned null in {}",
                path.display()
            )));
        }
        let factory = *unsafe { Box::from_raw(raw) };

        if !factory.supports_scheme(uuid) {
            return Err(Error::Unsupported(*uuid));
        }
        Ok((library, factory))
    }
}

impl Default for FactoryLoader {
    fn default() -> Self {
        Self::new()
    }
}
