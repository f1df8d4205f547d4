//! Process-wide plugin caches.
//!
//! Two memos live here, both behind one registry mutex: a positive-only
//! map from scheme uuid to the library path that served it, and a map from
//! library path to a weak handle on the live image. The first avoids
//! directory scans for repeated openings of the same scheme; the second
//! deduplicates images across instances without pinning them after the
//! last owner is gone.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Weak};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::library::SharedLibrary;

static GLOBAL: LazyLock<Arc<PluginRegistry>> = LazyLock::new(|| Arc::new(PluginRegistry::new()));

/// Shared caches for plugin resolution and image deduplication.
///
/// Scheme entries are never invalidated: vendor plugins are installed, not
/// swapped, during a process lifetime. Replacing a plugin file under a
/// cached path mid-process is undefined behavior as far as the host is
/// concerned.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    inner: Mutex<Maps>,
}

#[derive(Debug, Default)]
struct Maps {
    scheme_paths: HashMap<Uuid, PathBuf>,
    live_images: HashMap<PathBuf, Weak<SharedLibrary>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry shared by default-constructed loaders.
    pub fn global() -> Arc<Self> {
        GLOBAL.clone()
    }

    /// Library path previously recorded for `uuid`, if any.
    pub fn find_path(&self, uuid: &Uuid) -> Option<PathBuf> {
        self.inner.lock().scheme_paths.get(uuid).cloned()
    }

    /// Record that the image at `path` serves `uuid`. Idempotent; the
    /// first recorded path wins and later calls are no-ops.
    pub fn remember_path(&self, uuid: &Uuid, path: &Path) {
        self.inner
            .lock()
            .scheme_paths
            .entry(*uuid)
            .or_insert_with(|| path.to_path_buf());
    }

    /// Return the live image for `path`, loading it with `load` if the
    /// cached handle is absent or expired.
    ///
    /// The load runs under the registry mutex, so concurrent acquirers of
    /// one path share a single image. An expired weak handle is treated as
    /// "no cached image" and overwritten.
    pub fn acquire_image<F>(&self, path: &Path, load: F) -> Result<Arc<SharedLibrary>>
    where
        F: FnOnce(&Path) -> Result<SharedLibrary>,
    {
        let mut maps = self.inner.lock();
        if let Some(live) = maps.live_images.get(path).and_then(Weak::upgrade) {
            return Ok(live);
        }
        let library = Arc::new(load(path)?);
        maps.live_images
            .insert(path.to_path_buf(), Arc::downgrade(&library));
        Ok(library)
    }
}
