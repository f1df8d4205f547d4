//! Shared-object wrapper around one mapped plugin image.

use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// One dynamically loaded plugin image.
///
/// Opened with resolve-all-symbols-now semantics so a plugin with missing
/// relocations fails at load, not mid-call. The image is unmapped exactly
/// once, when the last owner drops its reference; the registry keeps only
/// weak handles and never extends the image's life.
#[derive(Debug)]
pub struct SharedLibrary {
    path: PathBuf,
    library: Library,
    last_error: Mutex<Option<String>>,
}

impl SharedLibrary {
    /// Map the shared object at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let library = open_resolved(path).map_err(|err| {
            Error::Load(format!("failed to open {}: {}", path.display(), err))
        })?;
        debug!(path = %path.display(), "mapped plugin image");
        Ok(Self {
            path: path.to_path_buf(),
            library,
            last_error: Mutex::new(None),
        })
    }

    /// Path the image was mapped from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a named symbol, or `None` if the image does not export it.
    /// A missing symbol is not an error; the loader's diagnostic is kept
    /// for [`last_error`](Self::last_error).
    ///
    /// # Safety
    ///
    /// `T` must match the actual type of the exported symbol.
    pub unsafe fn get<T>(&self, symbol: &[u8]) -> Option<Symbol<'_, T>> {
        match self.library.get(symbol) {
            Ok(sym) => Some(sym),
            Err(err) => {
                *self.last_error.lock() = Some(err.to_string());
                None
            }
        }
    }

    /// Diagnostic text from the most recent failed resolve.
    pub fn last_error(&self) -> String {
        self.last_error
            .lock()
            .clone()
            .unwrap_or_else(|| "no error recorded".to_string())
    }

    /// Handle to the host process's own image, for exercising symbol
    /// resolution without a plugin artifact on disk.
    #[cfg(all(test, unix))]
    pub(crate) fn for_this_process() -> Self {
        Self {
            path: PathBuf::from("<self>"),
            library: libloading::os::unix::Library::this().into(),
            last_error: Mutex::new(None),
        }
    }
}

#[cfg(unix)]
fn open_resolved(path: &Path) -> std::result::Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_LOCAL, RTLD_NOW};
    unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_LOCAL).map(Into::into) }
}

#[cfg(not(unix))]
fn open_resolved(path: &Path) -> std::result::Result<Library, libloading::Error> {
    unsafe { Library::new(path) }
}
