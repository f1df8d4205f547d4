//! Error types for rsmediadrm.

use thiserror::Error;
use uuid::Uuid;

/// Main error type for host and plugin operations.
///
/// Plugins return this same type, so vendor-defined failures flow back to
/// the caller unchanged. The host itself only produces the variants
/// documented on each operation.
#[derive(Debug, Error)]
pub enum Error {
    /// No scheme has been opened on this instance yet.
    #[error("Instance is uninitialized; no scheme has been opened")]
    Uninitialized,

    /// No loaded plugin supports the requested scheme (or content type).
    #[error("No plugin supports scheme {0}")]
    Unsupported(Uuid),

    /// A plugin already exists; destroy it before creating another.
    #[error("A plugin has already been created for this instance")]
    AlreadyCreated,

    /// The operation requires a plugin and none has been created.
    #[error("No plugin has been created for this instance")]
    NotCreated,

    /// The plugin is out of session resources.
    #[error("Plugin has no session resources available")]
    ResourceBusy,

    /// The caller lacks a required capability.
    #[error("Request requires {capability}")]
    PermissionDenied { capability: String },

    /// A shared object failed to open or resolve.
    ///
    /// Carries the platform loader's diagnostic. Never escapes to callers
    /// of `DrmInstance`; the loader logs it and reports `Unsupported`.
    #[error("Plugin library error: {0}")]
    Load(String),

    /// No session is open with the specified identifier.
    #[error("Session identifier {0:?} is invalid")]
    InvalidSession(Vec<u8>),

    /// No stored keys match the specified key-set identifier.
    #[error("Key set identifier {0:?} is invalid")]
    InvalidKeySet(Vec<u8>),

    /// Vendor-defined plugin error.
    #[error("{0}")]
    Other(String),
}

impl From<libloading::Error> for Error {
    fn from(err: libloading::Error) -> Self {
        Error::Load(err.to_string())
    }
}

/// Result type alias for host and plugin operations.
pub type Result<T> = std::result::Result<T, Error>;
