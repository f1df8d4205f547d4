//! Vendor plugin ABI: factory and plugin traits plus the exported symbol.
//!
//! A plugin image is a cdylib built against this crate. It exports one
//! C-callable symbol, [`CREATE_DRM_FACTORY`], returning a heap-allocated
//! factory the host takes ownership of:
//!
//! ```ignore
//! #[no_mangle]
//! pub extern "C" fn createDrmFactory() -> *mut Box<dyn DrmPluginFactory> {
//!     Box::into_raw(Box::new(Box::new(VendorFactory::new()) as Box<dyn DrmPluginFactory>))
//! }
//! ```
//!
//! The double box keeps the pointer thin across the `extern "C"` boundary.
//! A null return marks the image as not a usable plugin.

use std::collections::HashMap;
use std::sync::Weak;

use uuid::Uuid;

use crate::error::Result;
use crate::events::KeyStatus;

/// Name of the factory entry point every plugin image must export.
pub const CREATE_DRM_FACTORY: &[u8] = b"createDrmFactory\0";

/// Type of the exported factory entry point.
pub type CreateDrmFactoryFn = unsafe extern "C" fn() -> *mut Box<dyn DrmPluginFactory>;

/// Standard property names every plugin is expected to serve.
pub mod property {
    /// Plugin vendor name.
    pub const VENDOR: &str = "vendor";
    /// Plugin version string.
    pub const VERSION: &str = "version";
    /// Human-readable plugin description.
    pub const DESCRIPTION: &str = "description";
    /// Comma-separated list of supported cipher/MAC algorithms.
    pub const ALGORITHMS: &str = "algorithms";
    /// Stable per-device identifier (byte-array property).
    pub const DEVICE_UNIQUE_ID: &str = "deviceUniqueId";
}

/// Kind of key being requested from a license server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Keys for online playback; not persisted.
    Streaming,
    /// Keys persisted by the plugin for offline use.
    Offline,
    /// Release previously persisted keys.
    Release,
}

/// Classification of a generated key request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRequestType {
    /// First request for this session.
    Initial,
    /// Renewal of keys the session already holds.
    Renewal,
    /// Request releasing persisted keys.
    Release,
}

/// A license request produced by the plugin.
#[derive(Debug, Clone)]
pub struct KeyRequest {
    /// Opaque request bytes for the license server.
    pub request: Vec<u8>,
    /// Server URL registered in the content, may be empty.
    pub default_url: String,
    /// What kind of request this is.
    pub request_type: KeyRequestType,
}

/// A provisioning request produced by the plugin.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    /// Opaque request bytes for the provisioning server.
    pub request: Vec<u8>,
    /// Provisioning server URL, may be empty.
    pub default_url: String,
}

/// Result of applying a provisioning response.
#[derive(Debug, Clone)]
pub struct ProvisionResponse {
    /// Device certificate issued by the provisioning server.
    pub certificate: Vec<u8>,
    /// Private key wrapped for later `sign_rsa` use.
    pub wrapped_key: Vec<u8>,
}

/// Vendor factory creating plugins for the schemes it supports.
pub trait DrmPluginFactory: Send + std::fmt::Debug {
    /// Returns true if this factory can build a plugin for `uuid`.
    fn supports_scheme(&self, uuid: &Uuid) -> bool;

    /// Returns true if content of the given MIME type can be handled.
    fn supports_content_type(&self, mime_type: &str) -> bool;

    /// Create a plugin instance for `uuid`.
    fn create_plugin(&mut self, uuid: &Uuid) -> Result<Box<dyn DrmPlugin>>;
}

/// Sink for plugin-originated callbacks.
///
/// Plugins hold this weakly and upgrade before each call, so a torn-down
/// host never receives events from a still-draining plugin thread.
pub trait PluginListener: Send + Sync {
    /// Generic event; `extra` is event-specific.
    fn send_event(
        &self,
        event: crate::events::EventType,
        extra: i32,
        session_id: Option<&[u8]>,
        data: Option<&[u8]>,
    );

    /// License expiration moved to `expiry_time_ms` (unix millis).
    fn send_expiration_update(&self, session_id: &[u8], expiry_time_ms: i64);

    /// Status changed for the listed keys. `has_new_usable_key` signals
    /// that at least one key became usable.
    fn send_keys_change(&self, session_id: &[u8], statuses: &[KeyStatus], has_new_usable_key: bool);
}

/// A scheme-specific content-protection backend.
///
/// All calls are serialized by the owning instance; implementations do not
/// need internal locking for these methods. Session, key-set, and
/// secure-stop identifiers are opaque byte strings owned by the plugin.
pub trait DrmPlugin: Send {
    /// Open a session and return its identifier. Returns
    /// [`Error::ResourceBusy`](crate::Error::ResourceBusy) when the plugin
    /// is out of session resources; the host reacts by requesting
    /// reclamation and retrying once.
    fn open_session(&mut self) -> Result<Vec<u8>>;

    /// Close a session. Closing an unknown identifier returns
    /// [`Error::InvalidSession`](crate::Error::InvalidSession).
    fn close_session(&mut self, session_id: &[u8]) -> Result<()>;

    /// Build a license request for `init_data` in the given session.
    fn get_key_request(
        &mut self,
        session_id: &[u8],
        init_data: &[u8],
        mime_type: &str,
        key_type: KeyType,
        optional_parameters: &HashMap<String, String>,
    ) -> Result<KeyRequest>;

    /// Install the server's license response; returns a key-set id usable
    /// with `remove_keys`/`restore_keys`.
    fn provide_key_response(&mut self, session_id: &[u8], response: &[u8]) -> Result<Vec<u8>>;

    /// Remove persisted keys by key-set id.
    fn remove_keys(&mut self, key_set_id: &[u8]) -> Result<()>;

    /// Restore persisted keys into a session.
    fn restore_keys(&mut self, session_id: &[u8], key_set_id: &[u8]) -> Result<()>;

    /// Query name/value status metadata for the session's keys.
    fn query_key_status(&mut self, session_id: &[u8]) -> Result<HashMap<String, String>>;

    /// Build a provisioning request.
    fn get_provision_request(
        &mut self,
        cert_type: &str,
        cert_authority: &str,
    ) -> Result<ProvisionRequest>;

    /// Apply a provisioning response.
    fn provide_provision_response(&mut self, response: &[u8]) -> Result<ProvisionResponse>;

    /// All pending secure stops.
    fn get_secure_stops(&mut self) -> Result<Vec<Vec<u8>>>;

    /// One secure stop by id.
    fn get_secure_stop(&mut self, ss_id: &[u8]) -> Result<Vec<u8>>;

    /// Release the secure stops named in a server release message.
    fn release_secure_stops(&mut self, ss_release: &[u8]) -> Result<()>;

    /// Release every pending secure stop.
    fn release_all_secure_stops(&mut self) -> Result<()>;

    /// Read a string property by name.
    fn get_property_string(&mut self, name: &str) -> Result<String>;

    /// Read a byte-array property by name.
    fn get_property_byte_array(&mut self, name: &str) -> Result<Vec<u8>>;

    /// Write a string property.
    fn set_property_string(&mut self, name: &str, value: &str) -> Result<()>;

    /// Write a byte-array property.
    fn set_property_byte_array(&mut self, name: &str, value: &[u8]) -> Result<()>;

    /// Select the cipher algorithm used by `encrypt`/`decrypt`.
    fn set_cipher_algorithm(&mut self, session_id: &[u8], algorithm: &str) -> Result<()>;

    /// Select the MAC algorithm used by `sign`/`verify`.
    fn set_mac_algorithm(&mut self, session_id: &[u8], algorithm: &str) -> Result<()>;

    /// Encrypt `input` with a session key.
    fn encrypt(
        &mut self,
        session_id: &[u8],
        key_id: &[u8],
        input: &[u8],
        iv: &[u8],
    ) -> Result<Vec<u8>>;

    /// Decrypt `input` with a session key.
    fn decrypt(
        &mut self,
        session_id: &[u8],
        key_id: &[u8],
        input: &[u8],
        iv: &[u8],
    ) -> Result<Vec<u8>>;

    /// MAC-sign `message` with a session key.
    fn sign(&mut self, session_id: &[u8], key_id: &[u8], message: &[u8]) -> Result<Vec<u8>>;

    /// Verify a MAC signature; returns whether it matched.
    fn verify(
        &mut self,
        session_id: &[u8],
        key_id: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool>;

    /// RSA-sign `message` with a provisioning-wrapped key.
    fn sign_rsa(
        &mut self,
        session_id: &[u8],
        algorithm: &str,
        message: &[u8],
        wrapped_key: &[u8],
    ) -> Result<Vec<u8>>;

    /// Install or clear the asynchronous event sink.
    fn set_listener(&mut self, listener: Option<Weak<dyn PluginListener>>);
}
