//! Event types and listener payload framing.
//!
//! Plugin callbacks are forwarded to the client as `(event_type, extra,
//! payload)` triples. Payloads are flat byte buffers: every byte-array
//! field is framed as a little-endian `i32` length followed by that many
//! bytes, with length 0 for an absent or empty field.

/// Event kinds delivered to a [`ClientChannel`](crate::client::ClientChannel).
///
/// Values 1 through 4 originate in the plugin and are forwarded with the
/// plugin's `extra` code; the remaining values are synthesized by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum EventType {
    /// The app must request provisioning before keys can be delivered.
    ProvisionRequired = 1,
    /// Keys are needed to continue; the app should request a license.
    KeyNeeded = 2,
    /// Keys in the session have expired.
    KeyExpired = 3,
    /// Vendor-defined event; meaning of `extra` is plugin-specific.
    VendorDefined = 4,
    /// A session was closed by the arbiter to free plugin resources.
    SessionReclaimed = 5,
    /// License expiration time for a session changed.
    ExpirationUpdate = 6,
    /// Status of one or more keys in a session changed.
    KeysChange = 7,
}

/// Lifecycle status of a single content key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum KeyStatusCode {
    /// The key may be used for decryption.
    Usable = 0,
    /// The key is expired and unusable.
    Expired = 1,
    /// Output protection requirements cannot be met.
    OutputNotAllowed = 2,
    /// Status cannot be determined yet.
    StatusPending = 3,
    /// An internal plugin error left the key unusable.
    InternalError = 4,
}

/// A key identifier paired with its current status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStatus {
    /// Key identifier, opaque to the host.
    pub key_id: Vec<u8>,
    /// Current status of the key.
    pub code: KeyStatusCode,
}

fn put_byte_array(buf: &mut Vec<u8>, data: Option<&[u8]>) {
    match data {
        Some(bytes) if !bytes.is_empty() => {
            buf.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
            buf.extend_from_slice(bytes);
        }
        _ => buf.extend_from_slice(&0i32.to_le_bytes()),
    }
}

/// Frame a generic event payload: `[session_id][data]`.
#[must_use]
pub fn event_payload(session_id: Option<&[u8]>, data: Option<&[u8]>) -> Vec<u8> {
    let mut buf = Vec::new();
    put_byte_array(&mut buf, session_id);
    put_byte_array(&mut buf, data);
    buf
}

/// Frame an expiration update: `[session_id][i64 expiry_time_ms]`.
#[must_use]
pub fn expiration_update_payload(session_id: &[u8], expiry_time_ms: i64) -> Vec<u8> {
    let mut buf = Vec::new();
    put_byte_array(&mut buf, Some(session_id));
    buf.extend_from_slice(&expiry_time_ms.to_le_bytes());
    buf
}

/// Frame a key-status change:
/// `[session_id][i32 n][{[key_id][i32 status]} x n][i32 has_new_usable_key]`.
#[must_use]
pub fn keys_change_payload(
    session_id: &[u8],
    statuses: &[KeyStatus],
    has_new_usable_key: bool,
) -> Vec<u8> {
    let mut buf = Vec::new();
    put_byte_array(&mut buf, Some(session_id));
    buf.extend_from_slice(&(statuses.len() as i32).to_le_bytes());
    for status in statuses {
        put_byte_array(&mut buf, Some(&status.key_id));
        buf.extend_from_slice(&(status.code as i32).to_le_bytes());
    }
    buf.extend_from_slice(&(has_new_usable_key as i32).to_le_bytes());
    buf
}
