//! Client-facing contracts implemented by the surrounding transport.
//!
//! The host never talks to a client directly; it frames notifications into
//! a [`ClientChannel`] and learns about the client going away through the
//! channel's death linkage.

use std::sync::Arc;

use crate::events::EventType;

/// Capability required by [`DrmInstance::sign_rsa`](crate::DrmInstance::sign_rsa)
/// for cross-process callers.
pub const ACCESS_DRM_CERTIFICATES: &str = "android.permission.ACCESS_DRM_CERTIFICATES";

/// A channel carrying listener notifications to one client.
///
/// Implementations deliver `notify` however their transport frames
/// callbacks; the payload layouts are defined in [`crate::events`]. The
/// host serializes `notify` calls per channel, so implementations need not
/// handle concurrent delivery from a single instance.
pub trait ClientChannel: Send + Sync {
    /// Deliver one notification to the client.
    fn notify(&self, event: EventType, extra: i32, payload: &[u8]);

    /// Register `recipient` to be told when the client behind this channel
    /// dies. A transport without death signalling may make this a no-op,
    /// at the cost of leaking plugin resources when clients vanish.
    fn link_to_death(&self, recipient: &Arc<dyn DeathRecipient>);

    /// Remove a previously registered death recipient.
    fn unlink_from_death(&self, recipient: &Arc<dyn DeathRecipient>);
}

/// Receives the death notification for a linked [`ClientChannel`].
pub trait DeathRecipient: Send + Sync {
    /// The client behind the channel is gone.
    fn channel_died(&self);
}

/// Decides whether a calling process holds a named capability.
///
/// Only consulted for callers in a different process than the host; the
/// host process itself is always trusted.
pub trait AccessPolicy: Send + Sync {
    /// Returns true if the process `pid` holds `capability`.
    fn check_capability(&self, pid: u32, capability: &str) -> bool;
}

/// Policy that grants no capabilities. The default for instances whose
/// transport does not supply a real checker.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllPolicy;

impl AccessPolicy for DenyAllPolicy {
    fn check_capability(&self, _pid: u32, _capability: &str) -> bool {
        false
    }
}
