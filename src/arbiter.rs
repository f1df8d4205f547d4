//! Session arbitration contracts and the per-instance tracker.
//!
//! The arbiter is a process-wide service owned by the surrounding system;
//! the host only talks to it through [`SessionArbiter`] and receives
//! reclamation callbacks through [`ReclaimableSession`].

use std::sync::{Arc, Weak};

use tracing::debug;

use crate::events::EventType;
use crate::instance::DrmInstance;
use crate::plugin::PluginListener;

/// Process-wide session accounting and eviction service.
///
/// Apart from `reclaim`, calls are non-reentrant: they must return without
/// calling back into any instance, and the host invokes them while holding
/// an instance lock. `reclaim` is the one re-entrant call; it may close a
/// session on any registered instance before returning, so the host always
/// drops its locks first.
pub trait SessionArbiter: Send + Sync {
    /// A session was opened by `pid`; `client` can be asked to reclaim it.
    fn add_session(&self, pid: u32, client: Arc<dyn ReclaimableSession>, session_id: &[u8]);

    /// A session was closed and leaves the arbiter's accounting.
    fn remove_session(&self, session_id: &[u8]);

    /// A session carried an operation; refreshes its eviction priority.
    fn use_session(&self, session_id: &[u8]);

    /// Try to free plugin resources on behalf of `pid`. Returns true if a
    /// session was reclaimed and the caller should retry its open.
    fn reclaim(&self, pid: u32) -> bool;

    /// Drop every session still registered for `client`. Called when the
    /// owning instance is torn down.
    fn remove_client(&self, client: &Arc<dyn ReclaimableSession>);
}

/// The arbiter's handle for taking a session away from its owner.
pub trait ReclaimableSession: Send + Sync {
    /// Close `session_id` on the owning instance. Returns true when the
    /// session is gone (including when the owner no longer exists) and
    /// false when it is not currently reclaimable.
    fn reclaim_session(&self, session_id: &[u8]) -> bool;
}

/// Adapter registering one [`DrmInstance`] with the arbiter.
///
/// Holds the instance weakly: registration must never keep a dropped
/// instance alive, and a reclamation racing instance teardown simply finds
/// nothing to do.
pub struct SessionTracker {
    instance: Weak<DrmInstance>,
}

impl SessionTracker {
    pub(crate) fn new(instance: Weak<DrmInstance>) -> Self {
        Self { instance }
    }
}

impl ReclaimableSession for SessionTracker {
    fn reclaim_session(&self, session_id: &[u8]) -> bool {
        let Some(instance) = self.instance.upgrade() else {
            return true;
        };
        if let Err(err) = instance.close_session(session_id) {
            debug!(%err, "session not reclaimable");
            return false;
        }
        instance.send_event(EventType::SessionReclaimed, 0, Some(session_id), None);
        true
    }
}
