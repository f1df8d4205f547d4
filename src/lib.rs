//! rsmediadrm - process-local DRM plugin host.
//!
//! This crate provides:
//! - Runtime discovery and loading of vendor content-protection plugins,
//!   with scheme-resolution and live-image caches shared process-wide.
//! - A per-client session facade (`DrmInstance`) serializing license,
//!   key, crypto, and secure-stop operations into one vendor plugin.
//! - Cooperation with a process-wide session arbiter that can reclaim
//!   sessions when a plugin runs out of resources.
//! - Event routing from plugin callback threads to a client listener
//!   channel whose liveness is tracked.
//!
//! Vendor plugins are shared objects exporting a `createDrmFactory`
//! symbol; see [`plugin`] for the ABI.

/// Session arbitration contracts and the per-instance tracker.
pub mod arbiter;
/// Client-facing listener, death, and capability contracts.
pub mod client;
/// Common error types and Result alias.
pub mod error;
/// Event kinds, key statuses, and listener payload framing.
pub mod events;
/// Per-client DRM facade.
pub mod instance;
/// Shared-object wrapper for plugin images.
pub mod library;
/// Scheme-to-factory resolution.
pub mod loader;
/// Vendor plugin ABI.
pub mod plugin;
/// Process-wide plugin caches.
pub mod registry;

#[cfg(test)]
pub(crate) mod testutil;

pub use arbiter::{ReclaimableSession, SessionArbiter, SessionTracker};
pub use client::{AccessPolicy, ClientChannel, DeathRecipient, DenyAllPolicy, ACCESS_DRM_CERTIFICATES};
pub use error::{Error, Result};
pub use events::{EventType, KeyStatus, KeyStatusCode};
pub use instance::DrmInstance;
pub use library::SharedLibrary;
pub use loader::{FactoryLoader, DEFAULT_PLUGIN_DIR};
pub use plugin::{DrmPlugin, DrmPluginFactory, KeyRequestType, KeyType, PluginListener};
pub use registry::PluginRegistry;
