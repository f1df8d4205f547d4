//! Per-client DRM facade.
//!
//! A `DrmInstance` owns at most one vendor plugin, serializes every call
//! into it, keeps the arbiter's session accounting current, and routes
//! plugin callbacks to the client's listener channel.
//!
//! Lock order (outermost first): registry mutex, instance lock, notify
//! lock, event lock. The instance lock is held across plugin calls but
//! never across `SessionArbiter::reclaim`; the event lock guards only the
//! listener slot and is never held across a plugin or listener call.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::arbiter::{ReclaimableSession, SessionArbiter, SessionTracker};
use crate::client::{
    AccessPolicy, ClientChannel, DeathRecipient, DenyAllPolicy, ACCESS_DRM_CERTIFICATES,
};
use crate::error::{Error, Result};
use crate::events::{self, EventType, KeyStatus};
use crate::library::SharedLibrary;
use crate::loader::FactoryLoader;
use crate::plugin::{
    DrmPlugin, DrmPluginFactory, KeyRequest, KeyType, PluginListener, ProvisionRequest,
    ProvisionResponse,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum InitState {
    #[default]
    Uninitialized,
    Ready,
    Unsupported(Uuid),
}

/// Plugin-side state guarded by the instance lock. Field order encodes
/// release order: plugin, then factory, then library.
#[derive(Default)]
struct PluginState {
    init: InitState,
    plugin: Option<Box<dyn DrmPlugin>>,
    factory: Option<Box<dyn DrmPluginFactory>>,
    library: Option<Arc<SharedLibrary>>,
}

impl PluginState {
    fn check_ready(&self) -> Result<()> {
        match self.init {
            InitState::Ready => Ok(()),
            InitState::Uninitialized => Err(Error::Uninitialized),
            InitState::Unsupported(uuid) => Err(Error::Unsupported(uuid)),
        }
    }

    fn ready_plugin(&mut self) -> Result<&mut Box<dyn DrmPlugin>> {
        self.check_ready()?;
        self.plugin.as_mut().ok_or(Error::NotCreated)
    }

    fn close_factory(&mut self) {
        self.factory = None;
        self.library = None;
    }
}

/// Per-client facade over one vendor DRM plugin.
///
/// Construct with the client's pid and the process arbiter, resolve a
/// scheme, create the plugin, then drive sessions:
///
/// ```ignore
/// let drm = DrmInstance::new(client_pid, arbiter);
/// drm.open_scheme(&scheme)?;
/// drm.create_plugin(&scheme)?;
/// let session_id = drm.open_session()?;
/// ```
pub struct DrmInstance {
    client_pid: u32,
    arbiter: Arc<dyn SessionArbiter>,
    access: Arc<dyn AccessPolicy>,
    loader: FactoryLoader,
    tracker: Arc<SessionTracker>,
    /// Instance lock; held across plugin calls.
    state: Mutex<PluginState>,
    /// Event lock; guards the listener slot only.
    listener: Mutex<Option<Arc<dyn ClientChannel>>>,
    /// Serializes notifications so one listener observes a total order.
    notify_lock: Mutex<()>,
}

impl DrmInstance {
    /// Instance over the default plugin directory, shared registry, and a
    /// deny-all capability policy.
    pub fn new(client_pid: u32, arbiter: Arc<dyn SessionArbiter>) -> Arc<Self> {
        Self::with_parts(client_pid, arbiter, FactoryLoader::new(), Arc::new(DenyAllPolicy))
    }

    /// Instance with an explicit loader and capability policy.
    pub fn with_parts(
        client_pid: u32,
        arbiter: Arc<dyn SessionArbiter>,
        loader: FactoryLoader,
        access: Arc<dyn AccessPolicy>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|instance: &Weak<DrmInstance>| Self {
            client_pid,
            arbiter,
            access,
            loader,
            tracker: Arc::new(SessionTracker::new(instance.clone())),
            state: Mutex::new(PluginState::default()),
            listener: Mutex::new(None),
            notify_lock: Mutex::new(()),
        })
    }

    /// Pid of the client this instance serves.
    pub fn client_pid(&self) -> u32 {
        self.client_pid
    }

    /// Resolve `uuid` to a factory, replacing any previously installed
    /// one. On failure the instance is left `Unsupported` for the scheme.
    pub fn open_scheme(&self, uuid: &Uuid) -> Result<()> {
        let mut state = self.state.lock();
        self.find_factory_for_scheme(&mut state, uuid)
    }

    /// Whether any plugin supports `uuid`, and `mime_type` if given.
    /// Usable before a scheme is opened; load failures report `false`.
    pub fn supports(&self, uuid: &Uuid, mime_type: Option<&str>) -> bool {
        let mut state = self.state.lock();
        if !factory_accepts(&state, uuid) && self.find_factory_for_scheme(&mut state, uuid).is_err()
        {
            return false;
        }
        match (mime_type, state.factory.as_ref()) {
            (Some(mime), Some(factory)) => factory.supports_content_type(mime),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    /// Create the plugin for `uuid`, resolving the factory first if the
    /// installed one does not accept the scheme. The instance becomes the
    /// plugin's event sink.
    pub fn create_plugin(self: &Arc<Self>, uuid: &Uuid) -> Result<()> {
        let mut state = self.state.lock();
        if state.plugin.is_some() {
            return Err(Error::AlreadyCreated);
        }
        if !factory_accepts(&state, uuid) {
            self.find_factory_for_scheme(&mut state, uuid)?;
        }
        state.check_ready()?;

        let self_dyn: Arc<dyn PluginListener> = self.clone();
        let sink: Weak<dyn PluginListener> = Arc::downgrade(&self_dyn);
        let factory = state.factory.as_mut().ok_or(Error::Unsupported(*uuid))?;
        let mut plugin = factory.create_plugin(uuid)?;
        plugin.set_listener(Some(sink));
        state.plugin = Some(plugin);
        Ok(())
    }

    /// Release the plugin. Sessions the arbiter still tracks for this
    /// instance stay registered until closed or the instance is dropped.
    pub fn destroy_plugin(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.check_ready()?;
        if state.plugin.take().is_none() {
            return Err(Error::NotCreated);
        }
        Ok(())
    }

    /// Open a plugin session and register it with the arbiter.
    ///
    /// When the plugin reports `ResourceBusy`, the instance lock is
    /// released, the arbiter is asked to reclaim a session on behalf of
    /// this client, and the open is retried once if reclamation freed
    /// something. Instance state is re-validated after relocking; a
    /// concurrent teardown surfaces as the state's own error.
    pub fn open_session(&self) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        let mut result = state.ready_plugin()?.open_session();
        if matches!(result, Err(Error::ResourceBusy)) {
            drop(state);
            // reclaim may re-enter close_session on this or a sibling
            // instance; holding the instance lock here would deadlock
            let retry = self.arbiter.reclaim(self.client_pid);
            state = self.state.lock();
            let plugin = state.ready_plugin()?;
            if retry {
                result = plugin.open_session();
            }
        }
        let session_id = result?;
        self.arbiter
            .add_session(self.client_pid, self.tracker.clone(), &session_id);
        Ok(session_id)
    }

    /// Close a session and deregister it from the arbiter. The arbiter is
    /// only told on success, so an already-closed id is not
    /// double-decremented.
    pub fn close_session(&self, session_id: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.ready_plugin()?.close_session(session_id)?;
        self.arbiter.remove_session(session_id);
        Ok(())
    }

    /// Build a license request for the session.
    pub fn get_key_request(
        &self,
        session_id: &[u8],
        init_data: &[u8],
        mime_type: &str,
        key_type: KeyType,
        optional_parameters: &HashMap<String, String>,
    ) -> Result<KeyRequest> {
        self.with_session(session_id, |plugin| {
            plugin.get_key_request(session_id, init_data, mime_type, key_type, optional_parameters)
        })
    }

    /// Install a license response; returns the plugin's key-set id.
    pub fn provide_key_response(&self, session_id: &[u8], response: &[u8]) -> Result<Vec<u8>> {
        self.with_session(session_id, |plugin| {
            plugin.provide_key_response(session_id, response)
        })
    }

    /// Remove persisted keys by key-set id.
    pub fn remove_keys(&self, key_set_id: &[u8]) -> Result<()> {
        self.with_plugin(|plugin| plugin.remove_keys(key_set_id))
    }

    /// Restore persisted keys into a session.
    pub fn restore_keys(&self, session_id: &[u8], key_set_id: &[u8]) -> Result<()> {
        self.with_session(session_id, |plugin| {
            plugin.restore_keys(session_id, key_set_id)
        })
    }

    /// Query status metadata for the session's keys.
    pub fn query_key_status(&self, session_id: &[u8]) -> Result<HashMap<String, String>> {
        self.with_session(session_id, |plugin| plugin.query_key_status(session_id))
    }

    /// Build a provisioning request.
    pub fn get_provision_request(
        &self,
        cert_type: &str,
        cert_authority: &str,
    ) -> Result<ProvisionRequest> {
        self.with_plugin(|plugin| plugin.get_provision_request(cert_type, cert_authority))
    }

    /// Apply a provisioning response.
    pub fn provide_provision_response(&self, response: &[u8]) -> Result<ProvisionResponse> {
        self.with_plugin(|plugin| plugin.provide_provision_response(response))
    }

    /// All pending secure stops.
    pub fn get_secure_stops(&self) -> Result<Vec<Vec<u8>>> {
        self.with_plugin(|plugin| plugin.get_secure_stops())
    }

    /// One secure stop by id.
    pub fn get_secure_stop(&self, ss_id: &[u8]) -> Result<Vec<u8>> {
        self.with_plugin(|plugin| plugin.get_secure_stop(ss_id))
    }

    /// Release the secure stops named in a server release message.
    pub fn release_secure_stops(&self, ss_release: &[u8]) -> Result<()> {
        self.with_plugin(|plugin| plugin.release_secure_stops(ss_release))
    }

    /// Release every pending secure stop.
    pub fn release_all_secure_stops(&self) -> Result<()> {
        self.with_plugin(|plugin| plugin.release_all_secure_stops())
    }

    /// Read a string property.
    pub fn get_property_string(&self, name: &str) -> Result<String> {
        self.with_plugin(|plugin| plugin.get_property_string(name))
    }

    /// Read a byte-array property.
    pub fn get_property_byte_array(&self, name: &str) -> Result<Vec<u8>> {
        self.with_plugin(|plugin| plugin.get_property_byte_array(name))
    }

    /// Write a string property.
    pub fn set_property_string(&self, name: &str, value: &str) -> Result<()> {
        self.with_plugin(|plugin| plugin.set_property_string(name, value))
    }

    /// Write a byte-array property.
    pub fn set_property_byte_array(&self, name: &str, value: &[u8]) -> Result<()> {
        self.with_plugin(|plugin| plugin.set_property_byte_array(name, value))
    }

    /// Select the cipher algorithm for the session.
    pub fn set_cipher_algorithm(&self, session_id: &[u8], algorithm: &str) -> Result<()> {
        self.with_session(session_id, |plugin| {
            plugin.set_cipher_algorithm(session_id, algorithm)
        })
    }

    /// Select the MAC algorithm for the session.
    pub fn set_mac_algorithm(&self, session_id: &[u8], algorithm: &str) -> Result<()> {
        self.with_session(session_id, |plugin| {
            plugin.set_mac_algorithm(session_id, algorithm)
        })
    }

    /// Encrypt with a session key.
    pub fn encrypt(
        &self,
        session_id: &[u8],
        key_id: &[u8],
        input: &[u8],
        iv: &[u8],
    ) -> Result<Vec<u8>> {
        self.with_session(session_id, |plugin| {
            plugin.encrypt(session_id, key_id, input, iv)
        })
    }

    /// Decrypt with a session key.
    pub fn decrypt(
        &self,
        session_id: &[u8],
        key_id: &[u8],
        input: &[u8],
        iv: &[u8],
    ) -> Result<Vec<u8>> {
        self.with_session(session_id, |plugin| {
            plugin.decrypt(session_id, key_id, input, iv)
        })
    }

    /// MAC-sign a message with a session key.
    pub fn sign(&self, session_id: &[u8], key_id: &[u8], message: &[u8]) -> Result<Vec<u8>> {
        self.with_session(session_id, |plugin| plugin.sign(session_id, key_id, message))
    }

    /// Verify a MAC signature.
    pub fn verify(
        &self,
        session_id: &[u8],
        key_id: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        self.with_session(session_id, |plugin| {
            plugin.verify(session_id, key_id, message, signature)
        })
    }

    /// RSA-sign a message with a provisioning-wrapped key.
    ///
    /// Cross-process callers must hold [`ACCESS_DRM_CERTIFICATES`]; the
    /// check happens before the arbiter hears about the session and before
    /// the plugin is called.
    pub fn sign_rsa(
        &self,
        session_id: &[u8],
        algorithm: &str,
        message: &[u8],
        wrapped_key: &[u8],
    ) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        let plugin = state.ready_plugin()?;
        if self.client_pid != std::process::id()
            && !self
                .access
                .check_capability(self.client_pid, ACCESS_DRM_CERTIFICATES)
        {
            warn!(pid = self.client_pid, "request requires {ACCESS_DRM_CERTIFICATES}");
            return Err(Error::PermissionDenied {
                capability: ACCESS_DRM_CERTIFICATES.to_string(),
            });
        }
        self.arbiter.use_session(session_id);
        plugin.sign_rsa(session_id, algorithm, message, wrapped_key)
    }

    /// Install or remove the client's listener channel. The instance
    /// watches the channel for death and tears the plugin down when the
    /// client goes away.
    pub fn set_listener(self: &Arc<Self>, listener: Option<Arc<dyn ClientChannel>>) {
        let recipient: Arc<dyn DeathRecipient> = self.clone();
        let mut slot = self.listener.lock();
        if let Some(old) = slot.take() {
            old.unlink_from_death(&recipient);
        }
        if let Some(new) = &listener {
            new.link_to_death(&recipient);
        }
        *slot = listener;
    }

    fn find_factory_for_scheme(&self, state: &mut PluginState, uuid: &Uuid) -> Result<()> {
        state.close_factory();
        match self.loader.find_factory(uuid) {
            Ok((library, factory)) => {
                state.factory = Some(factory);
                state.library = Some(library);
                state.init = InitState::Ready;
                Ok(())
            }
            Err(err) => {
                debug!(%uuid, "scheme resolution failed");
                state.init = InitState::Unsupported(*uuid);
                Err(err)
            }
        }
    }

    /// Run `op` against the plugin under the instance lock.
    fn with_plugin<R>(&self, op: impl FnOnce(&mut dyn DrmPlugin) -> Result<R>) -> Result<R> {
        let mut state = self.state.lock();
        let plugin = state.ready_plugin()?;
        op(plugin.as_mut())
    }

    /// Like [`with_plugin`](Self::with_plugin), for operations bound to a
    /// session: the arbiter sees the use before the plugin runs, whether
    /// or not the call then succeeds.
    fn with_session<R>(
        &self,
        session_id: &[u8],
        op: impl FnOnce(&mut dyn DrmPlugin) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.state.lock();
        let plugin = state.ready_plugin()?;
        self.arbiter.use_session(session_id);
        op(plugin.as_mut())
    }

    fn notify_listener(&self, event: EventType, extra: i32, payload: &[u8]) {
        // snapshot under the event lock, call outside it: a blocked
        // listener must not stall listener replacement
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            let _ordered = self.notify_lock.lock();
            listener.notify(event, extra, payload);
        }
    }

    #[cfg(test)]
    pub(crate) fn install_factory_for_test(&self, factory: Box<dyn DrmPluginFactory>) {
        let mut state = self.state.lock();
        state.factory = Some(factory);
        state.init = InitState::Ready;
    }
}

impl PluginListener for DrmInstance {
    fn send_event(
        &self,
        event: EventType,
        extra: i32,
        session_id: Option<&[u8]>,
        data: Option<&[u8]>,
    ) {
        let payload = events::event_payload(session_id, data);
        self.notify_listener(event, extra, &payload);
    }

    fn send_expiration_update(&self, session_id: &[u8], expiry_time_ms: i64) {
        let payload = events::expiration_update_payload(session_id, expiry_time_ms);
        self.notify_listener(EventType::ExpirationUpdate, 0, &payload);
    }

    fn send_keys_change(
        &self,
        session_id: &[u8],
        statuses: &[KeyStatus],
        has_new_usable_key: bool,
    ) {
        let payload = events::keys_change_payload(session_id, statuses, has_new_usable_key);
        self.notify_listener(EventType::KeysChange, 0, &payload);
    }
}

impl DeathRecipient for DrmInstance {
    /// The client is gone: stop routing events, then drop the plugin and
    /// factory so orphaned sessions and keys are released.
    fn channel_died(&self) {
        self.listener.lock().take();

        let mut state = self.state.lock();
        state.plugin = None;
        state.close_factory();
        state.init = InitState::Uninitialized;
    }
}

impl Drop for DrmInstance {
    fn drop(&mut self) {
        let client: Arc<dyn ReclaimableSession> = self.tracker.clone();
        self.arbiter.remove_client(&client);
    }
}

fn factory_accepts(state: &PluginState, uuid: &Uuid) -> bool {
    state
        .factory
        .as_ref()
        .is_some_and(|factory| factory.supports_scheme(uuid))
}
