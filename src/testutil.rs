//! Shared test doubles: a scripted plugin stack, arbiter, and listener
//! channel, plus a cross-object call log for ordering assertions.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::arbiter::{ReclaimableSession, SessionArbiter};
use crate::client::{AccessPolicy, ClientChannel, DeathRecipient};
use crate::error::{Error, Result};
use crate::events::EventType;
use crate::plugin::{
    DrmPlugin, DrmPluginFactory, KeyRequest, KeyRequestType, KeyType, PluginListener,
    ProvisionRequest, ProvisionResponse,
};

/// Scheme every mock factory accepts.
pub(crate) const TEST_SCHEME: Uuid = Uuid::from_u128(0xedef8ba9_79d6_4ace_a3c8_27dcd51d21ed);

/// Ordered record of arbiter and plugin calls, shared across mocks.
#[derive(Debug, Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, call: &str) {
        self.0.lock().push(call.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Monotone counter readable from tests.
#[derive(Debug, Default)]
pub(crate) struct Counter(AtomicUsize);

impl Counter {
    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Session capacity shared by every plugin created over it, so two
/// instances can contend for the same vendor resources.
#[derive(Debug)]
pub(crate) struct ResourcePool {
    available: Mutex<usize>,
}

impl ResourcePool {
    pub fn shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            available: Mutex::new(capacity),
        })
    }

    fn try_take(&self) -> bool {
        let mut available = self.available.lock();
        if *available == 0 {
            return false;
        }
        *available -= 1;
        true
    }

    fn release(&self) {
        *self.available.lock() += 1;
    }
}

type ListenerProbe = Arc<Mutex<Option<Weak<dyn PluginListener>>>>;

static PLUGIN_SEQ: AtomicUsize = AtomicUsize::new(0);

pub(crate) struct MockPlugin {
    pool: Arc<ResourcePool>,
    log: CallLog,
    listener_probe: ListenerProbe,
    drops: Arc<Counter>,
    sessions: HashSet<Vec<u8>>,
    string_props: HashMap<String, String>,
    byte_props: HashMap<String, Vec<u8>>,
    number: usize,
    next_session: u32,
}

impl MockPlugin {
    fn new(
        pool: Arc<ResourcePool>,
        log: CallLog,
        listener_probe: ListenerProbe,
        drops: Arc<Counter>,
    ) -> Self {
        let string_props = HashMap::from([
            ("vendor".to_string(), "mock".to_string()),
            ("version".to_string(), "1.0".to_string()),
            ("description".to_string(), "mock drm plugin".to_string()),
            (
                "algorithms".to_string(),
                "AES/CBC/NoPadding,HmacSHA256".to_string(),
            ),
        ]);
        let byte_props = HashMap::from([(
            "deviceUniqueId".to_string(),
            vec![0xA0, 0xA1, 0xA2, 0xA3],
        )]);
        Self {
            pool,
            log,
            listener_probe,
            drops,
            sessions: HashSet::new(),
            string_props,
            byte_props,
            number: PLUGIN_SEQ.fetch_add(1, Ordering::SeqCst) + 1,
            next_session: 0,
        }
    }

    fn known(&self, session_id: &[u8]) -> Result<()> {
        if self.sessions.contains(session_id) {
            Ok(())
        } else {
            Err(Error::InvalidSession(session_id.to_vec()))
        }
    }
}

impl Drop for MockPlugin {
    fn drop(&mut self) {
        self.drops.bump();
    }
}

impl DrmPlugin for MockPlugin {
    fn open_session(&mut self) -> Result<Vec<u8>> {
        self.log.push("plugin.open_session");
        if !self.pool.try_take() {
            return Err(Error::ResourceBusy);
        }
        self.next_session += 1;
        let session_id = format!("session-{}-{}", self.number, self.next_session).into_bytes();
        self.sessions.insert(session_id.clone());
        Ok(session_id)
    }

    fn close_session(&mut self, session_id: &[u8]) -> Result<()> {
        self.log.push("plugin.close_session");
        if self.sessions.remove(session_id) {
            self.pool.release();
            Ok(())
        } else {
            Err(Error::InvalidSession(session_id.to_vec()))
        }
    }

    fn get_key_request(
        &mut self,
        session_id: &[u8],
        _init_data: &[u8],
        _mime_type: &str,
        _key_type: KeyType,
        _optional_parameters: &HashMap<String, String>,
    ) -> Result<KeyRequest> {
        self.log.push("plugin.get_key_request");
        self.known(session_id)?;
        Ok(KeyRequest {
            request: b"key-request".to_vec(),
            default_url: "https://license.mock.example".to_string(),
            request_type: KeyRequestType::Initial,
        })
    }

    fn provide_key_response(&mut self, session_id: &[u8], _response: &[u8]) -> Result<Vec<u8>> {
        self.log.push("plugin.provide_key_response");
        self.known(session_id)?;
        Ok(b"key-set-1".to_vec())
    }

    fn remove_keys(&mut self, key_set_id: &[u8]) -> Result<()> {
        self.log.push("plugin.remove_keys");
        if key_set_id.is_empty() {
            return Err(Error::InvalidKeySet(key_set_id.to_vec()));
        }
        Ok(())
    }

    fn restore_keys(&mut self, session_id: &[u8], key_set_id: &[u8]) -> Result<()> {
        self.log.push("plugin.restore_keys");
        self.known(session_id)?;
        if key_set_id.is_empty() {
            return Err(Error::InvalidKeySet(key_set_id.to_vec()));
        }
        Ok(())
    }

    fn query_key_status(&mut self, session_id: &[u8]) -> Result<HashMap<String, String>> {
        self.log.push("plugin.query_key_status");
        self.known(session_id)?;
        Ok(HashMap::from([(
            "LicenseType".to_string(),
            "Streaming".to_string(),
        )]))
    }

    fn get_provision_request(
        &mut self,
        _cert_type: &str,
        _cert_authority: &str,
    ) -> Result<ProvisionRequest> {
        self.log.push("plugin.get_provision_request");
        Ok(ProvisionRequest {
            request: b"provision-request".to_vec(),
            default_url: "https://provision.mock.example".to_string(),
        })
    }

    fn provide_provision_response(&mut self, _response: &[u8]) -> Result<ProvisionResponse> {
        self.log.push("plugin.provide_provision_response");
        Ok(ProvisionResponse {
            certificate: b"certificate".to_vec(),
            wrapped_key: b"wrapped-key".to_vec(),
        })
    }

    fn get_secure_stops(&mut self) -> Result<Vec<Vec<u8>>> {
        self.log.push("plugin.get_secure_stops");
        Ok(vec![b"stop-1".to_vec()])
    }

    fn get_secure_stop(&mut self, ss_id: &[u8]) -> Result<Vec<u8>> {
        self.log.push("plugin.get_secure_stop");
        Ok(ss_id.to_vec())
    }

    fn release_secure_stops(&mut self, _ss_release: &[u8]) -> Result<()> {
        self.log.push("plugin.release_secure_stops");
        Ok(())
    }

    fn release_all_secure_stops(&mut self) -> Result<()> {
        self.log.push("plugin.release_all_secure_stops");
        Ok(())
    }

    fn get_property_string(&mut self, name: &str) -> Result<String> {
        self.string_props
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Other(format!("unknown property {name}")))
    }

    fn get_property_byte_array(&mut self, name: &str) -> Result<Vec<u8>> {
        self.byte_props
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Other(format!("unknown property {name}")))
    }

    fn set_property_string(&mut self, name: &str, value: &str) -> Result<()> {
        self.string_props.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn set_property_byte_array(&mut self, name: &str, value: &[u8]) -> Result<()> {
        self.byte_props.insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn set_cipher_algorithm(&mut self, session_id: &[u8], _algorithm: &str) -> Result<()> {
        self.log.push("plugin.set_cipher_algorithm");
        self.known(session_id)
    }

    fn set_mac_algorithm(&mut self, session_id: &[u8], _algorithm: &str) -> Result<()> {
        self.log.push("plugin.set_mac_algorithm");
        self.known(session_id)
    }

    fn encrypt(
        &mut self,
        session_id: &[u8],
        _key_id: &[u8],
        input: &[u8],
        _iv: &[u8],
    ) -> Result<Vec<u8>> {
        self.log.push("plugin.encrypt");
        self.known(session_id)?;
        Ok(input.to_vec())
    }

    fn decrypt(
        &mut self,
        session_id: &[u8],
        _key_id: &[u8],
        input: &[u8],
        _iv: &[u8],
    ) -> Result<Vec<u8>> {
        self.log.push("plugin.decrypt");
        self.known(session_id)?;
        Ok(input.to_vec())
    }

    fn sign(&mut self, session_id: &[u8], _key_id: &[u8], _message: &[u8]) -> Result<Vec<u8>> {
        self.log.push("plugin.sign");
        self.known(session_id)?;
        Ok(b"mac".to_vec())
    }

    fn verify(
        &mut self,
        session_id: &[u8],
        _key_id: &[u8],
        _message: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        self.log.push("plugin.verify");
        self.known(session_id)?;
        Ok(signature == b"mac")
    }

    fn sign_rsa(
        &mut self,
        _session_id: &[u8],
        _algorithm: &str,
        _message: &[u8],
        _wrapped_key: &[u8],
    ) -> Result<Vec<u8>> {
        self.log.push("plugin.sign_rsa");
        Ok(b"rsa-signature".to_vec())
    }

    fn set_listener(&mut self, listener: Option<Weak<dyn PluginListener>>) {
        *self.listener_probe.lock() = listener;
    }
}

/// Factory producing [`MockPlugin`]s for [`TEST_SCHEME`].
#[derive(Debug)]
pub(crate) struct MockFactory {
    pool: Arc<ResourcePool>,
    log: CallLog,
    listener_probe: ListenerProbe,
    plugin_drops: Arc<Counter>,
}

impl MockFactory {
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: ResourcePool::shared(capacity),
            log: CallLog::default(),
            listener_probe: Arc::new(Mutex::new(None)),
            plugin_drops: Arc::new(Counter::default()),
        }
    }

    pub fn boxed(capacity: usize) -> Box<dyn DrmPluginFactory> {
        Box::new(Self::new(capacity))
    }

    /// Route plugin calls into `log`.
    pub fn logging_to(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Contend for session capacity with other factories over `pool`.
    pub fn sharing_pool(mut self, pool: Arc<ResourcePool>) -> Self {
        self.pool = pool;
        self
    }

    /// Slot where created plugins store the event sink they were given.
    pub fn listener_probe(&self) -> ListenerProbe {
        self.listener_probe.clone()
    }

    /// Counts drops of every plugin this factory created.
    pub fn plugin_drops(&self) -> Arc<Counter> {
        self.plugin_drops.clone()
    }
}

impl DrmPluginFactory for MockFactory {
    fn supports_scheme(&self, uuid: &Uuid) -> bool {
        *uuid == TEST_SCHEME
    }

    fn supports_content_type(&self, mime_type: &str) -> bool {
        mime_type.starts_with("video/") || mime_type.starts_with("audio/")
    }

    fn create_plugin(&mut self, uuid: &Uuid) -> Result<Box<dyn DrmPlugin>> {
        if !self.supports_scheme(uuid) {
            return Err(Error::Unsupported(*uuid));
        }
        Ok(Box::new(MockPlugin::new(
            self.pool.clone(),
            self.log.clone(),
            self.listener_probe.clone(),
            self.plugin_drops.clone(),
        )))
    }
}

struct ArbiterEntry {
    pid: u32,
    client: Arc<dyn ReclaimableSession>,
    session_id: Vec<u8>,
}

/// Arbiter double: tracks sessions in registration order and reclaims the
/// oldest one when asked.
#[derive(Default)]
pub(crate) struct MockArbiter {
    log: CallLog,
    entries: Mutex<Vec<ArbiterEntry>>,
    refuse_reclaim: AtomicUsize,
}

impl MockArbiter {
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Make `reclaim` report that nothing could be freed.
    pub fn refuse_reclaim(&self) {
        self.refuse_reclaim.store(1, Ordering::SeqCst);
    }

    pub fn sessions(&self) -> Vec<(u32, Vec<u8>)> {
        self.entries
            .lock()
            .iter()
            .map(|entry| (entry.pid, entry.session_id.clone()))
            .collect()
    }
}

impl SessionArbiter for MockArbiter {
    fn add_session(&self, pid: u32, client: Arc<dyn ReclaimableSession>, session_id: &[u8]) {
        self.log.push("arbiter.add_session");
        self.entries.lock().push(ArbiterEntry {
            pid,
            client,
            session_id: session_id.to_vec(),
        });
    }

    fn remove_session(&self, session_id: &[u8]) {
        self.log.push("arbiter.remove_session");
        self.entries
            .lock()
            .retain(|entry| entry.session_id != session_id);
    }

    fn use_session(&self, session_id: &[u8]) {
        let _ = session_id;
        self.log.push("arbiter.use_session");
    }

    fn reclaim(&self, _pid: u32) -> bool {
        self.log.push("arbiter.reclaim");
        if self.refuse_reclaim.load(Ordering::SeqCst) != 0 {
            return false;
        }
        // snapshot outside the entries lock: reclaim_session re-enters
        // remove_session on this arbiter
        let targets: Vec<(Arc<dyn ReclaimableSession>, Vec<u8>)> = self
            .entries
            .lock()
            .iter()
            .map(|entry| (entry.client.clone(), entry.session_id.clone()))
            .collect();
        for (client, session_id) in targets {
            if client.reclaim_session(&session_id) {
                return true;
            }
        }
        false
    }

    fn remove_client(&self, client: &Arc<dyn ReclaimableSession>) {
        self.log.push("arbiter.remove_client");
        let target = Arc::as_ptr(client) as *const ();
        self.entries
            .lock()
            .retain(|entry| Arc::as_ptr(&entry.client) as *const () != target);
    }
}

/// Channel double recording notifications and death linkage.
#[derive(Default)]
pub(crate) struct MockChannel {
    notifications: Mutex<Vec<(EventType, i32, Vec<u8>)>>,
    recipients: Mutex<Vec<Arc<dyn DeathRecipient>>>,
}

impl MockChannel {
    pub fn notifications(&self) -> Vec<(EventType, i32, Vec<u8>)> {
        self.notifications.lock().clone()
    }

    pub fn linked_recipients(&self) -> usize {
        self.recipients.lock().len()
    }

    /// Simulate the client dying: fire every linked recipient.
    pub fn die(&self) {
        let recipients = self.recipients.lock().clone();
        for recipient in recipients {
            recipient.channel_died();
        }
    }
}

impl ClientChannel for MockChannel {
    fn notify(&self, event: EventType, extra: i32, payload: &[u8]) {
        self.notifications.lock().push((event, extra, payload.to_vec()));
    }

    fn link_to_death(&self, recipient: &Arc<dyn DeathRecipient>) {
        self.recipients.lock().push(recipient.clone());
    }

    fn unlink_from_death(&self, recipient: &Arc<dyn DeathRecipient>) {
        let target = Arc::as_ptr(recipient) as *const ();
        self.recipients
            .lock()
            .retain(|linked| Arc::as_ptr(linked) as *const () != target);
    }
}

/// Policy granting every capability.
pub(crate) struct GrantAllPolicy;

impl AccessPolicy for GrantAllPolicy {
    fn check_capability(&self, _pid: u32, _capability: &str) -> bool {
        true
    }
}
