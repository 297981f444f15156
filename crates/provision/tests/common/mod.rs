//! Shared harness: a scriptable DESFire card and a registry wired to it.

#![allow(dead_code)]

use async_trait::async_trait;
use cardsmith_core::{ApplicationId, Config, EventBus, ReaderEvent, ReaderId};
use cardsmith_desfire::{
    AesKey, CardTransport, CommandError, CommandResult, DesfireCommands, KeySettings, KeyType,
    StandardFile, TransportError, DEFAULT_AES_KEY, DEFAULT_LEGACY_KEY,
};
use cardsmith_provision::{CredentialSink, ReaderRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

pub const DESFIRE_ATR: &[u8] = &[0x3B, 0x81, 0x80, 0x01, 0x80, 0x80];
pub const MIFARE_CLASSIC_ATR: &[u8] = &[
    0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06, 0x03, 0x00, 0x01,
    0x00, 0x00, 0x00, 0x00, 0x6A,
];

const TIMEOUT: Duration = Duration::from_secs(5);

/// Command-level pause: the card blocks inside `command` until released.
struct Gate {
    command: &'static str,
    entered: Notify,
    release: Notify,
}

/// In-memory DESFire card.
pub struct MockCard {
    uid: Vec<u8>,
    secure_uid: Mutex<Option<Vec<u8>>>,
    uid_read_fails: AtomicBool,
    picc_auth_fails: AtomicBool,
    app_auth_fails: AtomicBool,
    key_change_ignored: AtomicBool,
    corrupt_readback: AtomicBool,
    faults: Mutex<HashMap<&'static str, CommandError>>,
    gate: Mutex<Option<Arc<Gate>>>,
    calls: Mutex<Vec<&'static str>>,
    app_key: Mutex<[u8; 16]>,
    applications: Mutex<Vec<ApplicationId>>,
    files: Mutex<HashMap<u8, Vec<u8>>>,
}

impl MockCard {
    pub fn new(uid: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            uid: uid.to_vec(),
            secure_uid: Mutex::new(None),
            uid_read_fails: AtomicBool::new(false),
            picc_auth_fails: AtomicBool::new(false),
            app_auth_fails: AtomicBool::new(false),
            key_change_ignored: AtomicBool::new(false),
            corrupt_readback: AtomicBool::new(false),
            faults: Mutex::new(HashMap::new()),
            gate: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            app_key: Mutex::new(DEFAULT_AES_KEY),
            applications: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Answer the authenticated UID read with `uid` instead of the tap UID.
    pub fn with_secure_uid(self: Arc<Self>, uid: &[u8]) -> Arc<Self> {
        *self.secure_uid.lock().unwrap() = Some(uid.to_vec());
        self
    }

    pub fn with_applications(self: Arc<Self>, aids: &[u32]) -> Arc<Self> {
        *self.applications.lock().unwrap() = aids
            .iter()
            .map(|aid| ApplicationId::new(*aid).unwrap())
            .collect();
        self
    }

    pub fn fail_uid_read(&self) {
        self.uid_read_fails.store(true, Ordering::SeqCst);
    }

    pub fn reject_picc_key(&self) {
        self.picc_auth_fails.store(true, Ordering::SeqCst);
    }

    /// Refuse AES authentication with the factory application key.
    pub fn reject_default_app_key(&self) {
        self.app_auth_fails.store(true, Ordering::SeqCst);
    }

    /// Acknowledge ChangeKey without storing the new key.
    pub fn ignore_key_change(&self) {
        self.key_change_ignored.store(true, Ordering::SeqCst);
    }

    pub fn corrupt_readback(&self) {
        self.corrupt_readback.store(true, Ordering::SeqCst);
    }

    pub fn fail(&self, command: &'static str, err: CommandError) {
        self.faults.lock().unwrap().insert(command, err);
    }

    /// Block the next call to `command` until [`MockCard::release`].
    pub fn pause_at(&self, command: &'static str) {
        *self.gate.lock().unwrap() = Some(Arc::new(Gate {
            command,
            entered: Notify::new(),
            release: Notify::new(),
        }));
    }

    /// Wait until a call is blocked at the pause point.
    pub async fn paused(&self) {
        let gate = self.gate.lock().unwrap().clone().expect("no pause point set");
        tokio::time::timeout(TIMEOUT, gate.entered.notified())
            .await
            .expect("card never reached the pause point");
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.release.notify_one();
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, command: &str) -> bool {
        self.calls().iter().any(|c| *c == command)
    }

    pub fn app_key(&self) -> [u8; 16] {
        *self.app_key.lock().unwrap()
    }

    pub fn file(&self, file_id: u8) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(&file_id).cloned()
    }

    pub fn applications(&self) -> Vec<ApplicationId> {
        self.applications.lock().unwrap().clone()
    }

    async fn enter(&self, command: &'static str) -> CommandResult<()> {
        self.calls.lock().unwrap().push(command);

        let gate = self
            .gate
            .lock()
            .unwrap()
            .clone()
            .filter(|gate| gate.command == command);
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        match self.faults.lock().unwrap().get(command) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CardTransport for MockCard {
    async fn transmit(&self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        if command == [0xFF, 0xCA, 0x00, 0x00, 0x00] {
            if self.uid_read_fails.load(Ordering::SeqCst) {
                return Ok(vec![0x6A, 0x81]);
            }
            let mut response = self.uid.clone();
            response.extend_from_slice(&[0x90, 0x00]);
            return Ok(response);
        }
        Ok(vec![0x6D, 0x00])
    }
}

#[async_trait]
impl DesfireCommands for MockCard {
    async fn select_application(&self, _aid: ApplicationId) -> CommandResult<()> {
        self.enter("select_application").await
    }

    async fn authenticate_legacy(&self, _key_no: u8, key: &[u8; 8]) -> CommandResult<()> {
        self.enter("authenticate_legacy").await?;
        if self.picc_auth_fails.load(Ordering::SeqCst) || key != &DEFAULT_LEGACY_KEY {
            return Err(CommandError::Authentication("PICC key rejected".into()));
        }
        Ok(())
    }

    async fn authenticate_aes(&self, _key_no: u8, key: &AesKey) -> CommandResult<()> {
        self.enter("authenticate_aes").await?;
        let default_rejected =
            self.app_auth_fails.load(Ordering::SeqCst) && key.as_bytes() == &DEFAULT_AES_KEY;
        if default_rejected || key.as_bytes() != &self.app_key() {
            return Err(CommandError::Authentication("application key rejected".into()));
        }
        Ok(())
    }

    async fn format_picc(&self) -> CommandResult<()> {
        self.enter("format_picc").await?;
        self.applications.lock().unwrap().clear();
        self.files.lock().unwrap().clear();
        *self.app_key.lock().unwrap() = DEFAULT_AES_KEY;
        Ok(())
    }

    async fn get_card_uid(&self) -> CommandResult<Vec<u8>> {
        self.enter("get_card_uid").await?;
        let secure = self.secure_uid.lock().unwrap().clone();
        Ok(secure.unwrap_or_else(|| self.uid.clone()))
    }

    async fn create_application(
        &self,
        aid: ApplicationId,
        _settings: KeySettings,
        _key_count: u8,
        _key_type: KeyType,
    ) -> CommandResult<()> {
        self.enter("create_application").await?;
        self.applications.lock().unwrap().push(aid);
        Ok(())
    }

    async fn change_key_aes(
        &self,
        _key_no: u8,
        _key_version: u8,
        new_key: &AesKey,
        _old_key: &AesKey,
    ) -> CommandResult<()> {
        self.enter("change_key_aes").await?;
        if !self.key_change_ignored.load(Ordering::SeqCst) {
            *self.app_key.lock().unwrap() = *new_key.as_bytes();
        }
        Ok(())
    }

    async fn create_standard_data_file(&self, file: StandardFile) -> CommandResult<()> {
        self.enter("create_standard_data_file").await?;
        self.files
            .lock()
            .unwrap()
            .insert(file.file_id, vec![0; file.size as usize]);
        Ok(())
    }

    async fn write_data_encrypted(&self, file_id: u8, offset: u32, data: &[u8]) -> CommandResult<()> {
        self.enter("write_data_encrypted").await?;
        let mut files = self.files.lock().unwrap();
        let file = files
            .get_mut(&file_id)
            .ok_or(CommandError::Status(0xF0))?;
        let start = offset as usize;
        file[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    async fn read_data_encrypted(&self, file_id: u8, offset: u32, len: u32) -> CommandResult<Vec<u8>> {
        self.enter("read_data_encrypted").await?;
        let files = self.files.lock().unwrap();
        let file = files.get(&file_id).ok_or(CommandError::Status(0xF0))?;
        let start = offset as usize;
        let mut data = file[start..start + len as usize].to_vec();
        if self.corrupt_readback.load(Ordering::SeqCst) {
            data[0] ^= 0xFF;
        }
        Ok(data)
    }

    async fn get_application_ids(&self) -> CommandResult<Vec<ApplicationId>> {
        self.enter("get_application_ids").await?;
        Ok(self.applications())
    }
}

/// Credential sink that remembers every record.
#[derive(Default)]
pub struct RecordingCredentials {
    pub records: Mutex<Vec<(String, String, String)>>,
}

impl CredentialSink for RecordingCredentials {
    fn record_issued_credential(&self, owner: &str, uid: &str, payload: &str) {
        self.records
            .lock()
            .unwrap()
            .push((owner.to_string(), uid.to_string(), payload.to_string()));
    }
}

/// Maps tapped transports back to the mock card behind them.
#[derive(Default)]
pub struct MockConnector {
    cards: Mutex<HashMap<usize, Arc<MockCard>>>,
}

fn transport_key(transport: &Arc<dyn CardTransport>) -> usize {
    Arc::as_ptr(transport) as *const () as usize
}

impl MockConnector {
    fn register(&self, card: &Arc<MockCard>) -> Arc<dyn CardTransport> {
        let transport: Arc<dyn CardTransport> = card.clone();
        self.cards
            .lock()
            .unwrap()
            .insert(transport_key(&transport), card.clone());
        transport
    }

    fn connect(&self, transport: Arc<dyn CardTransport>) -> Arc<dyn DesfireCommands> {
        let card = self
            .cards
            .lock()
            .unwrap()
            .get(&transport_key(&transport))
            .cloned()
            .expect("transport was not registered with the connector");
        card
    }
}

/// Registry, event bus and mock cards under test.
pub struct Harness {
    pub bus: Arc<EventBus>,
    pub events: broadcast::Receiver<ReaderEvent>,
    pub registry: ReaderRegistry,
    pub credentials: Arc<RecordingCredentials>,
    connector: Arc<MockConnector>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        cardsmith_core::logging::init_for_tests();

        let bus = Arc::new(EventBus::from_config(&config.events));
        let events = bus.subscribe();
        let credentials = Arc::new(RecordingCredentials::default());
        let connector = Arc::new(MockConnector::default());

        let lookup = connector.clone();
        let registry = ReaderRegistry::builder(
            bus.clone(),
            Arc::new(move |transport: Arc<dyn CardTransport>| lookup.connect(transport)),
        )
        .credential_sink(credentials.clone())
        .config(config)
        .build()
        .expect("test configuration is valid");

        Self {
            bus,
            events,
            registry,
            credentials,
            connector,
        }
    }

    pub async fn attach(&mut self, reader: &str) -> ReaderId {
        let reader = ReaderId::new(reader);
        self.registry
            .on_reader_attached(reader.clone())
            .await
            .expect("attach failed");
        self.expect_event(|e| matches!(e, ReaderEvent::ReaderAttached { .. }))
            .await;
        reader
    }

    /// Tap `card` on `reader` and wait for the resulting event.
    pub async fn tap(&mut self, reader: &ReaderId, card: &Arc<MockCard>, atr: &[u8]) -> ReaderEvent {
        let transport = self.connector.register(card);
        self.registry
            .card_detected(reader, atr.to_vec(), transport)
            .await
            .expect("card signal rejected");
        let target = reader.clone();
        self.expect_event(move |e| {
            e.reader() == &target
                && matches!(e, ReaderEvent::CardAttached { .. } | ReaderEvent::CardError { .. })
        })
        .await
    }

    pub async fn tap_desfire(&mut self, reader: &ReaderId, card: &Arc<MockCard>) {
        match self.tap(reader, card, DESFIRE_ATR).await {
            ReaderEvent::CardAttached { .. } => {}
            other => panic!("expected card-attached, got {other:?}"),
        }
    }

    pub async fn next_event(&mut self) -> ReaderEvent {
        tokio::time::timeout(TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event bus closed")
    }

    /// Skip events until one matches.
    pub async fn expect_event(&mut self, mut pred: impl FnMut(&ReaderEvent) -> bool) -> ReaderEvent {
        loop {
            let event = self.next_event().await;
            if pred(&event) {
                return event;
            }
        }
    }

    /// Events already published and not yet consumed.
    pub fn drain(&mut self) -> Vec<ReaderEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

pub async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(TIMEOUT, future)
        .await
        .expect("operation timed out")
}
