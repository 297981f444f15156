//! Reader registry: attach, detach and routing by reader identity.

use crate::payload::ProvisioningPayload;
use crate::session::{self, ReaderHandle, SessionServices, SessionTask};
use crate::sink::CredentialSink;
use cardsmith_core::{
    ApplicationId, Config, ConfigError, ErrorKind, EventSink, ProvisioningError, ReaderEvent,
    ReaderId,
};
use cardsmith_desfire::{AtrClassifier, CardClassifier, CardTransport, DesfireConnector};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

struct RegisteredReader {
    handle: ReaderHandle,
    task: SessionTask,
}

/// Builder for [`ReaderRegistry`].
pub struct RegistryBuilder {
    sink: Arc<dyn EventSink>,
    connector: Arc<dyn DesfireConnector>,
    classifier: Arc<dyn CardClassifier>,
    credentials: Option<Arc<dyn CredentialSink>>,
    config: Config,
}

impl RegistryBuilder {
    /// Replace the default ATR classifier.
    pub fn classifier(mut self, classifier: Arc<dyn CardClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Record every issued credential with `credentials`.
    pub fn credential_sink(mut self, credentials: Arc<dyn CredentialSink>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Build the registry, rejecting a configuration that cannot be laid
    /// out on a card before any card is touched.
    pub fn build(self) -> Result<ReaderRegistry, ConfigError> {
        self.config.validate()?;
        Ok(ReaderRegistry {
            services: Arc::new(SessionServices {
                sink: self.sink,
                classifier: self.classifier,
                connector: self.connector,
                credentials: self.credentials,
                config: self.config,
            }),
            readers: RwLock::new(HashMap::new()),
        })
    }
}

/// Every attached reader, keyed by its identity.
///
/// Signals and commands for different readers never wait on each other:
/// the map lock is held only to look a reader up, never across a card
/// exchange.
pub struct ReaderRegistry {
    services: Arc<SessionServices>,
    readers: RwLock<HashMap<ReaderId, RegisteredReader>>,
}

impl ReaderRegistry {
    pub fn builder(
        sink: Arc<dyn EventSink>,
        connector: Arc<dyn DesfireConnector>,
    ) -> RegistryBuilder {
        RegistryBuilder {
            sink,
            connector,
            classifier: Arc::new(AtrClassifier::default()),
            credentials: None,
            config: Config::default(),
        }
    }

    /// Start a session for a newly attached reader.
    pub async fn on_reader_attached(
        &self,
        reader: ReaderId,
    ) -> Result<ReaderHandle, ProvisioningError> {
        let mut readers = self.readers.write().await;
        if readers.contains_key(&reader) {
            warn!(reader = %reader, "Reader already attached");
            return Err(ProvisioningError::without_card(
                ErrorKind::ReaderAlreadyRegistered,
                reader,
                "reader is already attached",
            ));
        }

        let (handle, task) = session::spawn(reader.clone(), self.services.clone());
        readers.insert(
            reader.clone(),
            RegisteredReader {
                handle: handle.clone(),
                task,
            },
        );
        drop(readers);

        info!(reader = %reader, "Reader attached");
        self.services
            .sink
            .publish(ReaderEvent::ReaderAttached { reader });
        Ok(handle)
    }

    /// Stop a reader's session and forget it.
    ///
    /// A workflow still running on the reader fails with `ReaderDetached`
    /// before this returns.
    pub async fn on_reader_removed(&self, reader: &ReaderId) -> Result<(), ProvisioningError> {
        let entry = self.readers.write().await.remove(reader);
        let Some(entry) = entry else {
            return Err(self.unknown(reader));
        };

        entry.task.shutdown().await;
        info!(reader = %reader, "Reader removed");
        self.services.sink.publish(ReaderEvent::ReaderRemoved {
            reader: reader.clone(),
        });
        Ok(())
    }

    /// Handle of an attached reader.
    pub async fn reader(&self, reader: &ReaderId) -> Option<ReaderHandle> {
        self.readers
            .read()
            .await
            .get(reader)
            .map(|entry| entry.handle.clone())
    }

    pub async fn reader_ids(&self) -> Vec<ReaderId> {
        let mut ids: Vec<_> = self.readers.read().await.keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    pub async fn card_detected(
        &self,
        reader: &ReaderId,
        atr: Vec<u8>,
        transport: Arc<dyn CardTransport>,
    ) -> Result<(), ProvisioningError> {
        self.route(reader).await?.card_detected(atr, transport)
    }

    pub async fn card_removed(&self, reader: &ReaderId) -> Result<(), ProvisioningError> {
        self.route(reader).await?.card_removed()
    }

    pub async fn provision(
        &self,
        reader: &ReaderId,
        owner: Option<String>,
    ) -> Result<ProvisioningPayload, ProvisioningError> {
        self.route(reader).await?.provision(owner).await
    }

    pub async fn format(&self, reader: &ReaderId) -> Result<(), ProvisioningError> {
        self.route(reader).await?.format().await
    }

    pub async fn list_applications(
        &self,
        reader: &ReaderId,
    ) -> Result<Vec<ApplicationId>, ProvisioningError> {
        self.route(reader).await?.list_applications().await
    }

    /// Detach every reader.
    pub async fn shutdown(&self) {
        for reader in self.reader_ids().await {
            // A reader removed concurrently is already gone.
            let _ = self.on_reader_removed(&reader).await;
        }
    }

    async fn route(&self, reader: &ReaderId) -> Result<ReaderHandle, ProvisioningError> {
        match self.reader(reader).await {
            Some(handle) => Ok(handle),
            None => {
                let err = self.unknown(reader);
                self.services.sink.publish(err.clone().into());
                Err(err)
            }
        }
    }

    fn unknown(&self, reader: &ReaderId) -> ProvisioningError {
        warn!(reader = %reader, "Unknown reader");
        ProvisioningError::without_card(
            ErrorKind::UnknownReader,
            reader.clone(),
            "reader is not attached",
        )
    }
}
