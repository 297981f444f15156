//! DESFire command-set contract.
//!
//! Command encoding, the authentication handshakes and secure messaging
//! live in the protocol library that implements [`DesfireCommands`]. This
//! crate only fixes the operations the issuing workflows need and the errors
//! they can observe.

use crate::settings::{AesKey, KeySettings, KeyType, StandardFile};
use crate::transport::{CardTransport, TransportError};
use async_trait::async_trait;
use cardsmith_core::ApplicationId;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by DESFire commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The exchange itself failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Card answered with a DESFire status other than OPERATION_OK
    #[error("DESFire status {0:#04x}")]
    Status(u8),

    /// Authentication handshake rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Response could not be decoded (bad MAC, padding, length)
    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Result type for DESFire commands.
pub type CommandResult<T> = Result<T, CommandError>;

/// Operations of the DESFire command set used by the issuing workflows.
#[async_trait]
pub trait DesfireCommands: Send + Sync {
    /// Select an application, [`ApplicationId::PICC`] for card level.
    async fn select_application(&self, aid: ApplicationId) -> CommandResult<()>;

    /// Legacy (D40/DES) authentication.
    async fn authenticate_legacy(&self, key_no: u8, key: &[u8; 8]) -> CommandResult<()>;

    /// AES authentication.
    async fn authenticate_aes(&self, key_no: u8, key: &AesKey) -> CommandResult<()>;

    /// Erase every application on the card. Requires PICC authentication.
    async fn format_picc(&self) -> CommandResult<()>;

    /// Real UID read over the authenticated session.
    async fn get_card_uid(&self) -> CommandResult<Vec<u8>>;

    async fn create_application(
        &self,
        aid: ApplicationId,
        settings: KeySettings,
        key_count: u8,
        key_type: KeyType,
    ) -> CommandResult<()>;

    /// Change an AES key of the selected application.
    async fn change_key_aes(
        &self,
        key_no: u8,
        key_version: u8,
        new_key: &AesKey,
        old_key: &AesKey,
    ) -> CommandResult<()>;

    async fn create_standard_data_file(&self, file: StandardFile) -> CommandResult<()>;

    async fn write_data_encrypted(&self, file_id: u8, offset: u32, data: &[u8])
        -> CommandResult<()>;

    async fn read_data_encrypted(&self, file_id: u8, offset: u32, len: u32)
        -> CommandResult<Vec<u8>>;

    async fn get_application_ids(&self) -> CommandResult<Vec<ApplicationId>>;
}

/// Opens the DESFire command set on a card transport.
///
/// Only cards classified as DESFire get a command set attached.
pub trait DesfireConnector: Send + Sync {
    fn connect(&self, transport: Arc<dyn CardTransport>) -> Arc<dyn DesfireCommands>;
}

impl<F> DesfireConnector for F
where
    F: Fn(Arc<dyn CardTransport>) -> Arc<dyn DesfireCommands> + Send + Sync,
{
    fn connect(&self, transport: Arc<dyn CardTransport>) -> Arc<dyn DesfireCommands> {
        self(transport)
    }
}
