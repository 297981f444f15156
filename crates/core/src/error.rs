//! Error taxonomy for reader and card operations.
//!
//! Every failure that leaves a workflow is classified into an [`ErrorKind`]
//! and carried as a [`ProvisioningError`], which is what `card-error` events
//! report to the presentation layer.

use crate::types::{CardUid, ReaderId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a card or reader failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Short or status-rejected response from the card
    TransportError,
    /// Authentication with a card key failed
    AuthenticationFailure,
    /// Secure UID read differs from the UID seen at tap time
    RandomizedIdentityMismatch,
    /// The freshly written key does not authenticate
    KeyRotationVerificationFailed,
    /// Data read back differs from what was written
    PayloadVerificationFailed,
    /// The present card is not a DESFire card
    UnsupportedCardKind,
    /// No card on the reader
    NoCardPresent,
    /// Another workflow is already running on this reader
    ConcurrentOperationRejected,
    /// The reader went away while the operation was pending
    ReaderDetached,
    /// No reader registered under the given identity
    UnknownReader,
    /// A reader with the same identity is already registered
    ReaderAlreadyRegistered,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A classified failure, attributed to a reader and (when known) a card.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} on reader {reader} (card {uid}): {message}")]
pub struct ProvisioningError {
    /// Failure classification
    pub kind: ErrorKind,
    /// Human-readable description
    pub message: String,
    /// Reader the failure happened on
    pub reader: ReaderId,
    /// Card identifier, empty when unavailable
    pub uid: CardUid,
}

impl ProvisioningError {
    /// Create an error for a specific card.
    pub fn new(
        kind: ErrorKind,
        reader: ReaderId,
        uid: CardUid,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            reader,
            uid,
        }
    }

    /// Create an error where no card identifier is available.
    pub fn without_card(kind: ErrorKind, reader: ReaderId, message: impl Into<String>) -> Self {
        Self::new(kind, reader, CardUid::empty(), message)
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML could not be parsed
    #[error("Configuration parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A value is out of range or inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
