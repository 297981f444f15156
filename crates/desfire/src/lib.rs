//! Card-side contracts for cardsmith.
//!
//! This crate provides the seams between the issuing logic and the outside
//! world: the raw transport to a card, the generic APDU layer used for
//! identifier reads, ATR classification, and the DESFire command set.

pub mod apdu;
pub mod classifier;
pub mod commands;
pub mod settings;
pub mod transport;

pub use apdu::{read_uid, ApduCommand, ApduResponse, MAX_SHORT_DATA};
pub use classifier::{AtrClassifier, CardClassifier};
pub use commands::{CommandError, CommandResult, DesfireCommands, DesfireConnector};
pub use settings::{
    AesKey, CommMode, FileAccess, KeySettings, KeyType, StandardFile, DEFAULT_AES_KEY,
    DEFAULT_LEGACY_KEY,
};
pub use transport::{CardTransport, TransportError};
