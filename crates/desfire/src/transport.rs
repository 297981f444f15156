//! Transport driver contract.
//!
//! A transport moves raw command bytes to the card currently in a reader's
//! field and returns the raw response, status word included. Framing and the
//! physical link are the driver's business.

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a transport exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Response too short to carry a status word or the expected data
    #[error("Response too short ({len} bytes)")]
    ShortResponse {
        /// Length actually received
        len: usize,
    },

    /// Card answered with a non-success status word
    #[error("Card returned status {sw:04X}")]
    Status {
        /// SW1SW2
        sw: u16,
    },

    /// Command data does not fit a short APDU
    #[error("Command data too long ({len} bytes, at most 255)")]
    CommandTooLong {
        /// Length of the rejected data field
        len: usize,
    },

    /// Card left the field
    #[error("Card removed")]
    CardRemoved,

    /// Driver-level failure
    #[error("Transport I/O error: {0}")]
    Io(String),
}

/// Raw command/response exchange with one card.
#[async_trait]
pub trait CardTransport: Send + Sync {
    /// Send `command` and wait for the card's response.
    async fn transmit(&self, command: &[u8]) -> Result<Vec<u8>, TransportError>;
}
