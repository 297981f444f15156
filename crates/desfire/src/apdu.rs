//! APDU (Application Protocol Data Unit) command handling

use crate::transport::{CardTransport, TransportError};
use cardsmith_core::CardUid;
use tracing::trace;

/// Status word of a successful command.
pub const SW_SUCCESS: u16 = 0x9000;

/// Largest data field a short APDU can carry.
pub const MAX_SHORT_DATA: usize = 255;

/// APDU response containing data and status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    /// Response data (without status word)
    pub data: Vec<u8>,
    /// Status word SW1
    pub sw1: u8,
    /// Status word SW2
    pub sw2: u8,
}

impl ApduResponse {
    /// Split a raw response into data and status word.
    pub fn parse(raw: &[u8]) -> Result<Self, TransportError> {
        if raw.len() < 2 {
            return Err(TransportError::ShortResponse { len: raw.len() });
        }

        let sw1 = raw[raw.len() - 2];
        let sw2 = raw[raw.len() - 1];
        let data = raw[..raw.len() - 2].to_vec();

        Ok(Self { data, sw1, sw2 })
    }

    /// Check if the response indicates success (9000)
    pub fn is_success(&self) -> bool {
        self.status_word() == SW_SUCCESS
    }

    /// Get the full status word as a 16-bit value
    pub fn status_word(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Data of a successful response, or the status as an error.
    pub fn into_data(self) -> Result<Vec<u8>, TransportError> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(TransportError::Status {
                sw: self.status_word(),
            })
        }
    }
}

/// APDU command builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
    le: Option<u8>,
}

impl ApduCommand {
    /// Create a new APDU command
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    /// Set command data
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Set expected response length
    pub fn le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Build the APDU command bytes.
    ///
    /// Only short APDUs are produced; data longer than [`MAX_SHORT_DATA`]
    /// is rejected rather than given a truncated Lc.
    pub fn build(&self) -> Result<Vec<u8>, TransportError> {
        let mut apdu = vec![self.cla, self.ins, self.p1, self.p2];

        if !self.data.is_empty() {
            let lc = u8::try_from(self.data.len()).map_err(|_| TransportError::CommandTooLong {
                len: self.data.len(),
            })?;
            apdu.push(lc);
            apdu.extend_from_slice(&self.data);
        }

        if let Some(le) = self.le {
            apdu.push(le);
        }

        Ok(apdu)
    }

    /// Send this command and parse the response.
    pub async fn send(&self, transport: &dyn CardTransport) -> Result<ApduResponse, TransportError> {
        let apdu = self.build()?;
        trace!(apdu = %hex::encode(&apdu), "Sending APDU");
        let raw = transport.transmit(&apdu).await?;
        let response = ApduResponse::parse(&raw)?;
        trace!(sw = %format!("{:04X}", response.status_word()), "APDU response");
        Ok(response)
    }
}

/// Reader-level (PC/SC pseudo-APDU) commands
pub mod commands {
    use super::ApduCommand;

    /// GET DATA for the card UID, answered by the reader itself
    pub fn get_uid() -> ApduCommand {
        ApduCommand::new(0xFF, 0xCA, 0x00, 0x00).le(0x00)
    }
}

/// Read the identifier of the card in the field.
///
/// Works for any card type; an empty identifier is treated as malformed.
pub async fn read_uid(transport: &dyn CardTransport) -> Result<CardUid, TransportError> {
    let data = commands::get_uid().send(transport).await?.into_data()?;
    if data.is_empty() {
        return Err(TransportError::ShortResponse { len: 2 });
    }
    Ok(CardUid::new(data))
}
