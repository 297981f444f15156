//! Identity types shared by readers, cards and events.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Stable identity of a physical reader (the PC/SC reader name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReaderId(String);

impl ReaderId {
    /// Create a reader identity from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the reader name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReaderId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ReaderId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Card identifier (UID) as returned by the card.
///
/// Displayed and serialized as lowercase hex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CardUid(Vec<u8>);

impl CardUid {
    /// Wrap raw identifier bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// An empty identifier, used when none could be read.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// True when no identifier is available.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for CardUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for CardUid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CardUid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s)
            .map(CardUid)
            .map_err(serde::de::Error::custom)
    }
}

/// 24-bit DESFire application identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ApplicationId(u32);

impl ApplicationId {
    /// The card-level (PICC) application.
    pub const PICC: ApplicationId = ApplicationId(0);

    /// Largest value representable in the three AID bytes.
    pub const MAX: u32 = 0x00FF_FFFF;

    /// Create an application identifier, rejecting values wider than 24 bits.
    pub fn new(aid: u32) -> Option<Self> {
        (aid <= Self::MAX).then_some(Self(aid))
    }

    /// Numeric value.
    pub fn value(self) -> u32 {
        self.0
    }

    /// Little-endian wire encoding used by DESFire commands.
    pub fn to_le_bytes(self) -> [u8; 3] {
        let b = self.0.to_le_bytes();
        [b[0], b[1], b[2]]
    }

    /// Decode the three little-endian AID bytes.
    pub fn from_le_bytes(bytes: [u8; 3]) -> Self {
        Self(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]))
    }

    /// True for the card-level application.
    pub fn is_picc(self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<u32> for ApplicationId {
    type Error = String;

    fn try_from(aid: u32) -> Result<Self, Self::Error> {
        ApplicationId::new(aid).ok_or_else(|| format!("application id {aid:#x} exceeds 24 bits"))
    }
}

impl From<ApplicationId> for u32 {
    fn from(aid: ApplicationId) -> Self {
        aid.0
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

/// Card classification tag as seen by event consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardKind {
    /// Present but not usable for workflows
    Unclassified,
    /// MIFARE DESFire compatible card
    Desfire,
    /// Any other card
    Other,
}

impl fmt::Display for CardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CardKind::Unclassified => "unclassified",
            CardKind::Desfire => "desfire",
            CardKind::Other => "other",
        };
        f.write_str(name)
    }
}
