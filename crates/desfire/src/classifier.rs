//! Card classification from the answer-to-reset.

use cardsmith_core::CardKind;

/// Maps ATR bytes to a card kind. Implementations must be pure.
pub trait CardClassifier: Send + Sync {
    /// Classify a card by its ATR. Never returns [`CardKind::Unclassified`].
    fn classify(&self, atr: &[u8]) -> CardKind;
}

impl<F> CardClassifier for F
where
    F: Fn(&[u8]) -> CardKind + Send + Sync,
{
    fn classify(&self, atr: &[u8]) -> CardKind {
        self(atr)
    }
}

/// ATRs PC/SC contactless readers synthesize for DESFire cards.
pub const DESFIRE_ATRS: &[&[u8]] = &[
    // ISO 14443-4 type A, historical byte 0x80 (DESFire EV1 and later)
    &[0x3B, 0x81, 0x80, 0x01, 0x80, 0x80],
    // DESFire EV1 with full historical bytes
    &[
        0x3B, 0x86, 0x80, 0x01, 0x06, 0x75, 0x77, 0x81, 0x02, 0x80, 0x00,
    ],
];

/// Exact-match classifier over a table of known DESFire ATRs.
#[derive(Debug, Clone)]
pub struct AtrClassifier {
    desfire_atrs: Vec<Vec<u8>>,
}

impl AtrClassifier {
    /// Classifier recognising [`DESFIRE_ATRS`].
    pub fn new() -> Self {
        Self {
            desfire_atrs: DESFIRE_ATRS.iter().map(|atr| atr.to_vec()).collect(),
        }
    }

    /// Also treat `atr` as DESFire.
    pub fn with_desfire_atr(mut self, atr: impl Into<Vec<u8>>) -> Self {
        self.desfire_atrs.push(atr.into());
        self
    }
}

impl Default for AtrClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CardClassifier for AtrClassifier {
    fn classify(&self, atr: &[u8]) -> CardKind {
        if self.desfire_atrs.iter().any(|known| known.as_slice() == atr) {
            CardKind::Desfire
        } else {
            CardKind::Other
        }
    }
}
