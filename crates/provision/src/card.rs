//! One physical tap of a card on a reader.

use crate::payload::ProvisioningPayload;
use cardsmith_core::{CardKind, CardUid, ProvisioningError, ReaderId};
use cardsmith_desfire::{CardTransport, DesfireCommands};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Classification of a tapped card and the capability attached to it.
///
/// Workflows dispatch on this tag; only `Desfire` carries a command set.
#[derive(Clone)]
pub enum CardClass {
    /// Present, but no usable capability attached
    Unclassified,
    /// DESFire card with its command set
    Desfire(Arc<dyn DesfireCommands>),
    /// Any other card, reachable through its raw transport only
    Other(Arc<dyn CardTransport>),
}

impl CardClass {
    pub fn kind(&self) -> CardKind {
        match self {
            CardClass::Unclassified => CardKind::Unclassified,
            CardClass::Desfire(_) => CardKind::Desfire,
            CardClass::Other(_) => CardKind::Other,
        }
    }
}

impl fmt::Debug for CardClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CardClass::{:?}", self.kind())
    }
}

/// Provisioning state of the card currently on a reader.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "detail")]
pub enum ProvisioningStatus {
    #[default]
    None,
    InProgress,
    Succeeded(ProvisioningPayload),
    Failed(ProvisioningError),
}

/// A card as captured at tap time.
///
/// Identifier and classification never change; a new tap always builds a
/// new session.
#[derive(Debug)]
pub struct CardSession {
    reader: ReaderId,
    uid: CardUid,
    atr: Vec<u8>,
    class: CardClass,
    status: ProvisioningStatus,
}

impl CardSession {
    pub fn new(reader: ReaderId, uid: CardUid, atr: Vec<u8>, class: CardClass) -> Self {
        Self {
            reader,
            uid,
            atr,
            class,
            status: ProvisioningStatus::None,
        }
    }

    /// Reader the card was tapped on.
    pub fn reader(&self) -> &ReaderId {
        &self.reader
    }

    /// Identifier read at tap time; empty if it could not be read.
    pub fn uid(&self) -> &CardUid {
        &self.uid
    }

    pub fn atr(&self) -> &[u8] {
        &self.atr
    }

    pub fn class(&self) -> &CardClass {
        &self.class
    }

    pub fn kind(&self) -> CardKind {
        self.class.kind()
    }

    pub fn status(&self) -> &ProvisioningStatus {
        &self.status
    }

    pub(crate) fn set_status(&mut self, status: ProvisioningStatus) {
        self.status = status;
    }

    /// Identifier for events: `None` when it was not read.
    pub fn reported_uid(&self) -> Option<CardUid> {
        (!self.uid.is_empty()).then(|| self.uid.clone())
    }
}
