//! Reader and card events consumed by the presentation layer.
//!
//! Components publish [`ReaderEvent`]s into an [`EventSink`]. The serialized
//! `type` tag of each event is the channel name the presentation layer
//! listens on (`reader-attached`, `card-error`, ...). Every event carries the
//! reader identity it concerns.

use crate::config::EventsConfig;
use crate::error::{ErrorKind, ProvisioningError};
use crate::types::{ApplicationId, CardKind, CardUid, ReaderId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Severity level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Informational event
    Info,
    /// Warning condition
    Warning,
    /// Error condition
    Error,
}

/// Status transition published by readers and workflows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReaderEvent {
    /// A reader was registered
    #[serde(rename = "reader-attached")]
    ReaderAttached {
        /// Reader identity
        reader: ReaderId,
    },

    /// A reader was torn down
    #[serde(rename = "reader-removed")]
    ReaderRemoved {
        /// Reader identity
        reader: ReaderId,
    },

    /// A card was tapped and classified
    #[serde(rename = "card-attached")]
    CardAttached {
        /// Reader identity
        reader: ReaderId,
        /// Classification
        kind: CardKind,
        /// Identifier, absent when it could not be read
        uid: Option<CardUid>,
    },

    /// The card left the reader field
    #[serde(rename = "card-removed")]
    CardRemoved {
        /// Reader identity
        reader: ReaderId,
    },

    /// Provisioning workflow began
    #[serde(rename = "provisioning-started")]
    ProvisioningStarted {
        /// Reader identity
        reader: ReaderId,
        /// Card being provisioned
        uid: CardUid,
    },

    /// Provisioning completed and every verification passed
    #[serde(rename = "provisioning-succeeded")]
    ProvisioningSucceeded {
        /// Reader identity
        reader: ReaderId,
        /// Provisioned card
        uid: CardUid,
        /// hex(key) ++ hex(secret), 64 characters
        payload: String,
        /// Owner label written to the card, if any
        owner: Option<String>,
    },

    /// Format workflow began
    #[serde(rename = "formatting-started")]
    FormattingStarted {
        /// Reader identity
        reader: ReaderId,
        /// Card being formatted
        uid: CardUid,
    },

    /// Format workflow completed
    #[serde(rename = "formatting-succeeded")]
    FormattingSucceeded {
        /// Reader identity
        reader: ReaderId,
        /// Formatted card
        uid: CardUid,
    },

    /// Application identifiers enumerated from the card
    #[serde(rename = "applications-listed")]
    ApplicationsListed {
        /// Reader identity
        reader: ReaderId,
        /// Card that was enumerated
        uid: CardUid,
        /// Application identifiers, verbatim
        applications: Vec<ApplicationId>,
    },

    /// A workflow, command or attachment failed
    #[serde(rename = "card-error")]
    CardError {
        /// Reader identity
        reader: ReaderId,
        /// Card identifier, empty when unavailable
        uid: CardUid,
        /// Failure classification
        kind: ErrorKind,
        /// Human-readable description
        message: String,
    },
}

impl ReaderEvent {
    /// Reader the event concerns.
    pub fn reader(&self) -> &ReaderId {
        match self {
            ReaderEvent::ReaderAttached { reader }
            | ReaderEvent::ReaderRemoved { reader }
            | ReaderEvent::CardAttached { reader, .. }
            | ReaderEvent::CardRemoved { reader }
            | ReaderEvent::ProvisioningStarted { reader, .. }
            | ReaderEvent::ProvisioningSucceeded { reader, .. }
            | ReaderEvent::FormattingStarted { reader, .. }
            | ReaderEvent::FormattingSucceeded { reader, .. }
            | ReaderEvent::ApplicationsListed { reader, .. }
            | ReaderEvent::CardError { reader, .. } => reader,
        }
    }

    /// Channel name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            ReaderEvent::ReaderAttached { .. } => "reader-attached",
            ReaderEvent::ReaderRemoved { .. } => "reader-removed",
            ReaderEvent::CardAttached { .. } => "card-attached",
            ReaderEvent::CardRemoved { .. } => "card-removed",
            ReaderEvent::ProvisioningStarted { .. } => "provisioning-started",
            ReaderEvent::ProvisioningSucceeded { .. } => "provisioning-succeeded",
            ReaderEvent::FormattingStarted { .. } => "formatting-started",
            ReaderEvent::FormattingSucceeded { .. } => "formatting-succeeded",
            ReaderEvent::ApplicationsListed { .. } => "applications-listed",
            ReaderEvent::CardError { .. } => "card-error",
        }
    }

    /// Severity used when the event is logged.
    pub fn severity(&self) -> EventSeverity {
        match self {
            ReaderEvent::CardError { .. } => EventSeverity::Error,
            ReaderEvent::ReaderRemoved { .. } => EventSeverity::Warning,
            _ => EventSeverity::Info,
        }
    }
}

impl From<ProvisioningError> for ReaderEvent {
    fn from(err: ProvisioningError) -> Self {
        ReaderEvent::CardError {
            reader: err.reader,
            uid: err.uid,
            kind: err.kind,
            message: err.message,
        }
    }
}

/// Output channel for status transitions.
pub trait EventSink: Send + Sync {
    /// Publish an event. Delivery failures are the sink's concern.
    fn publish(&self, event: ReaderEvent);
}

/// Broadcast-backed event sink.
///
/// Any number of consumers may [`subscribe`](EventBus::subscribe); publishing
/// while nobody listens is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ReaderEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Create a bus sized by the `[events]` configuration section.
    pub fn from_config(config: &EventsConfig) -> Self {
        Self::new(config.capacity)
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ReaderEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: ReaderEvent) {
        match event.severity() {
            EventSeverity::Info => {
                info!(reader = %event.reader(), event = event.name(), "Reader event")
            }
            EventSeverity::Warning | EventSeverity::Error => {
                warn!(reader = %event.reader(), event = event.name(), ?event, "Reader event")
            }
        }
        // No receivers is fine: the presentation layer may not be attached yet.
        let _ = self.tx.send(event);
    }
}
