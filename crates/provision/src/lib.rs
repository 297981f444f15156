//! Reader lifecycle and DESFire card issuing.
//!
//! A [`ReaderRegistry`] owns one session per attached reader. Transport
//! drivers feed it card-presence signals, and operators ask it to run one
//! of three workflows against the card on a given reader:
//!
//! - provision: format the card, install an application with a fresh
//!   random AES key and store a fresh random secret, verifying both
//! - format: erase every application on the card
//! - list applications: enumerate the application identifiers
//!
//! Every state change is published as a [`ReaderEvent`](cardsmith_core::ReaderEvent)
//! on the configured [`EventSink`](cardsmith_core::EventSink).

pub mod card;
pub mod payload;
pub mod registry;
pub mod session;
pub mod sink;
pub mod workflow;

pub use card::{CardClass, CardSession, ProvisioningStatus};
pub use payload::{ProvisioningPayload, MATERIAL_LEN, PAYLOAD_HEX_LEN};
pub use registry::{ReaderRegistry, RegistryBuilder};
pub use session::{CardSnapshot, Presence, ReaderHandle, ReaderSnapshot, SessionServices};
pub use sink::CredentialSink;
pub use workflow::{CardContext, ProvisionOptions, WorkflowKind};
