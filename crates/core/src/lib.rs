//! Shared foundation for the cardsmith card issuing system.
//!
//! Provides the identity types, error taxonomy, event model and
//! configuration used by the transport, DESFire and provisioning crates.
//!
//! # Core Concepts
//!
//! - **Reader identity**: the stable name a reader is addressed by
//! - **Card identity**: the UID captured when a card is tapped
//! - **Events**: typed status transitions published to an [`EventSink`]
//! - **Errors**: every workflow failure is classified into an [`ErrorKind`]

pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod types;

pub use config::{ApplicationConfig, Config, EventsConfig, OwnerFileConfig};
pub use error::{ConfigError, ErrorKind, ProvisioningError};
pub use event::{EventBus, EventSeverity, EventSink, ReaderEvent};
pub use types::{ApplicationId, CardKind, CardUid, ReaderId};
