//! Card workflows: provision, format and application listing.
//!
//! Workflows are stateless procedures over a [`CardContext`]. Each runs its
//! steps strictly in order, stops at the first failure, classifies that
//! failure into the step's [`ErrorKind`], and publishes exactly one terminal
//! event. Nothing is retried and nothing already written to the card is
//! rolled back.

mod format;
mod list;
mod provision;

pub use format::format;
pub use list::list_applications;
pub use provision::{provision, ProvisionOptions, OWNER_FIELD_LEN};

use cardsmith_core::{ApplicationId, CardUid, ErrorKind, ProvisioningError, ReaderId};
use cardsmith_desfire::{CommandResult, DesfireCommands, DEFAULT_LEGACY_KEY};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use tracing::{debug, warn};

/// Workflow selector, as accepted by a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkflowKind {
    Provision,
    Format,
    ListApplications,
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowKind::Provision => "provision",
            WorkflowKind::Format => "format",
            WorkflowKind::ListApplications => "list-applications",
        };
        f.write_str(name)
    }
}

/// The card a workflow runs against.
pub struct CardContext<'a> {
    pub reader: &'a ReaderId,
    /// Identifier captured when the card was tapped
    pub uid: &'a CardUid,
    pub commands: &'a dyn DesfireCommands,
}

impl<'a> CardContext<'a> {
    pub fn new(reader: &'a ReaderId, uid: &'a CardUid, commands: &'a dyn DesfireCommands) -> Self {
        Self {
            reader,
            uid,
            commands,
        }
    }

    /// Build an error attributed to this card.
    pub fn error(&self, kind: ErrorKind, message: impl Into<String>) -> ProvisioningError {
        ProvisioningError::new(kind, self.reader.clone(), self.uid.clone(), message)
    }

    /// Await one card command, classifying its failure as `kind`.
    pub(crate) async fn step<T, F>(
        &self,
        step: &'static str,
        kind: ErrorKind,
        command: F,
    ) -> Result<T, ProvisioningError>
    where
        F: Future<Output = CommandResult<T>>,
    {
        debug!(reader = %self.reader, uid = %self.uid, step, "Running step");
        command.await.map_err(|e| {
            warn!(reader = %self.reader, uid = %self.uid, step, error = %e, "Step failed");
            self.error(kind, format!("{step}: {e}"))
        })
    }

    /// Select the PICC and authenticate with the factory legacy key.
    pub(crate) async fn open_picc(&self) -> Result<(), ProvisioningError> {
        self.step(
            "select-picc",
            ErrorKind::TransportError,
            self.commands.select_application(ApplicationId::PICC),
        )
        .await?;
        self.step(
            "authenticate-picc",
            ErrorKind::AuthenticationFailure,
            self.commands.authenticate_legacy(0, &DEFAULT_LEGACY_KEY),
        )
        .await
    }

    /// Erase every application. Irreversible.
    pub(crate) async fn erase(&self) -> Result<(), ProvisioningError> {
        self.step(
            "format-picc",
            ErrorKind::TransportError,
            self.commands.format_picc(),
        )
        .await
    }
}
