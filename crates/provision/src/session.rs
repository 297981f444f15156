//! Per-reader session actor.
//!
//! Each attached reader runs one task that owns the reader's state and
//! processes card-presence signals and workflow runs one at a time, in
//! arrival order. Callers talk to it through a cloneable [`ReaderHandle`].
//!
//! # Presence
//!
//! ```text
//! Empty --card detected--> Present --card removed--> Empty --> ...
//! ```
//!
//! A tap always builds a new [`CardSession`]; removal discards it.
//!
//! # Single flight
//!
//! Workflow requests take the reader's workflow lock before they are queued.
//! If the lock is held the request is rejected on the spot with
//! `ConcurrentOperationRejected`; requests are never buffered behind a
//! running workflow.

use crate::card::{CardClass, CardSession, ProvisioningStatus};
use crate::payload::ProvisioningPayload;
use crate::sink::CredentialSink;
use crate::workflow::{self, CardContext, ProvisionOptions, WorkflowKind};
use cardsmith_core::{
    ApplicationId, CardKind, CardUid, Config, ErrorKind, EventSink, ProvisioningError, ReaderEvent,
    ReaderId,
};
use cardsmith_desfire::{apdu, CardClassifier, CardTransport, DesfireCommands, DesfireConnector};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Collaborators shared by every reader session.
pub struct SessionServices {
    pub sink: Arc<dyn EventSink>,
    pub classifier: Arc<dyn CardClassifier>,
    pub connector: Arc<dyn DesfireConnector>,
    pub credentials: Option<Arc<dyn CredentialSink>>,
    pub config: Config,
}

/// Whether a card is in the reader's field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Presence {
    Empty,
    Present,
}

/// Point-in-time view of a reader, readable without waiting on its task.
#[derive(Debug, Clone, Serialize)]
pub struct ReaderSnapshot {
    pub reader: ReaderId,
    pub presence: Presence,
    pub card: Option<CardSnapshot>,
    /// Workflow currently executing, if any
    pub active: Option<WorkflowKind>,
}

impl ReaderSnapshot {
    fn empty(reader: ReaderId) -> Self {
        Self {
            reader,
            presence: Presence::Empty,
            card: None,
            active: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CardSnapshot {
    pub uid: Option<CardUid>,
    pub kind: CardKind,
    pub status: ProvisioningStatus,
}

type Reply<T> = oneshot::Sender<Result<T, ProvisioningError>>;

enum WorkflowRequest {
    Provision {
        owner: Option<String>,
        reply: Reply<ProvisioningPayload>,
    },
    Format {
        reply: Reply<()>,
    },
    ListApplications {
        reply: Reply<Vec<ApplicationId>>,
    },
}

impl WorkflowRequest {
    fn kind(&self) -> WorkflowKind {
        match self {
            WorkflowRequest::Provision { .. } => WorkflowKind::Provision,
            WorkflowRequest::Format { .. } => WorkflowKind::Format,
            WorkflowRequest::ListApplications { .. } => WorkflowKind::ListApplications,
        }
    }

    fn reject(self, err: ProvisioningError) {
        match self {
            WorkflowRequest::Provision { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            WorkflowRequest::Format { reply } => {
                let _ = reply.send(Err(err));
            }
            WorkflowRequest::ListApplications { reply } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

enum SessionMessage {
    CardPresent {
        atr: Vec<u8>,
        transport: Arc<dyn CardTransport>,
    },
    CardRemoved,
    Run {
        request: WorkflowRequest,
        guard: OwnedMutexGuard<()>,
    },
}

/// Cloneable front end of a reader session.
#[derive(Clone)]
pub struct ReaderHandle {
    reader: ReaderId,
    tx: mpsc::UnboundedSender<SessionMessage>,
    workflow_lock: Arc<Mutex<()>>,
    snapshot: watch::Receiver<ReaderSnapshot>,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for ReaderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderHandle")
            .field("reader", &self.reader)
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl ReaderHandle {
    pub fn reader(&self) -> &ReaderId {
        &self.reader
    }

    /// Latest published state of the reader.
    pub fn snapshot(&self) -> ReaderSnapshot {
        self.snapshot.borrow().clone()
    }

    /// True while a workflow holds the reader.
    pub fn is_busy(&self) -> bool {
        self.workflow_lock.try_lock().is_err()
    }

    /// Signal from the transport driver: a card entered the field.
    pub fn card_detected(
        &self,
        atr: Vec<u8>,
        transport: Arc<dyn CardTransport>,
    ) -> Result<(), ProvisioningError> {
        self.send(SessionMessage::CardPresent { atr, transport })
    }

    /// Signal from the transport driver: the card left the field.
    pub fn card_removed(&self) -> Result<(), ProvisioningError> {
        self.send(SessionMessage::CardRemoved)
    }

    /// Provision the present card, optionally labelling it with `owner`.
    pub async fn provision(
        &self,
        owner: Option<String>,
    ) -> Result<ProvisioningPayload, ProvisioningError> {
        let (reply, rx) = oneshot::channel();
        self.run(WorkflowRequest::Provision { owner, reply }, rx).await
    }

    /// Erase every application on the present card.
    pub async fn format(&self) -> Result<(), ProvisioningError> {
        let (reply, rx) = oneshot::channel();
        self.run(WorkflowRequest::Format { reply }, rx).await
    }

    /// List the application identifiers on the present card.
    pub async fn list_applications(&self) -> Result<Vec<ApplicationId>, ProvisioningError> {
        let (reply, rx) = oneshot::channel();
        self.run(WorkflowRequest::ListApplications { reply }, rx)
            .await
    }

    async fn run<T>(
        &self,
        request: WorkflowRequest,
        rx: oneshot::Receiver<Result<T, ProvisioningError>>,
    ) -> Result<T, ProvisioningError> {
        let guard = match self.workflow_lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                let err = self.error(
                    ErrorKind::ConcurrentOperationRejected,
                    format!("{} rejected: another workflow is running", request.kind()),
                );
                self.sink.publish(err.clone().into());
                return Err(err);
            }
        };

        self.send(SessionMessage::Run { request, guard })?;

        rx.await.unwrap_or_else(|_| {
            Err(self.error(
                ErrorKind::ReaderDetached,
                "reader detached before the workflow finished",
            ))
        })
    }

    fn send(&self, message: SessionMessage) -> Result<(), ProvisioningError> {
        self.tx.send(message).map_err(|_| {
            let err = self.error(ErrorKind::ReaderDetached, "reader session has stopped");
            self.sink.publish(err.clone().into());
            err
        })
    }

    fn error(&self, kind: ErrorKind, message: impl Into<String>) -> ProvisioningError {
        let uid = self
            .snapshot
            .borrow()
            .card
            .as_ref()
            .and_then(|card| card.uid.clone())
            .unwrap_or_default();
        ProvisioningError::new(kind, self.reader.clone(), uid, message)
    }
}

/// Owner-side control of a running session.
pub(crate) struct SessionTask {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl SessionTask {
    /// Stop the session, failing an in-flight workflow with `ReaderDetached`.
    pub(crate) async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.join.await {
            warn!(error = %e, "Reader session task ended abnormally");
        }
    }
}

/// Start the session task for `reader`.
pub(crate) fn spawn(reader: ReaderId, services: Arc<SessionServices>) -> (ReaderHandle, SessionTask) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(ReaderSnapshot::empty(reader.clone()));

    let handle = ReaderHandle {
        reader: reader.clone(),
        tx,
        workflow_lock: Arc::new(Mutex::new(())),
        snapshot: snapshot_rx,
        sink: services.sink.clone(),
    };
    let session = ReaderSession {
        reader,
        services,
        presence: Presence::Empty,
        card: None,
        active: None,
        snapshot_tx,
    };
    let join = tokio::spawn(session.run(rx, shutdown_rx));

    (
        handle,
        SessionTask {
            shutdown: shutdown_tx,
            join,
        },
    )
}

/// In-flight workflow, recorded so a detach can report it.
struct ActiveWorkflow {
    kind: WorkflowKind,
    uid: CardUid,
}

/// Finished workflow waiting to be handed back to its caller.
enum Completion {
    Provision(Reply<ProvisioningPayload>, Result<ProvisioningPayload, ProvisioningError>),
    Format(Reply<()>, Result<(), ProvisioningError>),
    ListApplications(Reply<Vec<ApplicationId>>, Result<Vec<ApplicationId>, ProvisioningError>),
}

impl Completion {
    fn deliver(self) {
        // A caller that stopped waiting is not an error.
        match self {
            Completion::Provision(reply, result) => {
                let _ = reply.send(result);
            }
            Completion::Format(reply, result) => {
                let _ = reply.send(result);
            }
            Completion::ListApplications(reply, result) => {
                let _ = reply.send(result);
            }
        }
    }
}

struct ReaderSession {
    reader: ReaderId,
    services: Arc<SessionServices>,
    presence: Presence,
    card: Option<CardSession>,
    active: Option<ActiveWorkflow>,
    snapshot_tx: watch::Sender<ReaderSnapshot>,
}

impl ReaderSession {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<SessionMessage>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        info!(reader = %self.reader, "Reader session started");

        loop {
            let message = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let completed = tokio::select! {
                biased;
                _ = &mut shutdown => false,
                _ = self.handle(message) => true,
            };
            if !completed {
                self.abort_active();
                break;
            }
        }

        // Requests that never started fail the same way an aborted one does.
        rx.close();
        while let Ok(message) = rx.try_recv() {
            if let SessionMessage::Run { request, guard } = message {
                drop(guard);
                let err = self.error(ErrorKind::ReaderDetached, "reader detached");
                self.services.sink.publish(err.clone().into());
                request.reject(err);
            }
        }

        self.card = None;
        self.presence = Presence::Empty;
        self.publish_snapshot();
        info!(reader = %self.reader, "Reader session stopped");
    }

    async fn handle(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::CardPresent { atr, transport } => {
                self.on_card_present(atr, transport).await
            }
            SessionMessage::CardRemoved => self.on_card_removed(),
            SessionMessage::Run { request, guard } => self.run_workflow(request, guard).await,
        }
    }

    async fn on_card_present(&mut self, atr: Vec<u8>, transport: Arc<dyn CardTransport>) {
        if self.card.take().is_some() {
            debug!(reader = %self.reader, "New tap replaces the previous card session");
        }
        self.presence = Presence::Present;

        let kind = self.services.classifier.classify(&atr);
        let uid = apdu::read_uid(transport.as_ref()).await;

        let card = match (kind, uid) {
            (CardKind::Desfire, Ok(uid)) => {
                let commands = self.services.connector.connect(transport);
                CardSession::new(self.reader.clone(), uid, atr, CardClass::Desfire(commands))
            }
            (CardKind::Desfire, Err(e)) => {
                // Without its UID a DESFire card cannot be bound to a record.
                self.card = Some(CardSession::new(
                    self.reader.clone(),
                    CardUid::empty(),
                    atr,
                    CardClass::Unclassified,
                ));
                self.publish_snapshot();
                let err = ProvisioningError::without_card(
                    ErrorKind::TransportError,
                    self.reader.clone(),
                    format!("reading DESFire card identifier failed: {e}"),
                );
                self.services.sink.publish(err.into());
                return;
            }
            (_, uid) => {
                let uid = uid.unwrap_or_else(|e| {
                    debug!(reader = %self.reader, error = %e, "Card identifier unavailable");
                    CardUid::empty()
                });
                CardSession::new(self.reader.clone(), uid, atr, CardClass::Other(transport))
            }
        };

        info!(reader = %self.reader, kind = %card.kind(), uid = %card.uid(), "Card attached");
        let event = ReaderEvent::CardAttached {
            reader: self.reader.clone(),
            kind: card.kind(),
            uid: card.reported_uid(),
        };
        self.card = Some(card);
        self.publish_snapshot();
        self.services.sink.publish(event);
    }

    fn on_card_removed(&mut self) {
        self.card = None;
        if self.presence == Presence::Empty {
            debug!(reader = %self.reader, "Removal signal with no card present");
            return;
        }
        self.presence = Presence::Empty;
        self.publish_snapshot();
        info!(reader = %self.reader, "Card removed");
        self.services.sink.publish(ReaderEvent::CardRemoved {
            reader: self.reader.clone(),
        });
    }

    /// Card a workflow may run against, or why none may.
    fn workflow_target(&self) -> Result<(CardUid, Arc<dyn DesfireCommands>), ProvisioningError> {
        let card = self.card.as_ref().ok_or_else(|| {
            ProvisioningError::without_card(
                ErrorKind::NoCardPresent,
                self.reader.clone(),
                "no card present",
            )
        })?;
        match card.class() {
            CardClass::Desfire(commands) => Ok((card.uid().clone(), commands.clone())),
            other => Err(ProvisioningError::new(
                ErrorKind::UnsupportedCardKind,
                self.reader.clone(),
                card.uid().clone(),
                format!("{} card does not support this operation", other.kind()),
            )),
        }
    }

    async fn run_workflow(&mut self, request: WorkflowRequest, guard: OwnedMutexGuard<()>) {
        let (uid, commands) = match self.workflow_target() {
            Ok(target) => target,
            Err(err) => {
                drop(guard);
                self.services.sink.publish(err.clone().into());
                request.reject(err);
                return;
            }
        };

        let kind = request.kind();
        info!(reader = %self.reader, uid = %uid, workflow = %kind, "Workflow started");
        self.active = Some(ActiveWorkflow {
            kind,
            uid: uid.clone(),
        });
        if kind == WorkflowKind::Provision {
            self.set_status(ProvisioningStatus::InProgress);
        }
        self.publish_snapshot();

        let reader = self.reader.clone();
        let services = self.services.clone();
        let ctx = CardContext::new(&reader, &uid, commands.as_ref());
        let sink = services.sink.as_ref();

        let completion = match request {
            WorkflowRequest::Provision { owner, reply } => {
                let options = ProvisionOptions {
                    config: &services.config,
                    owner: owner.as_deref(),
                    credentials: services.credentials.as_deref(),
                };
                let result = workflow::provision(&ctx, sink, &options).await;
                self.set_status(match &result {
                    Ok(payload) => ProvisioningStatus::Succeeded(payload.clone()),
                    Err(err) => ProvisioningStatus::Failed(err.clone()),
                });
                Completion::Provision(reply, result)
            }
            WorkflowRequest::Format { reply } => {
                Completion::Format(reply, workflow::format(&ctx, sink).await)
            }
            WorkflowRequest::ListApplications { reply } => Completion::ListApplications(
                reply,
                workflow::list_applications(&ctx, sink).await,
            ),
        };

        // State and lock are settled before the caller sees the result.
        self.active = None;
        self.publish_snapshot();
        drop(guard);
        debug!(reader = %self.reader, workflow = %kind, "Workflow finished");
        completion.deliver();
    }

    /// Report the workflow cut short by a detach.
    fn abort_active(&mut self) {
        if let Some(active) = self.active.take() {
            warn!(reader = %self.reader, workflow = %active.kind, "Reader detached mid-workflow");
            let err = ProvisioningError::new(
                ErrorKind::ReaderDetached,
                self.reader.clone(),
                active.uid,
                format!("reader detached during {}", active.kind),
            );
            if active.kind == WorkflowKind::Provision {
                self.set_status(ProvisioningStatus::Failed(err.clone()));
            }
            self.services.sink.publish(err.into());
        }
    }

    fn set_status(&mut self, status: ProvisioningStatus) {
        if let Some(card) = self.card.as_mut() {
            card.set_status(status);
        }
    }

    fn error(&self, kind: ErrorKind, message: &str) -> ProvisioningError {
        let uid = self
            .card
            .as_ref()
            .map(|card| card.uid().clone())
            .unwrap_or_default();
        ProvisioningError::new(kind, self.reader.clone(), uid, message)
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(ReaderSnapshot {
            reader: self.reader.clone(),
            presence: self.presence,
            card: self.card.as_ref().map(|card| CardSnapshot {
                uid: card.reported_uid(),
                kind: card.kind(),
                status: card.status().clone(),
            }),
            active: self.active.as_ref().map(|active| active.kind),
        });
    }
}
