//! Transaction-phase notifications.
//!
//! Events are queued on the context that produced them and handed to
//! listeners when the context crosses a phase boundary. Dispatch is
//! synchronous and in registration order; only `BeforeCommit` listeners
//! can veto a commit.

use crate::errors::VersaResult;
use crate::store::RecordId;
use chrono::{DateTime, Utc};
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Phase boundaries at which queued events are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionPhase {
    /// Before the writes become visible. A listener error forces rollback.
    BeforeCommit,
    /// After the writes became visible. Listener errors are logged.
    AfterCommit,
    /// After the writes were discarded. Listener errors are logged.
    AfterRollback,
    /// After either outcome. Listener errors are logged.
    AfterCompletion,
}

impl Display for TransactionPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionPhase::BeforeCommit => write!(f, "BEFORE_COMMIT"),
            TransactionPhase::AfterCommit => write!(f, "AFTER_COMMIT"),
            TransactionPhase::AfterRollback => write!(f, "AFTER_ROLLBACK"),
            TransactionPhase::AfterCompletion => write!(f, "AFTER_COMPLETION"),
        }
    }
}

/// An immutable notification such as "user 3 created".
///
/// # Usage
///
/// ```ignore
/// context.publish(TransactionEvent::new("user.created", "alice").with_record(id))?;
/// ```
#[derive(Clone)]
pub struct TransactionEvent {
    inner: Arc<TransactionEventInner>,
}

struct TransactionEventInner {
    topic: String,
    message: String,
    record_id: Option<RecordId>,
    timestamp: DateTime<Utc>,
}

impl TransactionEvent {
    pub fn new(topic: &str, message: &str) -> Self {
        TransactionEvent {
            inner: Arc::new(TransactionEventInner {
                topic: topic.to_string(),
                message: message.to_string(),
                record_id: None,
                timestamp: Utc::now(),
            }),
        }
    }

    /// Returns a copy of this event tagged with the record it concerns.
    pub fn with_record(self, record_id: RecordId) -> Self {
        TransactionEvent {
            inner: Arc::new(TransactionEventInner {
                topic: self.inner.topic.clone(),
                message: self.inner.message.clone(),
                record_id: Some(record_id),
                timestamp: self.inner.timestamp,
            }),
        }
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn message(&self) -> &str {
        &self.inner.message
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.inner.record_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.inner.timestamp
    }
}

impl Debug for TransactionEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionEvent")
            .field("topic", &self.topic())
            .field("message", &self.message())
            .field("record_id", &self.record_id())
            .field("timestamp", &self.timestamp())
            .finish()
    }
}

/// Closure signature for transaction event handlers.
///
/// Any `Fn(TransactionPhase, &TransactionEvent) -> VersaResult<()>` that is
/// `Send + Sync` implements this trait.
pub trait TransactionEventCallback:
    Send + Sync + Fn(TransactionPhase, &TransactionEvent) -> VersaResult<()>
{
}

impl<F> TransactionEventCallback for F where
    F: Send + Sync + Fn(TransactionPhase, &TransactionEvent) -> VersaResult<()>
{
}

/// Listener for transaction events.
///
/// A listener either receives every phase (`new`) or a single phase (`on`).
///
/// ```ignore
/// let listener = TransactionEventListener::on(TransactionPhase::AfterCommit, |event| {
///     log::info!("{} committed", event.message());
///     Ok(())
/// });
/// ```
#[derive(Clone)]
pub struct TransactionEventListener {
    phase: Option<TransactionPhase>,
    on_event: Arc<dyn TransactionEventCallback>,
}

impl TransactionEventListener {
    /// Listens to every phase.
    pub fn new<F>(on_event: F) -> Self
    where
        F: Fn(TransactionPhase, &TransactionEvent) -> VersaResult<()> + Send + Sync + 'static,
    {
        TransactionEventListener {
            phase: None,
            on_event: Arc::new(on_event),
        }
    }

    /// Listens to a single phase.
    pub fn on<F>(phase: TransactionPhase, on_event: F) -> Self
    where
        F: Fn(&TransactionEvent) -> VersaResult<()> + Send + Sync + 'static,
    {
        TransactionEventListener {
            phase: Some(phase),
            on_event: Arc::new(move |_: TransactionPhase, event: &TransactionEvent| {
                on_event(event)
            }),
        }
    }

    pub fn accepts(&self, phase: TransactionPhase) -> bool {
        self.phase.map_or(true, |p| p == phase)
    }

    pub(crate) fn notify(
        &self,
        phase: TransactionPhase,
        event: &TransactionEvent,
    ) -> VersaResult<()> {
        if !self.accepts(phase) {
            return Ok(());
        }
        (self.on_event)(phase, event)
    }
}

impl Debug for TransactionEventListener {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionEventListener")
            .field("phase", &self.phase)
            .finish()
    }
}
