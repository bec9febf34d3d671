use super::config::{Isolation, Propagation, TransactionConfig};
use super::core::{TransactionResource, TransactionState, UndoEntry};
use crate::common::{deadline_expired, unique_id};
use crate::errors::{ErrorKind, VersaError, VersaResult};
use crate::event::{TransactionEvent, TransactionEventListener, TransactionPhase};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// A unit-of-work in progress.
///
/// `TransactionContext` is a cheap handle; every clone refers to the same
/// context. Contexts are created by the
/// [`TransactionCoordinator`](super::TransactionCoordinator) and resolved
/// exactly once, to `Committed` or `RolledBack`.
///
/// A context collects three things while it is active:
///
/// - the resources (stores) it touched, which it commits or rolls back
///   together when it resolves;
/// - events published through [`publish`](Self::publish), handed to the
///   listeners at each phase boundary;
/// - nested child contexts (savepoints), which are rolled back if they are
///   still active when this context resolves.
///
/// A nested context never writes to the stores directly. Its commit hands
/// its pending writes and queued events to the parent; its rollback only
/// discards its own.
#[derive(Clone)]
pub struct TransactionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: String,
    name: Option<String>,
    config: TransactionConfig,
    started: Instant,
    parent: Option<TransactionContext>,
    suspended: Option<TransactionContext>,
    state: Mutex<TransactionState>,
    rollback_only: AtomicBool,
    rollback_cause: Mutex<Option<VersaError>>,
    resources: Mutex<Vec<Arc<dyn TransactionResource>>>,
    events: Mutex<VecDeque<TransactionEvent>>,
    listeners: Mutex<Vec<TransactionEventListener>>,
    children: Mutex<Vec<Weak<ContextInner>>>,
}

impl TransactionContext {
    pub(crate) fn new_root(
        config: TransactionConfig,
        name: Option<&str>,
        listeners: Vec<TransactionEventListener>,
        suspended: Option<TransactionContext>,
    ) -> Self {
        TransactionContext::create(config, name, listeners, None, suspended)
    }

    /// Creates a savepoint child. The child inherits the parent's isolation
    /// and listeners, and is read-only if either side asks for it.
    pub(crate) fn new_nested(parent: &TransactionContext, config: &TransactionConfig) -> Self {
        let effective = config
            .clone()
            .with_propagation(Propagation::Nested)
            .with_isolation(parent.isolation())
            .with_read_only(parent.is_read_only() || config.is_read_only());

        let child = TransactionContext::create(
            effective,
            parent.name(),
            parent.inner.listeners.lock().clone(),
            Some(parent.clone()),
            None,
        );
        parent
            .inner
            .children
            .lock()
            .push(Arc::downgrade(&child.inner));
        child
    }

    fn create(
        config: TransactionConfig,
        name: Option<&str>,
        listeners: Vec<TransactionEventListener>,
        parent: Option<TransactionContext>,
        suspended: Option<TransactionContext>,
    ) -> Self {
        TransactionContext {
            inner: Arc::new(ContextInner {
                id: unique_id(),
                name: name.map(|n| n.to_string()),
                config,
                started: Instant::now(),
                parent,
                suspended,
                state: Mutex::new(TransactionState::Active),
                rollback_only: AtomicBool::new(false),
                rollback_cause: Mutex::new(None),
                resources: Mutex::new(Vec::new()),
                events: Mutex::new(VecDeque::new()),
                listeners: Mutex::new(listeners),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Effective configuration of this context.
    pub fn config(&self) -> &TransactionConfig {
        &self.inner.config
    }

    pub fn propagation(&self) -> Propagation {
        self.inner.config.propagation()
    }

    pub fn isolation(&self) -> Isolation {
        self.inner.config.isolation()
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.config.is_read_only()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.config.timeout()
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    pub fn state(&self) -> TransactionState {
        *self.inner.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    pub fn is_nested(&self) -> bool {
        self.inner.parent.is_some()
    }

    pub fn parent(&self) -> Option<&TransactionContext> {
        self.inner.parent.as_ref()
    }

    /// The caller context suspended while this `RequiresNew` context runs.
    pub fn suspended(&self) -> Option<&TransactionContext> {
        self.inner.suspended.as_ref()
    }

    /// The outermost context of the nesting chain.
    pub fn root(&self) -> TransactionContext {
        let mut current = self.clone();
        while let Some(parent) = current.inner.parent.clone() {
            current = parent;
        }
        current
    }

    /// This context followed by its ancestors, innermost first.
    pub fn lineage(&self) -> Vec<TransactionContext> {
        let mut chain = vec![self.clone()];
        let mut current = self.inner.parent.clone();
        while let Some(ctx) = current {
            current = ctx.inner.parent.clone();
            chain.push(ctx);
        }
        chain
    }

    pub fn is_rollback_only(&self) -> bool {
        self.inner.rollback_only.load(Ordering::Acquire)
    }

    /// Forces the owner's commit to roll back with `UnexpectedRollback`.
    pub fn set_rollback_only(&self) {
        self.inner.rollback_only.store(true, Ordering::Release);
    }

    /// The error that caused this context to roll back, if any.
    pub fn rollback_cause(&self) -> Option<VersaError> {
        self.inner.rollback_cause.lock().clone()
    }

    /// Queues an event for dispatch at the next phase boundary.
    pub fn publish(&self, event: TransactionEvent) -> VersaResult<()> {
        self.check_active()?;
        self.inner.events.lock().push_back(event);
        Ok(())
    }

    pub fn add_listener(&self, listener: TransactionEventListener) -> VersaResult<()> {
        self.check_active()?;
        self.inner.listeners.lock().push(listener);
        Ok(())
    }

    pub fn pending_events(&self) -> usize {
        self.inner.events.lock().len()
    }

    pub fn check_active(&self) -> VersaResult<()> {
        let state = self.state();
        if state == TransactionState::Active {
            return Ok(());
        }

        let message = format!("Transaction context {} is {:?}", self.id(), state);
        Err(match self.rollback_cause() {
            Some(cause) => VersaError::new_with_cause(&message, ErrorKind::InactiveContext, cause),
            None => VersaError::new(&message, ErrorKind::InactiveContext),
        })
    }

    pub fn check_read_only(&self) -> VersaResult<()> {
        if self.is_read_only() {
            return Err(VersaError::new(
                &format!("Transaction context {} is read-only", self.id()),
                ErrorKind::ReadOnlyViolation,
            ));
        }
        Ok(())
    }

    /// Returns true if this context or one of its ancestors ran out of time.
    pub fn is_expired(&self) -> bool {
        self.expired_context().is_some()
    }

    /// Rolls back the outermost expired context of the chain and fails with `Timeout`.
    pub fn enforce_timeout(&self) -> VersaResult<()> {
        if let Some(expired) = self.expired_context() {
            let err = VersaError::new(
                &format!(
                    "Transaction context {} timed out after {} ms",
                    expired.id(),
                    expired.elapsed().as_millis()
                ),
                ErrorKind::Timeout,
            );
            log::warn!("{}, rolling back", err);
            expired.rollback(Some(err.clone()));
            return Err(err);
        }
        Ok(())
    }

    fn expired_context(&self) -> Option<TransactionContext> {
        self.lineage()
            .into_iter()
            .rev()
            .find(|ctx| deadline_expired(ctx.inner.started, ctx.timeout()))
    }

    pub(crate) fn is_enlisted(&self, resource_id: &str) -> bool {
        self.inner
            .resources
            .lock()
            .iter()
            .any(|r| r.resource_id() == resource_id)
    }

    pub(crate) fn enlist(&self, resource: Arc<dyn TransactionResource>) -> VersaResult<()> {
        self.check_active()?;

        let resource_id = resource.resource_id();
        let mut resources = self.inner.resources.lock();
        if !resources.iter().any(|r| r.resource_id() == resource_id) {
            log::debug!("Enlisting resource {} in context {}", resource_id, self.id());
            resources.push(resource);
        }
        Ok(())
    }

    /// Resolves this context to `Committed`.
    ///
    /// Fails, after rolling back, if the context timed out, was marked
    /// rollback-only, was vetoed by a before-commit listener or hit a
    /// conflict while applying its writes.
    pub(crate) fn commit(&self) -> VersaResult<()> {
        self.check_active()?;
        self.enforce_timeout()?;

        if self.is_rollback_only() {
            let err = VersaError::new(
                &format!("Transaction context {} was marked rollback-only", self.id()),
                ErrorKind::UnexpectedRollback,
            );
            self.rollback(Some(err.clone()));
            return Err(err);
        }

        self.resolve_children();
        match self.inner.parent.clone() {
            Some(parent) => self.commit_into(&parent),
            None => self.commit_root(),
        }
    }

    fn commit_root(&self) -> VersaResult<()> {
        if let Err(err) = self.dispatch(TransactionPhase::BeforeCommit) {
            let err = VersaError::new_with_cause(
                &format!("Before-commit listener rejected context {}", self.id()),
                ErrorKind::EventError,
                err,
            );
            self.rollback(Some(err.clone()));
            return Err(err);
        }

        if let Err(err) = self.commit_resources() {
            self.rollback(Some(err.clone()));
            return Err(err);
        }

        self.transition(TransactionState::Committed);
        log::debug!("Transaction context {} committed", self.id());

        self.dispatch_logged(TransactionPhase::AfterCommit);
        self.dispatch_logged(TransactionPhase::AfterCompletion);
        self.release();
        Ok(())
    }

    // two-phase: apply every resource, undo the applied ones in reverse on failure
    fn commit_resources(&self) -> VersaResult<()> {
        let resources = self.inner.resources.lock().clone();
        let mut undo_stack: Vec<UndoEntry> = Vec::new();

        for resource in resources.iter() {
            match resource.commit(self) {
                Ok(Some(undo)) => undo_stack.push(UndoEntry::new(&resource.resource_id(), undo)),
                Ok(None) => {}
                Err(err) => {
                    while let Some(entry) = undo_stack.pop() {
                        if let Err(e) = (entry.rollback)() {
                            log::error!(
                                "Failed to undo commit of resource {}: {}",
                                entry.resource_id,
                                e
                            );
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn commit_into(&self, parent: &TransactionContext) -> VersaResult<()> {
        if let Err(err) = parent.check_active() {
            self.rollback(Some(err.clone()));
            return Err(err);
        }

        let resources = self.inner.resources.lock().clone();
        for resource in resources {
            if let Err(err) = resource.promote(self, parent) {
                self.rollback(Some(err.clone()));
                return Err(err);
            }
            parent.enlist(resource)?;
        }

        let events: Vec<TransactionEvent> = self.inner.events.lock().drain(..).collect();
        parent.inner.events.lock().extend(events);

        self.transition(TransactionState::Committed);
        log::debug!(
            "Nested context {} committed into {}",
            self.id(),
            parent.id()
        );
        self.release();
        Ok(())
    }

    /// Resolves this context to `RolledBack`. A no-op on a resolved context.
    pub(crate) fn rollback(&self, cause: Option<VersaError>) {
        if !self.is_active() {
            return;
        }

        if let Some(cause) = &cause {
            self.inner
                .rollback_cause
                .lock()
                .get_or_insert_with(|| cause.clone());
        }

        for child in self.take_children() {
            child.rollback(cause.clone());
        }

        let resources = self.inner.resources.lock().clone();
        for resource in resources.iter().rev() {
            if let Err(e) = resource.rollback(self) {
                log::warn!(
                    "Failed to roll back resource {} of context {}: {}",
                    resource.resource_id(),
                    self.id(),
                    e
                );
            }
        }

        self.transition(TransactionState::RolledBack);
        match &cause {
            Some(cause) => log::debug!("Transaction context {} rolled back: {}", self.id(), cause),
            None => log::debug!("Transaction context {} rolled back", self.id()),
        }

        self.dispatch_logged(TransactionPhase::AfterRollback);
        self.dispatch_logged(TransactionPhase::AfterCompletion);
        self.release();
    }

    fn resolve_children(&self) {
        for child in self.take_children() {
            if child.is_active() {
                log::warn!(
                    "Nested context {} still active when {} completed, rolling back",
                    child.id(),
                    self.id()
                );
                child.rollback(Some(VersaError::new(
                    &format!("Parent context {} completed first", self.id()),
                    ErrorKind::InvalidOperation,
                )));
            }
        }
    }

    fn take_children(&self) -> Vec<TransactionContext> {
        self.inner
            .children
            .lock()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .map(|inner| TransactionContext { inner })
            .filter(|child| child.is_active())
            .collect()
    }

    fn transition(&self, state: TransactionState) {
        *self.inner.state.lock() = state;
    }

    // listeners run without any context lock held
    fn dispatch(&self, phase: TransactionPhase) -> VersaResult<()> {
        let events: Vec<TransactionEvent> = self.inner.events.lock().iter().cloned().collect();
        if events.is_empty() {
            return Ok(());
        }

        let listeners = self.inner.listeners.lock().clone();
        for event in &events {
            for listener in &listeners {
                listener.notify(phase, event)?;
            }
        }
        Ok(())
    }

    fn dispatch_logged(&self, phase: TransactionPhase) {
        let events: Vec<TransactionEvent> = self.inner.events.lock().iter().cloned().collect();
        if events.is_empty() {
            return;
        }

        let listeners = self.inner.listeners.lock().clone();
        for event in &events {
            for listener in &listeners {
                if let Err(e) = listener.notify(phase, event) {
                    log::warn!(
                        "{} listener failed on event '{}' of context {}: {}",
                        phase,
                        event.topic(),
                        self.id(),
                        e
                    );
                }
            }
        }
    }

    fn release(&self) {
        self.inner.resources.lock().clear();
        self.inner.events.lock().clear();
        self.inner.listeners.lock().clear();
        if let Some(suspended) = &self.inner.suspended {
            log::debug!("Resuming suspended context {}", suspended.id());
        }
    }
}

impl PartialEq for TransactionContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for TransactionContext {}

impl Debug for TransactionContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .field("propagation", &self.propagation())
            .field("isolation", &self.isolation())
            .field("read_only", &self.is_read_only())
            .field("nested", &self.is_nested())
            .finish()
    }
}
