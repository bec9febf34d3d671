use super::config::{Propagation, RollbackDecision, TransactionConfig};
use super::context::TransactionContext;
use super::core::TransactionState;
use crate::errors::{ErrorKind, VersaError, VersaResult};
use crate::event::TransactionEventListener;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Opens, joins and resolves transaction contexts.
///
/// The coordinator is the explicit replacement for method interception: a
/// unit-of-work is wrapped with [`execute`](Self::execute), or driven by
/// hand with [`begin`](Self::begin) and [`complete`](Self::complete).
///
/// # Usage
///
/// ```rust,ignore
/// let coordinator = TransactionCoordinator::builder()
///     .name("users")
///     .default_timeout(Duration::from_secs(30))
///     .build()?;
///
/// let id = coordinator.execute(&TransactionConfig::required(), None, |ctx| {
///     let users = store.bind(ctx);
///     Ok(users.save(Record::new(user))?.id())
/// })?;
/// ```
///
/// Propagation decides what `begin` returns:
///
/// | propagation   | active caller            | no or inactive caller |
/// |---------------|--------------------------|-----------------------|
/// | `Required`    | joins the caller         | new root context      |
/// | `RequiresNew` | new root, caller suspended | new root context    |
/// | `Nested`      | savepoint child of caller | new root context     |
#[derive(Clone)]
pub struct TransactionCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl TransactionCoordinator {
    pub fn new() -> Self {
        TransactionCoordinator {
            inner: Arc::new(CoordinatorInner::new(None, None, Vec::new())),
        }
    }

    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.inner.default_timeout
    }

    /// Opens a scope for a unit-of-work according to `config.propagation()`.
    pub fn begin(
        &self,
        config: &TransactionConfig,
        caller: Option<&TransactionContext>,
    ) -> VersaResult<TransactionScope> {
        self.inner.begin(self, config, caller)
    }

    /// Resolves a scope with the outcome of its unit-of-work.
    ///
    /// An owner scope commits on `Ok` and consults the rollback rule on
    /// `Err`. A participant scope never resolves the shared context; a
    /// rollback-worthy error only marks it rollback-only. The caller's
    /// error is returned unchanged unless committing fails.
    pub fn complete<R>(&self, scope: TransactionScope, result: VersaResult<R>) -> VersaResult<R> {
        self.inner.complete(scope, result)
    }

    /// Runs `work` inside a scope opened with `config` and completes it.
    pub fn execute<R, F>(
        &self,
        config: &TransactionConfig,
        caller: Option<&TransactionContext>,
        work: F,
    ) -> VersaResult<R>
    where
        F: FnOnce(&TransactionContext) -> VersaResult<R>,
    {
        let scope = self.begin(config, caller)?;
        let context = scope.context().clone();
        let result = work(&context);
        self.complete(scope, result)
    }

    /// Rolls back `context` with `Timeout` if it ran out of time.
    pub fn enforce_timeout(&self, context: &TransactionContext) -> VersaResult<()> {
        context.enforce_timeout()
    }

    /// Fails with `ReadOnlyViolation` if `context` is read-only.
    pub fn check_read_only(&self, context: &TransactionContext) -> VersaResult<()> {
        context.check_read_only()
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.inner.stats()
    }
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        TransactionCoordinator::new()
    }
}

impl Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("name", &self.inner.name)
            .field("default_timeout", &self.inner.default_timeout)
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}

/// Number of owned scopes begun and how they ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordinatorStats {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
}

struct CoordinatorInner {
    name: Option<String>,
    default_timeout: Option<Duration>,
    listeners: Vec<TransactionEventListener>,
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl CoordinatorInner {
    fn new(
        name: Option<String>,
        default_timeout: Option<Duration>,
        listeners: Vec<TransactionEventListener>,
    ) -> Self {
        CoordinatorInner {
            name,
            default_timeout,
            listeners,
            begun: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            rolled_back: AtomicU64::new(0),
        }
    }

    fn begin(
        &self,
        coordinator: &TransactionCoordinator,
        config: &TransactionConfig,
        caller: Option<&TransactionContext>,
    ) -> VersaResult<TransactionScope> {
        config.validate()?;

        let active_caller = caller.filter(|ctx| ctx.is_active());
        let context = match (config.propagation(), active_caller) {
            (Propagation::Required, Some(outer)) => {
                log::debug!("Joining active context {}", outer.id());
                return Ok(TransactionScope::new(
                    outer.clone(),
                    config.clone(),
                    ScopeRole::Participant,
                    coordinator.clone(),
                ));
            }
            (Propagation::Nested, Some(outer)) => {
                let child = TransactionContext::new_nested(outer, config);
                log::debug!("Started nested context {} under {}", child.id(), outer.id());
                child
            }
            (Propagation::RequiresNew, outer) => {
                let fresh = self.new_root(config, outer.cloned());
                if let Some(outer) = outer {
                    log::debug!("Suspending context {} for new context {}", outer.id(), fresh.id());
                }
                fresh
            }
            (_, _) => self.new_root(config, None),
        };

        self.begun.fetch_add(1, Ordering::Relaxed);
        Ok(TransactionScope::new(
            context,
            config.clone(),
            ScopeRole::Owner,
            coordinator.clone(),
        ))
    }

    fn new_root(
        &self,
        config: &TransactionConfig,
        suspended: Option<TransactionContext>,
    ) -> TransactionContext {
        let mut effective = config.clone();
        if effective.timeout().is_none() {
            if let Some(timeout) = self.default_timeout {
                effective = effective.with_timeout(timeout);
            }
        }

        let context = TransactionContext::new_root(
            effective,
            self.name.as_deref(),
            self.listeners.clone(),
            suspended,
        );
        log::debug!(
            "Started context {} ({:?}, {:?}, read_only: {})",
            context.id(),
            context.propagation(),
            context.isolation(),
            context.is_read_only()
        );
        context
    }

    fn complete<R>(&self, mut scope: TransactionScope, result: VersaResult<R>) -> VersaResult<R> {
        scope.completed = true;
        let context = scope.context.clone();

        if scope.role == ScopeRole::Participant {
            if let Err(err) = &result {
                if scope.config.rollback_rule().evaluate(err.kind()) == RollbackDecision::Rollback {
                    log::debug!(
                        "Participant failed with '{}', marking context {} rollback-only",
                        err,
                        context.id()
                    );
                    context.set_rollback_only();
                }
            }
            return result;
        }

        let outcome = match result {
            Ok(value) => self.commit(&context).map(|_| value),
            Err(err) => match scope.config.rollback_rule().evaluate(err.kind()) {
                RollbackDecision::Commit => {
                    log::debug!(
                        "Error kind '{}' is configured to commit context {}",
                        err.kind(),
                        context.id()
                    );
                    match self.commit(&context) {
                        Ok(_) => Err(err),
                        Err(commit_err) => {
                            log::error!(
                                "Error '{}' overridden by commit failure: {}",
                                err,
                                commit_err
                            );
                            Err(commit_err)
                        }
                    }
                }
                RollbackDecision::Rollback => {
                    context.rollback(Some(err.clone()));
                    Err(err)
                }
            },
        };

        self.record_outcome(&context);
        outcome
    }

    fn commit(&self, context: &TransactionContext) -> VersaResult<()> {
        match context.state() {
            TransactionState::Active => context.commit(),
            // resolved behind the owner's back, e.g. by a timeout on a store call
            TransactionState::RolledBack => Err(context.rollback_cause().unwrap_or_else(|| {
                VersaError::new(
                    &format!("Transaction context {} was already rolled back", context.id()),
                    ErrorKind::InactiveContext,
                )
            })),
            TransactionState::Committed => Err(VersaError::new(
                &format!("Transaction context {} was already committed", context.id()),
                ErrorKind::InactiveContext,
            )),
        }
    }

    fn record_outcome(&self, context: &TransactionContext) {
        match context.state() {
            TransactionState::Committed => self.committed.fetch_add(1, Ordering::Relaxed),
            TransactionState::RolledBack => self.rolled_back.fetch_add(1, Ordering::Relaxed),
            TransactionState::Active => 0,
        };
    }

    fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            begun: self.begun.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
        }
    }
}

/// Builder for [`TransactionCoordinator`].
///
/// Invalid settings are remembered and reported by `build`.
#[derive(Default)]
pub struct CoordinatorBuilder {
    error: Option<VersaError>,
    name: Option<String>,
    default_timeout: Option<Duration>,
    listeners: Vec<TransactionEventListener>,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        CoordinatorBuilder::default()
    }

    /// Label attached to every root context, shown in logs.
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Timeout for root contexts whose configuration sets none.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        if self.error.is_none() && timeout.is_zero() {
            self.error = Some(VersaError::new(
                "Default timeout must be greater than zero",
                ErrorKind::InvalidConfiguration,
            ));
        }
        self.default_timeout = Some(timeout);
        self
    }

    /// Listener attached to every root context.
    pub fn listener(mut self, listener: TransactionEventListener) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> VersaResult<TransactionCoordinator> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(TransactionCoordinator {
            inner: Arc::new(CoordinatorInner::new(
                self.name,
                self.default_timeout,
                self.listeners,
            )),
        })
    }
}

/// Whether a scope owns its context or joined someone else's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRole {
    Owner,
    Participant,
}

/// A unit-of-work's handle on its context, returned by
/// [`TransactionCoordinator::begin`].
///
/// Pass it back to [`TransactionCoordinator::complete`]. An owner scope
/// dropped without completing rolls its context back.
pub struct TransactionScope {
    context: TransactionContext,
    config: TransactionConfig,
    role: ScopeRole,
    coordinator: TransactionCoordinator,
    completed: bool,
}

impl TransactionScope {
    fn new(
        context: TransactionContext,
        config: TransactionConfig,
        role: ScopeRole,
        coordinator: TransactionCoordinator,
    ) -> Self {
        TransactionScope {
            context,
            config,
            role,
            coordinator,
            completed: false,
        }
    }

    pub fn context(&self) -> &TransactionContext {
        &self.context
    }

    /// Configuration the scope was opened with.
    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    pub fn role(&self) -> ScopeRole {
        self.role
    }

    pub fn is_owner(&self) -> bool {
        self.role == ScopeRole::Owner
    }
}

impl Debug for TransactionScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope")
            .field("context", &self.context.id())
            .field("role", &self.role)
            .field("completed", &self.completed)
            .finish()
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.completed || self.role != ScopeRole::Owner || !self.context.is_active() {
            return;
        }

        log::warn!(
            "Scope for context {} dropped without completion, rolling back",
            self.context.id()
        );
        self.context.rollback(Some(VersaError::new(
            "Scope dropped without completion",
            ErrorKind::InvalidOperation,
        )));
        self.coordinator.inner.record_outcome(&self.context);
    }
}
