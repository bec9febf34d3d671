use crate::errors::{ErrorKind, VersaError, VersaResult};
use std::collections::HashSet;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Policy deciding whether a unit-of-work joins the caller's context or starts its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Propagation {
    /// Join the caller's active context, or start a new root context.
    #[default]
    Required,
    /// Always start a new root context, suspending the caller until it resolves.
    RequiresNew,
    /// Start a savepoint child of the caller's active context.
    Nested,
}

/// Isolation level of a context.
///
/// The level decides what the bound store shows to reads:
/// - `ReadUncommitted`: pending writes of other contexts are visible
/// - `ReadCommitted`: the latest committed state at call time
/// - `RepeatableRead`: a snapshot pinned on first access
/// - `Serializable`: the pinned snapshot plus commit-time validation of every record read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Isolation {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Isolation {
    /// Whether reads are served from a snapshot pinned at first access.
    pub fn uses_snapshot(&self) -> bool {
        matches!(self, Isolation::RepeatableRead | Isolation::Serializable)
    }
}

/// Outcome of evaluating a [`RollbackRule`] against an error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackDecision {
    Commit,
    Rollback,
}

/// Maps error kinds to commit-or-rollback.
///
/// `no_rollback_on` is checked first; a match commits the work already done
/// and the error is still returned to the caller. Everything else rolls back,
/// whether or not it is listed in `rollback_on`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RollbackRule {
    rollback_on: Option<HashSet<ErrorKind>>,
    no_rollback_on: HashSet<ErrorKind>,
}

impl RollbackRule {
    /// Rolls back on every error kind.
    pub fn new() -> Self {
        RollbackRule::default()
    }

    /// Restricts the explicit rollback set. Kinds outside it still roll back.
    pub fn rollback_on(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.rollback_on
            .get_or_insert_with(HashSet::new)
            .extend(kinds);
        self
    }

    /// Kinds that commit the unit-of-work and re-raise the error.
    pub fn no_rollback_on(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.no_rollback_on.extend(kinds);
        self
    }

    pub fn evaluate(&self, kind: &ErrorKind) -> RollbackDecision {
        if self.no_rollback_on.contains(kind) {
            return RollbackDecision::Commit;
        }

        match &self.rollback_on {
            None => RollbackDecision::Rollback,
            Some(kinds) if kinds.contains(kind) => RollbackDecision::Rollback,
            Some(_) => {
                log::debug!("Error kind '{}' matches no rollback rule, rolling back", kind);
                RollbackDecision::Rollback
            }
        }
    }
}

/// Per unit-of-work configuration.
///
/// Plain struct with builder-style setters. The named constructors are the
/// presets callers pick instead of stacking attributes:
///
/// ```rust,ignore
/// let config = TransactionConfig::requires_new()
///     .with_isolation(Isolation::Serializable)
///     .with_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TransactionConfig {
    propagation: Propagation,
    isolation: Isolation,
    read_only: bool,
    timeout: Option<Duration>,
    rollback_rule: RollbackRule,
}

impl TransactionConfig {
    pub fn required() -> Self {
        TransactionConfig::default()
    }

    pub fn requires_new() -> Self {
        TransactionConfig::default().with_propagation(Propagation::RequiresNew)
    }

    pub fn nested() -> Self {
        TransactionConfig::default().with_propagation(Propagation::Nested)
    }

    pub fn read_only() -> Self {
        TransactionConfig::default().with_read_only(true)
    }

    /// Read-only, `Required`, `ReadCommitted`, 20 second timeout.
    pub fn read_only_reporting() -> Self {
        TransactionConfig::default()
            .with_read_only(true)
            .with_isolation(Isolation::ReadCommitted)
            .with_timeout(Duration::from_secs(20))
    }

    pub fn serializable() -> Self {
        TransactionConfig::default().with_isolation(Isolation::Serializable)
    }

    pub fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_timeout_millis(mut self, millis: u64) -> Self {
        self.timeout = Some(Duration::from_millis(millis));
        self
    }

    pub fn with_rollback_rule(mut self, rule: RollbackRule) -> Self {
        self.rollback_rule = rule;
        self
    }

    pub fn propagation(&self) -> Propagation {
        self.propagation
    }

    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn rollback_rule(&self) -> &RollbackRule {
        &self.rollback_rule
    }

    /// Rejects configurations no context could honour.
    pub fn validate(&self) -> VersaResult<()> {
        if self.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(VersaError::new(
                "Transaction timeout must be greater than zero",
                ErrorKind::InvalidConfiguration,
            ));
        }
        Ok(())
    }
}
