use crate::errors::VersaResult;
use std::sync::Arc;

use super::TransactionContext;

/// Lifecycle state of a [`TransactionContext`].
///
/// `Committed` and `RolledBack` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Context is accepting operations
    Active,
    /// Writes were made visible (or, for a nested context, handed to the parent)
    Committed,
    /// Writes were discarded
    RolledBack,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionState::Active)
    }
}

/// Executable compensation step returned by a resource commit.
pub type Command = Arc<dyn Fn() -> VersaResult<()> + Send + Sync>;

/// Undo information for a resource that already committed.
///
/// When a later resource of the same context fails to commit, the collected
/// entries run in reverse order.
#[derive(Clone)]
pub struct UndoEntry {
    pub resource_id: String,
    pub rollback: Command,
}

impl UndoEntry {
    pub fn new(resource_id: &str, rollback: Command) -> Self {
        UndoEntry {
            resource_id: resource_id.to_string(),
            rollback,
        }
    }
}

impl std::fmt::Debug for UndoEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoEntry")
            .field("resource_id", &self.resource_id)
            .finish()
    }
}

/// Something a context enlists and resolves together with itself.
///
/// A resource keeps per-context state (pending writes, snapshots) keyed by
/// the context id. The context calls back into it when it resolves:
///
/// - `commit` atomically validates and applies the context's pending state
///   and may return a command that undoes what it applied;
/// - `rollback` discards the context's pending state;
/// - `promote` hands a committed nested context's pending state to its parent.
///
/// Commit is atomic per resource only. With several resources, each one
/// publishes its writes as it commits, and the undo command of an earlier
/// resource is a compensation run after the fact. Another context may read,
/// or save over, those writes before a later resource fails. An undo that
/// finds a record already changed leaves it as it is, so the context's
/// writes stay partially applied in that case.
pub trait TransactionResource: Send + Sync {
    /// Stable identity used to enlist a resource once per context.
    fn resource_id(&self) -> String;

    fn commit(&self, context: &TransactionContext) -> VersaResult<Option<Command>>;

    fn rollback(&self, context: &TransactionContext) -> VersaResult<()>;

    fn promote(&self, child: &TransactionContext, parent: &TransactionContext) -> VersaResult<()>;
}
