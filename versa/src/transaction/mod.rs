//! Transaction coordination.
//!
//! A [`TransactionCoordinator`] opens [`TransactionContext`]s according to a
//! [`TransactionConfig`], and resolves them once the unit-of-work returns.
//! Stores take part through the [`TransactionResource`] seam: a context
//! commits, rolls back or promotes every resource it touched.

mod config;
mod context;
mod coordinator;
mod core;

pub use config::{Isolation, Propagation, RollbackDecision, RollbackRule, TransactionConfig};
pub use context::TransactionContext;
pub use coordinator::{
    CoordinatorBuilder, CoordinatorStats, ScopeRole, TransactionCoordinator, TransactionScope,
};
pub use self::core::{Command, TransactionResource, TransactionState, UndoEntry};
