//! # Versa - Transaction Coordination with Optimistic Version Control
//!
//! Versa coordinates units-of-work over a versioned record store. Every
//! record carries a version counter; a save only succeeds if it was based on
//! the version currently stored, so lost updates surface as `Conflict`
//! errors instead of silently overwriting someone else's work.
//!
//! ## Key Features
//!
//! - **Optimistic locking**: compare-and-swap on a per-record version
//! - **Propagation**: join the caller's context, start an independent one, or open a savepoint
//! - **Isolation**: read-uncommitted, read-committed, repeatable-read and serializable views
//! - **Rollback rules**: decide per error kind whether a failed unit-of-work commits or rolls back
//! - **Phase events**: before-commit, after-commit, after-rollback and after-completion listeners
//! - **Retry**: bounded retry with retryable and non-retryable error kinds
//! - **Clean API**: cheap-clone handles over shared state
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use versa::store::{Record, RecordStoreProvider, VersionedStore};
//! use versa::transaction::{TransactionConfig, TransactionCoordinator};
//!
//! # fn main() -> versa::errors::VersaResult<()> {
//! let users: VersionedStore<String> = VersionedStore::new("users");
//! let coordinator = TransactionCoordinator::new();
//!
//! let alice = coordinator.execute(&TransactionConfig::required(), None, |ctx| {
//!     users.bind(ctx).save(Record::new("alice".to_string()))
//! })?;
//!
//! // a second save based on the same version loses
//! users.save(alice.clone().with_data("alice v2".to_string()))?;
//! assert!(users.save(alice.with_data("stale".to_string())).is_err());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`audit`] - Entry/success/failure logging around an action
//! - [`common`] - Shared utilities
//! - [`errors`] - Error types and result definitions
//! - [`event`] - Transaction phase events and listeners
//! - [`retry`] - Retry policy
//! - [`store`] - Versioned records and stores
//! - [`transaction`] - Contexts, configuration and the coordinator

pub mod audit;
pub mod common;
pub mod errors;
pub mod event;
pub mod retry;
pub mod store;
pub mod transaction;

pub use audit::Audit;
pub use errors::{ErrorKind, VersaError, VersaResult};
pub use event::{TransactionEvent, TransactionEventListener, TransactionPhase};
pub use retry::RetryPolicy;
pub use store::{
    ContextualStore, Record, RecordId, RecordStore, RecordStoreProvider, VersionedStore,
};
pub use transaction::{
    Isolation, Propagation, RollbackRule, TransactionConfig, TransactionContext,
    TransactionCoordinator, TransactionScope, TransactionState,
};
