//! Versioned record storage.
//!
//! [`RecordStoreProvider`] is the persistence boundary. [`VersionedStore`]
//! is the in-memory implementation with optimistic version checks, and
//! [`ContextualStore`] is a `VersionedStore` bound to a transaction context.

mod contextual_store;
mod provider;
mod record;
mod versioned_store;

pub use contextual_store::ContextualStore;
pub use provider::{RecordStore, RecordStoreProvider};
pub use record::{Record, RecordId};
pub use versioned_store::VersionedStore;
