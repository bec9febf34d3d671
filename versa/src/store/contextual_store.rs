use super::provider::RecordStoreProvider;
use super::record::{Record, RecordId};
use super::versioned_store::VersionedStore;
use crate::errors::VersaResult;
use crate::transaction::TransactionContext;
use std::fmt::{Debug, Formatter};

/// A [`VersionedStore`] bound to one [`TransactionContext`].
///
/// Every operation first checks that the context is active and has not run
/// out of time (an expired context is rolled back and the call fails with
/// `Timeout`), then enlists the store in the context. `save` additionally
/// fails with `ReadOnlyViolation` in a read-only context before anything is
/// buffered.
///
/// Reads always see the context's own pending writes and those of its
/// ancestors first. Beyond that the context's isolation decides:
///
/// | isolation         | other contexts' pending writes | committed state        |
/// |-------------------|--------------------------------|------------------------|
/// | `ReadUncommitted` | visible                        | latest                 |
/// | `ReadCommitted`   | hidden                         | latest                 |
/// | `RepeatableRead`  | hidden                         | snapshot at first use  |
/// | `Serializable`    | hidden                         | snapshot, reads validated at commit |
pub struct ContextualStore<T> {
    store: VersionedStore<T>,
    context: TransactionContext,
}

impl<T: Clone + Send + Sync + 'static> ContextualStore<T> {
    pub(crate) fn new(store: VersionedStore<T>, context: TransactionContext) -> Self {
        ContextualStore { store, context }
    }

    pub fn context(&self) -> &TransactionContext {
        &self.context
    }

    pub fn store(&self) -> &VersionedStore<T> {
        &self.store
    }

    fn guard(&self, mutating: bool) -> VersaResult<()> {
        self.context.check_active()?;
        self.context.enforce_timeout()?;
        if mutating {
            self.context.check_read_only()?;
        }

        self.store.enlist(&self.context)?;
        if self.context.isolation().uses_snapshot() {
            self.store.pin_snapshot(&self.context);
        }
        Ok(())
    }
}

impl<T> Clone for ContextualStore<T> {
    fn clone(&self) -> Self {
        ContextualStore {
            store: self.store.clone(),
            context: self.context.clone(),
        }
    }
}

impl<T> Debug for ContextualStore<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextualStore")
            .field("store", &self.store)
            .field("context", &self.context.id())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> RecordStoreProvider<T> for ContextualStore<T> {
    fn get(&self, id: RecordId) -> VersaResult<Record<T>> {
        self.guard(false)?;
        self.store.read_in(&self.context, id)
    }

    fn save(&self, record: Record<T>) -> VersaResult<Record<T>> {
        self.guard(true)?;
        self.store.write_in(&self.context, record)
    }

    fn find_all(&self) -> VersaResult<Vec<Record<T>>> {
        self.guard(false)?;
        self.store.scan_in(&self.context)
    }

    fn count(&self) -> VersaResult<usize> {
        self.guard(false)?;
        Ok(self.store.scan_in(&self.context)?.len())
    }
}
