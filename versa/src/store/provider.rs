use super::record::{Record, RecordId};
use crate::errors::{ErrorKind, VersaResult};
use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::Arc;

/// Persistence boundary for versioned records.
///
/// `save` is a compare-and-swap on the version: a record without an id is
/// inserted with a fresh id and version 0; a record with an id is stored
/// with version + 1 if its version equals the one currently visible, and
/// fails with `Conflict` otherwise (`NotFound` if the id is unknown).
pub trait RecordStoreProvider<T>: Send + Sync {
    fn get(&self, id: RecordId) -> VersaResult<Record<T>>;

    fn save(&self, record: Record<T>) -> VersaResult<Record<T>>;

    /// Every visible record in id order.
    fn find_all(&self) -> VersaResult<Vec<Record<T>>>;

    fn count(&self) -> VersaResult<usize>;

    fn contains(&self, id: RecordId) -> VersaResult<bool> {
        match self.get(id) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == &ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Type-erased handle on a [`RecordStoreProvider`].
///
/// Lets application services hold "a store of users" without caring whether
/// it is the auto-commit store or one bound to a context.
pub struct RecordStore<T> {
    inner: Arc<dyn RecordStoreProvider<T>>,
}

impl<T> RecordStore<T> {
    pub fn new<P: RecordStoreProvider<T> + 'static>(provider: P) -> Self {
        RecordStore {
            inner: Arc::new(provider),
        }
    }
}

impl<T> Clone for RecordStore<T> {
    fn clone(&self) -> Self {
        RecordStore {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Deref for RecordStore<T> {
    type Target = Arc<dyn RecordStoreProvider<T>>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> Debug for RecordStore<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore").finish()
    }
}
