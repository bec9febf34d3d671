use super::contextual_store::ContextualStore;
use super::provider::RecordStoreProvider;
use super::record::{Record, RecordId};
use crate::common::{atomic, unique_id, Atomic, ReadExecutor, Sequence, WriteExecutor};
use crate::errors::{ErrorKind, VersaError, VersaResult};
use crate::transaction::{Command, Isolation, TransactionContext, TransactionResource};
use dashmap::DashMap;
use im::OrdMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// In-memory versioned record store.
///
/// Used directly, every [`save`](RecordStoreProvider::save) is its own
/// atomic compare-and-swap (auto-commit). Bound to a context with
/// [`bind`](Self::bind), writes are buffered per context and become visible
/// when the context commits.
///
/// Committed state is a persistent ordered map behind a single lock, so a
/// snapshot for `RepeatableRead` and `Serializable` contexts is an O(1)
/// clone. Pending writes live in a concurrent map keyed by context id.
///
/// # Usage
///
/// ```rust,ignore
/// let users: VersionedStore<User> = VersionedStore::new("users");
///
/// coordinator.execute(&TransactionConfig::required(), None, |ctx| {
///     let bound = users.bind(ctx);
///     bound.save(Record::new(User::new("alice")))
/// })?;
///
/// assert_eq!(users.count()?, 1);
/// ```
pub struct VersionedStore<T> {
    inner: Arc<StoreInner<T>>,
}

struct StoreInner<T> {
    id: String,
    name: String,
    sequence: Sequence,
    committed: Atomic<OrdMap<RecordId, Record<T>>>,
    buffers: DashMap<String, ContextBuffer<T>>,
}

#[derive(Clone)]
struct PendingWrite<T> {
    record: Record<T>,
    // committed version the write was based on, None for an insert
    base_version: Option<u64>,
}

/// Per-context state. Snapshot and read set are kept on the root context only.
struct ContextBuffer<T> {
    writes: BTreeMap<RecordId, PendingWrite<T>>,
    snapshot: Option<OrdMap<RecordId, Record<T>>>,
    reads: HashMap<RecordId, u64>,
}

impl<T> ContextBuffer<T> {
    fn new() -> Self {
        ContextBuffer {
            writes: BTreeMap::new(),
            snapshot: None,
            reads: HashMap::new(),
        }
    }
}

// (record id, committed record before the write, version written)
type AppliedWrite<T> = (RecordId, Option<Record<T>>, u64);

impl<T: Clone + Send + Sync + 'static> VersionedStore<T> {
    pub fn new(name: &str) -> Self {
        VersionedStore {
            inner: Arc::new(StoreInner {
                id: unique_id(),
                name: name.to_string(),
                sequence: Sequence::new(),
                committed: atomic(OrdMap::new()),
                buffers: DashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// A view of this store whose operations run inside `context`.
    pub fn bind(&self, context: &TransactionContext) -> ContextualStore<T> {
        ContextualStore::new(self.clone(), context.clone())
    }

    /// Number of writes `context` has buffered in this store.
    pub fn pending_writes(&self, context: &TransactionContext) -> usize {
        self.inner
            .buffers
            .get(context.id())
            .map(|buffer| buffer.writes.len())
            .unwrap_or(0)
    }

    /// Whether this store holds any state for `context`.
    pub fn is_tracking(&self, context: &TransactionContext) -> bool {
        self.inner.buffers.contains_key(context.id())
    }

    pub(crate) fn enlist(&self, context: &TransactionContext) -> VersaResult<()> {
        for ctx in context.lineage() {
            if !ctx.is_enlisted(&self.inner.id) {
                ctx.enlist(Arc::new(self.clone()))?;
            }
        }
        Ok(())
    }

    pub(crate) fn pin_snapshot(&self, context: &TransactionContext) {
        let root = context.root();
        let mut buffer = self
            .inner
            .buffers
            .entry(root.id().to_string())
            .or_insert_with(ContextBuffer::new);

        if buffer.snapshot.is_none() {
            buffer.snapshot = Some(self.inner.committed.read_with(|records| records.clone()));
            log::debug!(
                "Pinned snapshot of store {} for context {}",
                self.inner.name,
                root.id()
            );
        }
    }

    pub(crate) fn read_in(
        &self,
        context: &TransactionContext,
        id: RecordId,
    ) -> VersaResult<Record<T>> {
        if let Some(write) = self.pending_in_chain(context, id) {
            return Ok(write.record);
        }

        let found = match context.isolation() {
            Isolation::ReadUncommitted => self
                .latest_foreign_write(context, id)
                .or_else(|| self.committed_record(id)),
            Isolation::ReadCommitted => self.committed_record(id),
            Isolation::RepeatableRead | Isolation::Serializable => {
                self.snapshot_record(context, id)
            }
        };

        let record = found.ok_or_else(|| not_found(id))?;
        if context.isolation() == Isolation::Serializable {
            self.track_reads(context, [(id, record.version())]);
        }
        Ok(record)
    }

    pub(crate) fn write_in(
        &self,
        context: &TransactionContext,
        record: Record<T>,
    ) -> VersaResult<Record<T>> {
        let (stored, base_version) = match record.id() {
            None => {
                let id = RecordId::new(self.inner.sequence.next_value());
                (Record::from_parts(id, 0, record.into_data()), None)
            }
            Some(id) => {
                let (visible, base_version) = match self.pending_in_chain(context, id) {
                    Some(write) => (write.record.version(), write.base_version),
                    None => match self.committed_record(id) {
                        Some(current) => (current.version(), Some(current.version())),
                        None => return Err(not_found(id)),
                    },
                };

                if record.version() != visible {
                    return Err(version_conflict(id, record.version(), visible));
                }
                (record.next_version(), base_version)
            }
        };

        if let Some(id) = stored.id() {
            self.inner
                .buffers
                .entry(context.id().to_string())
                .or_insert_with(ContextBuffer::new)
                .writes
                .insert(
                    id,
                    PendingWrite {
                        record: stored.clone(),
                        base_version,
                    },
                );
        }
        Ok(stored)
    }

    pub(crate) fn scan_in(&self, context: &TransactionContext) -> VersaResult<Vec<Record<T>>> {
        let mut view = match context.isolation() {
            Isolation::ReadUncommitted => self.uncommitted_view(context),
            Isolation::ReadCommitted => self.inner.committed.read_with(|records| records.clone()),
            Isolation::RepeatableRead | Isolation::Serializable => self.snapshot_view(context),
        };

        if context.isolation() == Isolation::Serializable {
            self.track_reads(context, view.iter().map(|(id, r)| (*id, r.version())));
        }

        // ancestors first so the innermost write wins
        for ctx in context.lineage().iter().rev() {
            if let Some(buffer) = self.inner.buffers.get(ctx.id()) {
                for (id, write) in buffer.writes.iter() {
                    view.insert(*id, write.record.clone());
                }
            }
        }
        Ok(view.values().cloned().collect())
    }

    fn committed_record(&self, id: RecordId) -> Option<Record<T>> {
        self.inner
            .committed
            .read_with(|records| records.get(&id).cloned())
    }

    fn pending_in_chain(
        &self,
        context: &TransactionContext,
        id: RecordId,
    ) -> Option<PendingWrite<T>> {
        for ctx in context.lineage() {
            if let Some(buffer) = self.inner.buffers.get(ctx.id()) {
                if let Some(write) = buffer.writes.get(&id) {
                    return Some(write.clone());
                }
            }
        }
        None
    }

    fn lineage_ids(context: &TransactionContext) -> HashSet<String> {
        context
            .lineage()
            .iter()
            .map(|ctx| ctx.id().to_string())
            .collect()
    }

    // highest pending version of `id` among contexts outside the caller's chain
    fn latest_foreign_write(
        &self,
        context: &TransactionContext,
        id: RecordId,
    ) -> Option<Record<T>> {
        let own = Self::lineage_ids(context);
        self.inner
            .buffers
            .iter()
            .filter(|entry| !own.contains(entry.key()))
            .filter_map(|entry| entry.value().writes.get(&id).map(|w| w.record.clone()))
            .max_by_key(|record| record.version())
    }

    fn uncommitted_view(&self, context: &TransactionContext) -> OrdMap<RecordId, Record<T>> {
        let own = Self::lineage_ids(context);
        let mut view = self.inner.committed.read_with(|records| records.clone());
        for entry in self.inner.buffers.iter() {
            if own.contains(entry.key()) {
                continue;
            }
            for (id, write) in entry.value().writes.iter() {
                let newer = view
                    .get(id)
                    .map_or(true, |current| current.version() < write.record.version());
                if newer {
                    view.insert(*id, write.record.clone());
                }
            }
        }
        view
    }

    fn snapshot_view(&self, context: &TransactionContext) -> OrdMap<RecordId, Record<T>> {
        let root = context.root();
        let pinned = self
            .inner
            .buffers
            .get(root.id())
            .and_then(|buffer| buffer.snapshot.clone());
        match pinned {
            Some(snapshot) => snapshot,
            None => self.inner.committed.read_with(|records| records.clone()),
        }
    }

    fn snapshot_record(&self, context: &TransactionContext, id: RecordId) -> Option<Record<T>> {
        self.snapshot_view(context).get(&id).cloned()
    }

    // first observed version wins
    fn track_reads(
        &self,
        context: &TransactionContext,
        reads: impl IntoIterator<Item = (RecordId, u64)>,
    ) {
        let root = context.root();
        let mut buffer = self
            .inner
            .buffers
            .entry(root.id().to_string())
            .or_insert_with(ContextBuffer::new);
        for (id, version) in reads {
            buffer.reads.entry(id).or_insert(version);
        }
    }
}

impl<T> StoreInner<T>
where
    T: Clone,
{
    fn undo(&self, applied: &[AppliedWrite<T>]) {
        self.committed.write_with(|records| {
            for (id, previous, written) in applied.iter().rev() {
                if records.get(id).map(|r| r.version()) != Some(*written) {
                    log::warn!("Record {} changed after commit, cannot undo", id);
                    continue;
                }
                match previous {
                    Some(record) => {
                        records.insert(*id, record.clone());
                    }
                    None => {
                        records.remove(id);
                    }
                }
            }
        });
        log::debug!("Undid {} write(s) in store {}", applied.len(), self.name);
    }
}

impl<T> Clone for VersionedStore<T> {
    fn clone(&self) -> Self {
        VersionedStore {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Debug for VersionedStore<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedStore")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .field("contexts", &self.inner.buffers.len())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> RecordStoreProvider<T> for VersionedStore<T> {
    fn get(&self, id: RecordId) -> VersaResult<Record<T>> {
        self.committed_record(id).ok_or_else(|| not_found(id))
    }

    fn save(&self, record: Record<T>) -> VersaResult<Record<T>> {
        let sequence = &self.inner.sequence;
        self.inner.committed.write_with(|records| match record.id() {
            None => {
                let id = RecordId::new(sequence.next_value());
                let stored = Record::from_parts(id, 0, record.into_data());
                records.insert(id, stored.clone());
                Ok(stored)
            }
            Some(id) => {
                let current = match records.get(&id) {
                    Some(existing) => existing.version(),
                    None => return Err(not_found(id)),
                };
                if record.version() != current {
                    return Err(version_conflict(id, record.version(), current));
                }
                let stored = record.next_version();
                records.insert(id, stored.clone());
                Ok(stored)
            }
        })
    }

    fn find_all(&self) -> VersaResult<Vec<Record<T>>> {
        Ok(self
            .inner
            .committed
            .read_with(|records| records.values().cloned().collect()))
    }

    fn count(&self) -> VersaResult<usize> {
        Ok(self.inner.committed.read_with(|records| records.len()))
    }
}

impl<T: Clone + Send + Sync + 'static> TransactionResource for VersionedStore<T> {
    fn resource_id(&self) -> String {
        self.inner.id.clone()
    }

    /// Validates every buffered write against the committed version it was
    /// based on (and, for `Serializable`, every record read) and applies
    /// them, all under the committed-state write lock.
    fn commit(&self, context: &TransactionContext) -> VersaResult<Option<Command>> {
        let buffer = match self.inner.buffers.remove(context.id()) {
            Some((_, buffer)) => buffer,
            None => return Ok(None),
        };
        if buffer.writes.is_empty() {
            return Ok(None);
        }

        let validate_reads = context.isolation() == Isolation::Serializable;
        let applied = self.inner.committed.write_with(move |records| {
            for (id, write) in buffer.writes.iter() {
                let current = records.get(id).map(|r| r.version());
                if current != write.base_version {
                    return Err(stale_write(*id, write.base_version, current));
                }
            }

            if validate_reads {
                for (id, observed) in buffer.reads.iter() {
                    let current = records.get(id).map(|r| r.version());
                    if current != Some(*observed) {
                        return Err(VersaError::new(
                            &format!(
                                "Record {} read at version {} was changed by another context",
                                id, observed
                            ),
                            ErrorKind::Conflict,
                        ));
                    }
                }
            }

            let mut applied: Vec<AppliedWrite<T>> = Vec::with_capacity(buffer.writes.len());
            for (id, write) in buffer.writes.into_iter() {
                let version = write.record.version();
                let previous = records.insert(id, write.record);
                applied.push((id, previous, version));
            }
            Ok(applied)
        })?;

        log::debug!(
            "Committed {} write(s) of context {} to store {}",
            applied.len(),
            context.id(),
            self.inner.name
        );

        let inner = self.inner.clone();
        Ok(Some(Arc::new(move || -> VersaResult<()> {
            inner.undo(&applied);
            Ok(())
        })))
    }

    fn rollback(&self, context: &TransactionContext) -> VersaResult<()> {
        if let Some((_, buffer)) = self.inner.buffers.remove(context.id()) {
            log::debug!(
                "Discarded {} write(s) of context {} in store {}",
                buffer.writes.len(),
                context.id(),
                self.inner.name
            );
        }
        Ok(())
    }

    fn promote(&self, child: &TransactionContext, parent: &TransactionContext) -> VersaResult<()> {
        let child_buffer = match self.inner.buffers.remove(child.id()) {
            Some((_, buffer)) => buffer,
            None => return Ok(()),
        };

        self.inner
            .buffers
            .entry(parent.id().to_string())
            .or_insert_with(ContextBuffer::new)
            .writes
            .extend(child_buffer.writes);
        Ok(())
    }
}

fn not_found(id: RecordId) -> VersaError {
    VersaError::new(&format!("Record {} not found", id), ErrorKind::NotFound)
}

fn version_conflict(id: RecordId, submitted: u64, current: u64) -> VersaError {
    log::debug!(
        "Version conflict on record {}: submitted {}, current {}",
        id,
        submitted,
        current
    );
    VersaError::new(
        &format!(
            "Record {} was modified concurrently (submitted version {}, current version {})",
            id, submitted, current
        ),
        ErrorKind::Conflict,
    )
}

fn stale_write(id: RecordId, base: Option<u64>, current: Option<u64>) -> VersaError {
    let describe = |v: Option<u64>| v.map_or("none".to_string(), |v| v.to_string());
    VersaError::new(
        &format!(
            "Record {} was committed by another context (based on version {}, now {})",
            id,
            describe(base),
            describe(current)
        ),
        ErrorKind::Conflict,
    )
}
