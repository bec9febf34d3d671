use std::fmt::{Display, Formatter};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identity of a persisted record.
///
/// Ids are positive, handed out in increasing order by the store that
/// persisted the record, and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RecordId(u64);

impl RecordId {
    pub fn new(value: u64) -> Self {
        RecordId(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(value: u64) -> Self {
        RecordId(value)
    }
}

/// A versioned domain value.
///
/// A fresh record has no id and version 0. Saving it assigns an id; every
/// later successful save bumps the version by one. A save carrying a version
/// other than the stored one fails with `Conflict`, so a record read before
/// someone else's save can no longer be saved.
///
/// ```rust,ignore
/// let saved = users.save(Record::new(User::new("alice")))?;
/// assert_eq!(saved.version(), 0);
///
/// let mut updated = saved.clone();
/// updated.data_mut().email = "alice@example.com".into();
/// let updated = users.save(updated)?;
/// assert_eq!(updated.version(), 1);
///
/// // `saved` still carries version 0
/// assert!(users.save(saved).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Record<T> {
    id: Option<RecordId>,
    version: u64,
    data: T,
}

impl<T> Record<T> {
    pub fn new(data: T) -> Self {
        Record {
            id: None,
            version: 0,
            data,
        }
    }

    /// Rebuilds a record from stored parts. Meant for store implementations.
    pub fn from_parts(id: RecordId, version: u64, data: T) -> Self {
        Record {
            id: Some(id),
            version,
            data,
        }
    }

    pub fn id(&self) -> Option<RecordId> {
        self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    /// Same id and version, new data.
    pub fn with_data(self, data: T) -> Self {
        Record {
            id: self.id,
            version: self.version,
            data,
        }
    }

    /// The record as it is stored after a successful save.
    pub(crate) fn next_version(self) -> Self {
        Record {
            id: self.id,
            version: self.version + 1,
            data: self.data,
        }
    }
}
