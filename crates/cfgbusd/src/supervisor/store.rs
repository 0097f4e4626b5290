//! Bounded store of supervised command records.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;

/// State of one supervised command, shared between its worker and pollers.
#[derive(Debug)]
pub struct ProcessRecord {
    id: String,
    state: Mutex<RecordState>,
}

#[derive(Debug, Default)]
struct RecordState {
    records: Vec<Value>,
    retval: i32,
    exited: bool,
}

/// Point-in-time copy of a [`ProcessRecord`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSnapshot {
    /// Record identifier.
    pub id: String,
    /// Records appended by line or result handlers, in insertion order.
    pub records: Vec<Value>,
    /// Exit code; meaningful once `exited` is set.
    pub retval: i32,
    /// Whether the command has terminated.
    pub exited: bool,
}

impl ProcessRecord {
    /// Creates a running record with a fresh 128-bit identifier.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(format!("{:032x}", rand::random::<u128>()))
    }

    pub(crate) fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(RecordState::default()),
        }
    }

    /// Identifier handed back to the caller of `start`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Appends one decoded record.
    pub fn append(&self, record: Value) {
        self.lock().records.push(record);
    }

    /// Copies the current state.
    #[must_use]
    pub fn snapshot(&self) -> ProcessSnapshot {
        let state = self.lock();
        ProcessSnapshot {
            id: self.id.clone(),
            records: state.records.clone(),
            retval: state.retval,
            exited: state.exited,
        }
    }

    /// Whether the supervised command has terminated.
    #[must_use]
    pub fn exited(&self) -> bool {
        self.lock().exited
    }

    pub(crate) fn finish(&self, retval: i32) {
        let mut state = self.lock();
        state.retval = retval;
        state.exited = true;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ProcessRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Insertion-ordered ring of records; the oldest is evicted first.
#[derive(Debug)]
pub struct ProcessStore {
    capacity: usize,
    records: RwLock<VecDeque<Arc<ProcessRecord>>>,
}

impl ProcessStore {
    /// Creates a store holding at most `capacity` records (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Inserts `record`, evicting the oldest entries to make room.
    pub fn insert(&self, record: Arc<ProcessRecord>) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Looks up a record by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<ProcessRecord>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|record| record.id() == id)
            .cloned()
    }

    /// Snapshot of the record with `id`, if it is still stored.
    #[must_use]
    pub fn poll(&self, id: &str) -> Option<ProcessSnapshot> {
        self.get(id).map(|record| record.snapshot())
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
