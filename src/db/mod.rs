//! Collection storage.
//!
//! Every collection is a JSON array of objects. Callers never update a single
//! row: they load the whole collection, mutate it in memory and hand the whole
//! collection back. The backend decides how a write is made durable.

pub mod file;
pub mod ids;
pub mod memory;
pub mod models;
pub mod sqlite;
pub mod table;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use thiserror::Error;

pub use self::file::{CrashPoint, JsonFileStore};
pub use self::ids::{next_id, Sequence};
pub use self::memory::MemoryStore;
pub use self::sqlite::SqliteStore;
pub use self::table::{Record, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Users,
    Posts,
    Conferences,
    PendingConferences,
    ForumThreads,
    ForumReplies,
    Notifications,
    Sequences,
}

impl Collection {
    pub const ALL: [Collection; 8] = [
        Collection::Users,
        Collection::Posts,
        Collection::Conferences,
        Collection::PendingConferences,
        Collection::ForumThreads,
        Collection::ForumReplies,
        Collection::Notifications,
        Collection::Sequences,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Posts => "posts",
            Collection::Conferences => "conferences",
            Collection::PendingConferences => "pending_conferences",
            Collection::ForumThreads => "forum_threads",
            Collection::ForumReplies => "forum_replies",
            Collection::Notifications => "admin_notifications",
            Collection::Sequences => "sequences",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Database error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Simulated crash while writing {0}")]
    InjectedCrash(Collection),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A collection write queued for [`DocumentStore::save_batch`].
pub type CollectionWrite = (Collection, Vec<Value>);

/// Backend holding whole collections.
pub trait DocumentStore: Send + Sync {
    /// Load a collection in stored order. Missing, empty or unparseable
    /// collections load as empty.
    fn load(&self, collection: Collection) -> StoreResult<Vec<Value>>;

    /// Replace a collection. No partially written collection is ever visible.
    fn save(&self, collection: Collection, records: &[Value]) -> StoreResult<()>;

    /// Replace several collections. Backends with transactions apply the
    /// batch all-or-nothing; the default writes them one after another.
    fn save_batch(&self, writes: &[CollectionWrite]) -> StoreResult<()> {
        for (collection, records) in writes {
            self.save(*collection, records)?;
        }
        Ok(())
    }
}

/// Shared handle over a backend that serializes read-modify-write cycles
/// within this process.
pub struct Store {
    backend: Arc<dyn DocumentStore>,
    write_lock: Mutex<()>,
}

impl Store {
    pub fn new(backend: Arc<dyn DocumentStore>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn backend(&self) -> &Arc<dyn DocumentStore> {
        &self.backend
    }

    /// Snapshot of a collection for read-only use.
    pub fn table<T: Record>(&self) -> StoreResult<Table<T>> {
        Ok(Table::from_values(self.backend.load(T::COLLECTION)?))
    }

    /// Start a read-modify-write cycle. Holds the write lock until the
    /// transaction is committed or dropped.
    pub fn transaction(&self) -> Transaction<'_> {
        let guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Transaction {
            store: self,
            _guard: guard,
            writes: Vec::new(),
            sequences: None,
        }
    }
}

pub struct Transaction<'a> {
    store: &'a Store,
    _guard: MutexGuard<'a, ()>,
    writes: Vec<CollectionWrite>,
    sequences: Option<Table<Sequence>>,
}

impl<'a> Transaction<'a> {
    pub fn table<T: Record>(&self) -> StoreResult<Table<T>> {
        self.store.table()
    }

    /// Queue the full contents of `table` to be written on commit. Staging the
    /// same collection twice keeps the latest contents.
    pub fn stage<T: Record>(&mut self, table: &Table<T>) -> StoreResult<()> {
        let values = table.to_values()?;
        match self.writes.iter_mut().find(|(c, _)| *c == T::COLLECTION) {
            Some(slot) => slot.1 = values,
            None => self.writes.push((T::COLLECTION, values)),
        }
        Ok(())
    }

    /// Reserve the next id for the collection behind `table`.
    pub fn allocate_id<T: Record>(&mut self, table: &Table<T>) -> StoreResult<u64> {
        let mut sequences = match self.sequences.take() {
            Some(seqs) => seqs,
            None => self.store.table::<Sequence>()?,
        };
        let id = ids::allocate(&mut sequences, T::COLLECTION, table.next_id());
        self.sequences = Some(sequences);
        Ok(id)
    }

    /// Write everything staged. Sequences go first so a crash can only leave
    /// a gap in the ids, never a reissued one.
    pub fn commit(mut self) -> StoreResult<()> {
        if let Some(sequences) = self.sequences.take() {
            let values = sequences.to_values()?;
            self.writes.insert(0, (Collection::Sequences, values));
        }
        if self.writes.is_empty() {
            return Ok(());
        }
        self.store.backend.save_batch(&self.writes)
    }
}
