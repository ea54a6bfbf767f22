//! The key-value engines underneath a block file store.
//!
//! The store keeps its data in two separate keyspaces, one for the file
//! sizes and one for the blocks. All it needs from a keyspace is defined
//! by the [`Keyspace`] trait: getting, putting, and deleting single keys,
//! iterating over all keys in order, and flushing to stable storage.
//!
//! There are two implementations. [`SledKeyspace`] keeps the keyspace in
//! a sled database in a directory of its own and is what the store uses
//! normally. [`MemoryKeyspace`] keeps everything in a map and is useful
//! for tests and short-lived scratch stores.

use std::{error, fmt, io};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use bytes::Bytes;
use crate::utils::sync::Mutex;


//------------ Keyspace ------------------------------------------------------

/// A namespace of binary keys and values.
///
/// Each method is atomic with respect to the single key it touches. There
/// are no multi-key transactions: the store provides the atomicity of its
/// own operations through its lock.
pub trait Keyspace: Send + Sync {
    /// Returns the value for `key` or `None` if there is no such key.
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, EngineError>;

    /// Sets the value for `key`, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError>;

    /// Deletes `key`. Deleting a missing key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(), EngineError>;

    /// Returns an iterator over all keys in ascending order.
    ///
    /// Each call starts a new iteration.
    fn keys(&self) -> Keys<'_>;

    /// Makes sure everything written so far is on stable storage.
    fn flush(&self) -> Result<(), EngineError>;
}

/// The iterator returned by [`Keyspace::keys`].
pub type Keys<'a> = Box<
    dyn Iterator<Item = Result<Vec<u8>, EngineError>> + 'a
>;


//------------ SledKeyspace --------------------------------------------------

/// A keyspace kept in a sled database.
///
/// Each keyspace uses a database of its own, i.e., a directory of its own.
/// The handle can be cloned cheaply; all clones refer to the same database.
#[derive(Clone, Debug)]
pub struct SledKeyspace {
    db: sled::Db,
}

impl SledKeyspace {
    /// Opens the keyspace in the directory at `path`.
    ///
    /// The directory is created if it doesn’t exist yet. The database uses
    /// a page cache of `cache_capacity` octets. If `flush_every` is given,
    /// sled flushes in the background at this interval.
    pub fn open(
        path: &Path,
        cache_capacity: u64,
        flush_every: Option<Duration>,
    ) -> Result<Self, EngineError> {
        let flush_every = flush_every.map(|every| {
            u64::try_from(every.as_millis()).unwrap_or(u64::MAX)
        });
        sled::Config::new()
            .path(path)
            .cache_capacity(cache_capacity)
            .flush_every_ms(flush_every)
            .open()
            .map(|db| SledKeyspace { db })
            .map_err(Into::into)
    }

    /// Creates a keyspace that is removed when the last handle is dropped.
    pub fn temporary() -> Result<Self, EngineError> {
        sled::Config::new()
            .temporary(true)
            .open()
            .map(|db| SledKeyspace { db })
            .map_err(Into::into)
    }
}

impl Keyspace for SledKeyspace {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, EngineError> {
        Ok(self.db.get(key)?.map(|value| Bytes::copy_from_slice(&value)))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        self.db.remove(key)?;
        Ok(())
    }

    fn keys(&self) -> Keys<'_> {
        Box::new(self.db.iter().keys().map(|item| {
            item.map(|key| key.to_vec()).map_err(Into::into)
        }))
    }

    fn flush(&self) -> Result<(), EngineError> {
        self.db.flush()?;
        Ok(())
    }
}


//------------ MemoryKeyspace ------------------------------------------------

/// A keyspace kept in memory.
///
/// Nothing is ever persisted, flushing does nothing.
#[derive(Debug, Default)]
pub struct MemoryKeyspace {
    entries: Mutex<BTreeMap<Vec<u8>, Bytes>>,
}

impl MemoryKeyspace {
    /// Creates a new, empty keyspace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns whether the keyspace is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Keyspace for MemoryKeyspace {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>, EngineError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.entries.lock().insert(
            key.to_vec(), Bytes::copy_from_slice(value)
        );
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Keys<'_> {
        // Snapshot the keys so the lock isn’t held during iteration.
        let keys: Vec<_> = self.entries.lock().keys().cloned().collect();
        Box::new(keys.into_iter().map(Ok))
    }

    fn flush(&self) -> Result<(), EngineError> {
        Ok(())
    }
}


//------------ EngineError ---------------------------------------------------

/// The key-value engine failed.
#[derive(Debug)]
pub enum EngineError {
    /// The sled database reported an error.
    Sled(sled::Error),

    /// Some other IO error happened.
    Io(io::Error),
}

impl From<sled::Error> for EngineError {
    fn from(err: sled::Error) -> Self {
        match err {
            sled::Error::Io(err) => EngineError::Io(err),
            err => EngineError::Sled(err),
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        EngineError::Io(err)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            EngineError::Sled(ref err) => err.fmt(f),
            EngineError::Io(ref err) => err.fmt(f),
        }
    }
}

impl error::Error for EngineError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            EngineError::Sled(ref err) => Some(err),
            EngineError::Io(ref err) => Some(err),
        }
    }
}


//============ Tests =========================================================
