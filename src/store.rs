//! Named, append-only files kept in blocks of a key-value store.
//!
//! The store provides files identified by a name that can be appended to,
//! read at arbitrary positions, renamed, and removed. It keeps them in two
//! keyspaces of a key-value engine: the _metadata keyspace_ maps the name
//! of each file to its size, the _data keyspace_ holds the file content
//! cut into blocks of [`BLOCK_SIZE`] octets. See the [`block`] module for
//! how keys and values look like exactly.
//!
//! The metadata keyspace is the single source of truth. A file exists if
//! and only if there is a size for its name, and the blocks of a file are
//! always interpreted relative to that size. Every mutating operation
//! writes blocks before it writes the size and deletes blocks before it
//! deletes the size. A crash in the middle can thus leave blocks nobody
//! refers to but never a size without its blocks. The [`verify`] method
//! finds such orphaned blocks and [`sanitize`] removes them.
//!
//! # Locking
//!
//! All access goes through a single read-write lock covering both
//! keyspaces. Reading operations take it shared and can run concurrently,
//! mutating operations take it exclusively. The lock isn’t re-entrant, so
//! the public methods of [`BlockFileStore`] only acquire the lock and then
//! call the actual implementation on the guarded keyspaces. Composite
//! operations such as [`rename`] and [`clear`] call those implementations
//! directly.
//!
//! [`block`]: crate::block
//! [`verify`]: BlockFileStore::verify
//! [`sanitize`]: BlockFileStore::sanitize
//! [`rename`]: BlockFileStore::rename
//! [`clear`]: BlockFileStore::clear

use std::{cmp, error, fmt, io};
use std::collections::{HashMap, HashSet};
use bytes::Bytes;
use log::{debug, error, info, warn};
use crate::block::{
    BLOCK_SIZE, BlockKey, BlockPos, block_count, decode_size, encode_size
};
use crate::config::Config;
use crate::error::Failed;
use crate::keyspace::{EngineError, Keyspace, MemoryKeyspace, SledKeyspace};
use crate::utils::fatal;
use crate::utils::sync::RwLock;


//------------ BlockFileStore ------------------------------------------------

/// A store of append-only files kept in a key-value engine.
///
/// The type argument `K` selects the engine for the two keyspaces. By
/// default, this is [`SledKeyspace`] and a store is opened from a
/// [`Config`] via [`open`][Self::open]. Any other pair of keyspaces can be
/// used through [`new`][Self::new].
///
/// The store is `Sync` and can be shared between threads.
#[derive(Debug)]
pub struct BlockFileStore<K = SledKeyspace> {
    /// The metadata and data keyspaces behind the store’s lock.
    inner: RwLock<Keyspaces<K>>,
}

/// # Opening and closing
///
impl<K: Keyspace> BlockFileStore<K> {
    /// Creates a store from a metadata keyspace and a data keyspace.
    ///
    /// The two keyspaces must be distinct.
    pub fn new(meta: K, data: K) -> Self {
        BlockFileStore {
            inner: RwLock::new(Keyspaces { meta, data }),
        }
    }

    /// Closes the store.
    ///
    /// Flushes the metadata keyspace first and the data keyspace second.
    /// The data keyspace is flushed even if flushing the metadata keyspace
    /// failed. The first error encountered is returned.
    pub fn close(self) -> Result<(), StoreError> {
        let inner = self.inner.into_inner();
        let meta = inner.meta.flush();
        let data = inner.data.flush();
        meta?;
        data?;
        Ok(())
    }
}

impl BlockFileStore<SledKeyspace> {
    /// The name of the directory of the metadata keyspace.
    pub const META_DIR: &'static str = "_meta";

    /// The name of the directory of the data keyspace.
    pub const DATA_DIR: &'static str = "_data";

    /// Makes sure the store’s directories exist.
    ///
    /// If `config.fresh` is set, any existing content is deleted.
    ///
    /// The function is called implicitly by [`open`][Self::open].
    pub fn init(config: &Config) -> Result<(), Failed> {
        let meta = config.store_dir.join(Self::META_DIR);
        let data = config.store_dir.join(Self::DATA_DIR);
        if config.fresh {
            info!(
                "Deleting all files in store {}.",
                config.store_dir.display()
            );
            fatal::remove_existing_dir_all(&meta)?;
            fatal::remove_existing_dir_all(&data)?;
        }
        fatal::create_dir_all(&meta)?;
        fatal::create_dir_all(&data)
    }

    /// Opens the store in the directory given by `config`.
    ///
    /// Creates the store if it doesn’t exist yet.
    pub fn open(config: &Config) -> Result<Self, Failed> {
        Self::init(config)?;
        let meta = Self::open_keyspace(config, Self::META_DIR)?;
        let data = Self::open_keyspace(config, Self::DATA_DIR)?;
        info!("Opened block store {}.", config.store_dir.display());
        Ok(Self::new(meta, data))
    }

    /// Opens one of the two keyspaces.
    fn open_keyspace(
        config: &Config, dir: &str
    ) -> Result<SledKeyspace, Failed> {
        let path = config.store_dir.join(dir);
        SledKeyspace::open(
            &path, config.cache_capacity, config.flush_every
        ).map_err(|err| {
            error!(
                "Failed to open keyspace at {}: {}",
                path.display(), err
            );
            Failed
        })
    }

    /// Creates a store in a temporary location.
    ///
    /// The store is deleted when it is dropped.
    pub fn temporary() -> Result<Self, StoreError> {
        Ok(Self::new(SledKeyspace::temporary()?, SledKeyspace::temporary()?))
    }
}

impl BlockFileStore<MemoryKeyspace> {
    /// Creates an empty store that lives in memory only.
    pub fn in_memory() -> Self {
        Self::new(MemoryKeyspace::new(), MemoryKeyspace::new())
    }
}

/// # Reading
///
impl<K: Keyspace> BlockFileStore<K> {
    /// Returns whether a file with the given name exists.
    pub fn contains(&self, name: &str) -> Result<bool, StoreError> {
        self.inner.read().contains(name)
    }

    /// Returns the size of a file or `None` if there is no such file.
    pub fn size(&self, name: &str) -> Result<Option<u64>, StoreError> {
        self.inner.read().size(name)
    }

    /// Reads data from a file.
    ///
    /// Reads up to `len` octets of the file starting at `position` into
    /// `buf` starting at `offset`. Returns the number of octets read which
    /// will only be less than `len` if the end of the file was reached.
    ///
    /// Returns `Ok(None)` if `position` is at or beyond the end of the file.
    /// A file that doesn’t exist is treated as empty.
    ///
    /// If `buf` is too short to receive `len` octets at `offset`, returns
    /// [`StoreError::BufferTooSmall`] without reading anything.
    pub fn load(
        &self,
        name: &str,
        position: u64,
        buf: &mut [u8],
        offset: usize,
        len: usize,
    ) -> Result<Option<usize>, StoreError> {
        self.inner.read().load(name, position, buf, offset, len)
    }

    /// Returns the complete content of a file.
    ///
    /// Returns `Ok(None)` if there is no such file.
    pub fn read_to_vec(
        &self, name: &str
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.read().read_to_vec(name)
    }

    /// Returns the names of all files.
    pub fn list_keys(&self) -> Result<HashSet<String>, StoreError> {
        self.inner.read().names()
    }

    /// Checks the consistency of the store.
    ///
    /// Checks that every block implied by the size of each file is present
    /// and complete. Returns an error at the first problem. Blocks not
    /// belonging to any file are merely counted and logged as a warning.
    pub fn verify(&self) -> Result<StoreStats, StoreError> {
        self.inner.read().verify()
    }
}

/// # Writing
///
impl<K: Keyspace> BlockFileStore<K> {
    /// Appends data to a file.
    ///
    /// Appends the `len` octets of `buf` starting at `offset` to the end of
    /// the file called `name`. If there is no such file, it is created.
    pub fn append(
        &self,
        name: &str,
        buf: &[u8],
        offset: usize,
        len: usize,
    ) -> Result<(), StoreError> {
        self.inner.write().append(name, buf, offset, len)
    }

    /// Removes a file.
    ///
    /// Removing a file that doesn’t exist is not an error.
    pub fn remove(&self, name: &str) -> Result<(), StoreError> {
        self.inner.write().remove(name).map(|_| ())
    }

    /// Renames a file.
    ///
    /// Afterwards, the file formerly known as `source` is called `dest`.
    /// A file previously called `dest` is removed. Returns
    /// [`StoreError::NotFound`] if there is no file called `source`.
    pub fn rename(&self, source: &str, dest: &str) -> Result<(), StoreError> {
        self.inner.write().rename(source, dest)
    }

    /// Removes all files.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.inner.write().clear().map(|_| ())
    }

    /// Removes all blocks that don’t belong to a file.
    ///
    /// Returns the number of blocks removed.
    pub fn sanitize(&self) -> Result<usize, StoreError> {
        self.inner.write().sanitize()
    }
}


//------------ Keyspaces -----------------------------------------------------

/// The two keyspaces of a store.
///
/// This type implements all operations of the store. Its methods assume
/// that the caller holds the store’s lock in the appropriate mode.
#[derive(Debug)]
struct Keyspaces<K> {
    /// The metadata keyspace mapping file names to sizes.
    meta: K,

    /// The data keyspace mapping block keys to blocks.
    data: K,
}

impl<K: Keyspace> Keyspaces<K> {
    fn contains(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.meta.get(name.as_bytes())?.is_some())
    }

    fn size(&self, name: &str) -> Result<Option<u64>, StoreError> {
        match self.meta.get(name.as_bytes())? {
            Some(value) => {
                decode_size(&value).map(Some).ok_or_else(|| {
                    StoreError::CorruptSize { name: name.into() }
                })
            }
            None => Ok(None)
        }
    }

    /// Fetches a block that the size of the file says has to exist.
    fn fetch_block(
        &self, name: &str, index: u64
    ) -> Result<Bytes, StoreError> {
        let key = BlockKey::new(name, index).to_bytes();
        let block = match self.data.get(&key)? {
            Some(block) => block,
            None => {
                return Err(StoreError::MissingBlock {
                    name: name.into(), index
                })
            }
        };
        if block.len() != BLOCK_SIZE {
            return Err(StoreError::BadBlockLength {
                name: name.into(), index, len: block.len()
            })
        }
        Ok(block)
    }

    fn load(
        &self,
        name: &str,
        mut position: u64,
        buf: &mut [u8],
        offset: usize,
        len: usize,
    ) -> Result<Option<usize>, StoreError> {
        let target = check_range(buf.len(), offset, len)?;
        let target = &mut buf[target.0..target.1];
        let size = self.size(name)?.unwrap_or(0);
        if position >= size {
            return Ok(None)
        }

        let mut done = 0;
        while done < len && position < size {
            let pos = BlockPos::at(position);
            // All three are bounded by usize values, so the cast is fine.
            let count = cmp::min(
                cmp::min(pos.remaining(), len - done) as u64,
                size - position
            ) as usize;
            let block = self.fetch_block(name, pos.index)?;
            target[done..done + count].copy_from_slice(
                &block[pos.offset..pos.offset + count]
            );
            position += count as u64;
            done += count;
        }
        Ok(Some(done))
    }

    fn read_to_vec(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let size = match self.size(name)? {
            Some(size) => size,
            None => return Ok(None)
        };
        let len = usize::try_from(size).map_err(|_| {
            StoreError::BufferTooSmall {
                offset: 0, len: usize::MAX, capacity: usize::MAX
            }
        })?;
        let mut res = vec![0; len];
        if len > 0 {
            self.load(name, 0, &mut res, 0, len)?;
        }
        Ok(Some(res))
    }

    fn append(
        &self,
        name: &str,
        buf: &[u8],
        offset: usize,
        len: usize,
    ) -> Result<(), StoreError> {
        let (start, end) = check_range(buf.len(), offset, len)?;
        let mut data = &buf[start..end];
        if name.is_empty() {
            return Err(StoreError::InvalidName)
        }

        let old_size = self.size(name)?;
        let mut size = old_size.unwrap_or(0);
        debug!("Appending {} octets to '{}' at {}.", len, name, size);

        while !data.is_empty() {
            let pos = BlockPos::at(size);
            let mut block = if pos.offset == 0 {
                vec![0; BLOCK_SIZE]
            }
            else {
                self.fetch_block(name, pos.index)?.to_vec()
            };
            let count = cmp::min(pos.remaining(), data.len());
            block[pos.offset..pos.offset + count].copy_from_slice(
                &data[..count]
            );
            self.data.put(&BlockKey::new(name, pos.index).to_bytes(), &block)?;
            size += count as u64;
            data = &data[count..];
        }

        // The size goes last so it never covers blocks that aren’t there.
        if old_size != Some(size) {
            self.meta.put(name.as_bytes(), &encode_size(size))?;
        }
        Ok(())
    }

    /// Removes a file.
    ///
    /// Returns whether there was a file to remove.
    fn remove(&self, name: &str) -> Result<bool, StoreError> {
        let size = match self.size(name)? {
            Some(size) => size,
            None => return Ok(false)
        };
        debug!("Removing '{}' of {} octets.", name, size);
        for index in 0..block_count(size) {
            self.data.delete(&BlockKey::new(name, index).to_bytes())?;
        }
        self.meta.delete(name.as_bytes())?;
        Ok(true)
    }

    fn rename(&self, source: &str, dest: &str) -> Result<(), StoreError> {
        if dest.is_empty() {
            return Err(StoreError::InvalidName)
        }
        let size = match self.size(source)? {
            Some(size) => size,
            None => return Err(StoreError::NotFound(source.into()))
        };
        if source == dest {
            return Ok(())
        }
        debug!("Renaming '{}' to '{}'.", source, dest);

        // All source blocks must be intact before dest is touched.
        for index in 0..block_count(size) {
            self.fetch_block(source, index)?;
        }

        // Get rid of the old dest entirely so that none of its blocks
        // beyond the new size stay around.
        self.remove(dest)?;
        for index in 0..block_count(size) {
            let block = self.fetch_block(source, index)?;
            self.data.put(&BlockKey::new(dest, index).to_bytes(), &block)?;
        }
        self.meta.put(dest.as_bytes(), &encode_size(size))?;
        self.remove(source)?;
        Ok(())
    }

    fn names(&self) -> Result<HashSet<String>, StoreError> {
        self.meta.keys().map(|key| {
            String::from_utf8(key?).map_err(|_| StoreError::CorruptName)
        }).collect()
    }

    /// Removes all files and returns how many there were.
    fn clear(&self) -> Result<usize, StoreError> {
        let names = self.names()?;
        for name in &names {
            self.remove(name)?;
        }
        debug!("Cleared {} files.", names.len());
        Ok(names.len())
    }

    /// Returns the sizes of all files.
    fn sizes(&self) -> Result<HashMap<String, u64>, StoreError> {
        let mut res = HashMap::new();
        for name in self.names()? {
            if let Some(size) = self.size(&name)? {
                res.insert(name, size);
            }
        }
        Ok(res)
    }

    /// Returns the keys of all blocks that don’t belong to a file.
    fn orphans(
        &self, sizes: &HashMap<String, u64>
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut res = Vec::new();
        for key in self.data.keys() {
            let key = key?;
            let owned = BlockKey::parse(&key).and_then(|block| {
                sizes.get(block.name()).map(|size| {
                    block.index() < block_count(*size)
                })
            }).unwrap_or(false);
            if !owned {
                res.push(key)
            }
        }
        Ok(res)
    }

    fn verify(&self) -> Result<StoreStats, StoreError> {
        let sizes = self.sizes()?;
        let mut stats = StoreStats::default();
        for (name, size) in &sizes {
            let count = block_count(*size);
            for index in 0..count {
                self.fetch_block(name, index)?;
            }
            stats.files += 1;
            stats.blocks += count;
            stats.bytes += size;
        }
        stats.orphans = self.orphans(&sizes)?.len();
        if stats.orphans > 0 {
            warn!(
                "Found {} blocks not belonging to any file.", stats.orphans
            );
        }
        Ok(stats)
    }

    /// Deletes all orphaned blocks and returns how many there were.
    fn sanitize(&self) -> Result<usize, StoreError> {
        let orphans = self.orphans(&self.sizes()?)?;
        for key in &orphans {
            self.data.delete(key)?;
        }
        if !orphans.is_empty() {
            info!("Removed {} orphaned blocks.", orphans.len());
        }
        Ok(orphans.len())
    }
}


//------------ StoreStats ----------------------------------------------------

/// Statistics collected while verifying a store.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StoreStats {
    /// The number of files.
    pub files: usize,

    /// The number of blocks belonging to files.
    pub blocks: u64,

    /// The sum of all file sizes.
    pub bytes: u64,

    /// The number of blocks not belonging to any file.
    pub orphans: usize,
}

impl StoreStats {
    /// Writes the statistics to `target`, one line per value.
    pub fn write<W: io::Write + ?Sized>(
        &self, target: &mut W
    ) -> io::Result<()> {
        writeln!(target, "  files: {}", self.files)?;
        writeln!(target, "  blocks: {}", self.blocks)?;
        writeln!(target, "  bytes: {}", self.bytes)?;
        writeln!(target, "  orphaned blocks: {}", self.orphans)
    }
}


//------------ Helper Functions ----------------------------------------------

/// Checks that `len` octets starting at `offset` fit into `capacity`.
///
/// Returns the start and end of the range.
fn check_range(
    capacity: usize, offset: usize, len: usize
) -> Result<(usize, usize), StoreError> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok((offset, end)),
        _ => Err(StoreError::BufferTooSmall { offset, len, capacity })
    }
}


//============ Errors ========================================================

//------------ StoreError ----------------------------------------------------

/// An error happened while accessing the store.
#[derive(Debug)]
pub enum StoreError {
    /// The buffer cannot hold the requested range.
    ///
    /// This is a bug in the caller.
    BufferTooSmall {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    /// A file name was empty.
    InvalidName,

    /// The file to rename doesn’t exist.
    NotFound(String),

    /// A block implied by the size of a file is missing.
    MissingBlock {
        name: String,
        index: u64,
    },

    /// A block has the wrong length.
    BadBlockLength {
        name: String,
        index: u64,
        len: usize,
    },

    /// The size entry of a file cannot be decoded.
    CorruptSize {
        name: String,
    },

    /// A name in the metadata keyspace isn’t valid UTF-8.
    CorruptName,

    /// The key-value engine failed.
    Engine(EngineError),
}

impl StoreError {
    /// Returns whether the error was caused by the caller.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            *self,
            StoreError::BufferTooSmall { .. }
            | StoreError::InvalidName
            | StoreError::NotFound(_)
        )
    }

    /// Returns whether the error means the store is inconsistent.
    pub fn is_integrity(&self) -> bool {
        matches!(
            *self,
            StoreError::MissingBlock { .. }
            | StoreError::BadBlockLength { .. }
            | StoreError::CorruptSize { .. }
            | StoreError::CorruptName
        )
    }
}

impl From<EngineError> for StoreError {
    fn from(err: EngineError) -> Self {
        StoreError::Engine(err)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            StoreError::BufferTooSmall { offset, len, capacity } => {
                write!(
                    f,
                    "buffer of {} octets too small for {} octets at {}",
                    capacity, len, offset
                )
            }
            StoreError::InvalidName => f.write_str("empty file name"),
            StoreError::NotFound(ref name) => {
                write!(f, "file '{}' not found", name)
            }
            StoreError::MissingBlock { ref name, index } => {
                write!(f, "block {} of file '{}' is missing", index, name)
            }
            StoreError::BadBlockLength { ref name, index, len } => {
                write!(
                    f,
                    "block {} of file '{}' has {} octets instead of {}",
                    index, name, len, BLOCK_SIZE
                )
            }
            StoreError::CorruptSize { ref name } => {
                write!(f, "size of file '{}' is corrupt", name)
            }
            StoreError::CorruptName => {
                f.write_str("file name is not valid UTF-8")
            }
            StoreError::Engine(ref err) => err.fmt(f),
        }
    }
}

impl error::Error for StoreError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            StoreError::Engine(ref err) => Some(err),
            _ => None
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::{io, iter};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use rand::{Rng, RngCore};
    use crate::keyspace::Keys;

    fn payload(len: usize) -> Vec<u8> {
        let mut res = vec![0; len];
        rand::thread_rng().fill_bytes(&mut res);
        res
    }

    fn append_all<K: Keyspace>(
        store: &BlockFileStore<K>, name: &str, data: &[u8]
    ) {
        store.append(name, data, 0, data.len()).unwrap()
    }

    fn block_keys(store: &BlockFileStore<MemoryKeyspace>) -> Vec<String> {
        store.inner.read().data.keys().map(|key| {
            String::from_utf8(key.unwrap()).unwrap()
        }).collect()
    }

    fn raw_block(
        store: &BlockFileStore<MemoryKeyspace>, key: &str
    ) -> Bytes {
        store.inner.read().data.get(key.as_bytes()).unwrap().unwrap()
    }


    //--- FailingKeyspace

    #[derive(Debug, Default)]
    struct FailState {
        fail: AtomicBool,
        flushed: AtomicBool,
    }

    #[derive(Debug, Default)]
    struct FailingKeyspace {
        entries: MemoryKeyspace,
        state: Arc<FailState>,
    }

    impl FailingKeyspace {
        fn check(&self) -> Result<(), EngineError> {
            if self.state.fail.load(Ordering::Relaxed) {
                Err(io::Error::new(io::ErrorKind::Other, "injected").into())
            }
            else {
                Ok(())
            }
        }
    }

    impl Keyspace for FailingKeyspace {
        fn get(&self, key: &[u8]) -> Result<Option<Bytes>, EngineError> {
            self.check()?;
            self.entries.get(key)
        }

        fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
            self.check()?;
            self.entries.put(key, value)
        }

        fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
            self.check()?;
            self.entries.delete(key)
        }

        fn keys(&self) -> Keys<'_> {
            match self.check() {
                Ok(()) => self.entries.keys(),
                Err(err) => Box::new(iter::once(Err(err))),
            }
        }

        fn flush(&self) -> Result<(), EngineError> {
            self.state.flushed.store(true, Ordering::Relaxed);
            self.check()
        }
    }


    //--- Scenarios

    #[test]
    fn single_large_append() {
        let store = BlockFileStore::in_memory();
        let data = payload(25000);
        append_all(&store, "f", &data);

        assert_eq!(store.size("f").unwrap(), Some(25000));
        assert!(store.contains("f").unwrap());
        assert_eq!(block_keys(&store), ["f_0", "f_1", "f_2"]);
        assert_eq!(raw_block(&store, "f_0").as_ref(), &data[..10240]);
        assert_eq!(raw_block(&store, "f_1").as_ref(), &data[10240..20480]);
        let last = raw_block(&store, "f_2");
        assert_eq!(last.len(), BLOCK_SIZE);
        assert_eq!(&last[..4520], &data[20480..]);
        assert!(last[4520..].iter().all(|&ch| ch == 0));

        let mut buf = vec![0; 25000];
        assert_eq!(
            store.load("f", 0, &mut buf, 0, 25000).unwrap(), Some(25000)
        );
        assert_eq!(buf, data);
        assert_eq!(store.read_to_vec("f").unwrap(), Some(data.clone()));

        // Short read at the end of the file.
        let mut buf = vec![0; 10000];
        assert_eq!(
            store.load("f", 20000, &mut buf, 0, 10000).unwrap(), Some(5000)
        );
        assert_eq!(&buf[..5000], &data[20000..]);
        assert!(buf[5000..].iter().all(|&ch| ch == 0));
    }

    #[test]
    fn append_across_block_boundary() {
        let store = BlockFileStore::in_memory();
        let first = payload(5000);
        let second = payload(10000);
        append_all(&store, "f", &first);
        assert_eq!(block_keys(&store), ["f_0"]);
        append_all(&store, "f", &second);

        assert_eq!(store.size("f").unwrap(), Some(15000));
        assert_eq!(block_keys(&store), ["f_0", "f_1"]);
        let block = raw_block(&store, "f_0");
        assert_eq!(&block[..5000], first.as_slice());
        assert_eq!(&block[5000..], &second[..5240]);
        assert_eq!(&raw_block(&store, "f_1")[..4760], &second[5240..]);

        let mut buf = [0u8; 10];
        assert_eq!(store.load("f", 10235, &mut buf, 0, 10).unwrap(), Some(10));
        assert_eq!(&buf[..5], &second[5235..5240]);
        assert_eq!(&buf[5..], &second[5240..5245]);
    }

    #[test]
    fn chunked_appends_read_back() {
        let mut rng = rand::thread_rng();
        let store = BlockFileStore::in_memory();
        let data = payload(rng.gen_range(40_000..80_000));

        let mut pos = 0;
        let mut appends = 0;
        while pos < data.len() {
            let len = rng.gen_range(0..3 * BLOCK_SIZE).min(data.len() - pos);
            // Append from the middle of a larger buffer to use the offset.
            let mut buf = vec![0xa5; len + 7];
            buf[3..3 + len].copy_from_slice(&data[pos..pos + len]);
            store.append("f", &buf, 3, len).unwrap();
            pos += len;
            appends += 1;
            assert_eq!(store.size("f").unwrap(), Some(pos as u64));
        }
        assert!(appends > 1);
        assert_eq!(store.read_to_vec("f").unwrap(), Some(data.clone()));

        for _ in 0..100 {
            let position = rng.gen_range(0..data.len());
            let len = rng.gen_range(1..2 * BLOCK_SIZE);
            let mut buf = vec![0; len + 5];
            let read = store.load(
                "f", position as u64, &mut buf, 5, len
            ).unwrap().unwrap();
            assert_eq!(read, len.min(data.len() - position));
            assert_eq!(&buf[5..5 + read], &data[position..position + read]);
        }
    }

    #[test]
    fn end_of_file() {
        let store = BlockFileStore::in_memory();
        let mut buf = [0u8; 16];
        assert_eq!(store.load("missing", 0, &mut buf, 0, 16).unwrap(), None);
        assert_eq!(store.size("missing").unwrap(), None);
        assert!(!store.contains("missing").unwrap());
        assert_eq!(store.read_to_vec("missing").unwrap(), None);

        append_all(&store, "f", b"hello");
        assert_eq!(store.load("f", 5, &mut buf, 0, 16).unwrap(), None);
        assert_eq!(store.load("f", 500, &mut buf, 0, 16).unwrap(), None);
        assert_eq!(store.load("f", 4, &mut buf, 0, 0).unwrap(), Some(0));
        assert_eq!(store.load("f", 3, &mut buf, 8, 8).unwrap(), Some(2));
        assert_eq!(&buf[8..10], b"lo");
    }

    #[test]
    fn zero_length_append() {
        let store = BlockFileStore::in_memory();
        store.append("empty", b"", 0, 0).unwrap();
        assert_eq!(store.size("empty").unwrap(), Some(0));
        assert!(block_keys(&store).is_empty());
        assert_eq!(store.read_to_vec("empty").unwrap(), Some(Vec::new()));

        append_all(&store, "f", b"abc");
        store.append("f", b"xyz", 3, 0).unwrap();
        assert_eq!(store.size("f").unwrap(), Some(3));
        assert_eq!(block_keys(&store), ["f_0"]);
    }

    #[test]
    fn contract_violations() {
        let store = BlockFileStore::in_memory();
        append_all(&store, "f", b"data");
        let mut buf = [0u8; 10];

        let err = store.load("f", 0, &mut buf, 5, 6).unwrap_err();
        assert!(matches!(
            err, StoreError::BufferTooSmall { offset: 5, len: 6, capacity: 10 }
        ));
        assert!(err.is_contract_violation());
        assert!(!err.is_integrity());

        // Checked before the end of file.
        assert!(matches!(
            store.load("missing", 0, &mut buf, 0, 11),
            Err(StoreError::BufferTooSmall { .. })
        ));
        assert!(matches!(
            store.load("f", 0, &mut buf, usize::MAX, 1),
            Err(StoreError::BufferTooSmall { .. })
        ));
        assert!(matches!(
            store.append("f", b"abc", 2, 2),
            Err(StoreError::BufferTooSmall { .. })
        ));
        assert!(matches!(
            store.append("", b"abc", 0, 3), Err(StoreError::InvalidName)
        ));
        assert!(matches!(
            store.rename("f", ""), Err(StoreError::InvalidName)
        ));
        assert_eq!(store.size("f").unwrap(), Some(4));
        assert_eq!(store.list_keys().unwrap().len(), 1);
    }

    #[test]
    fn remove_files() {
        let store = BlockFileStore::in_memory();
        store.remove("missing").unwrap();

        append_all(&store, "f", &payload(25000));
        append_all(&store, "g", b"keep");
        store.remove("f").unwrap();
        assert!(!store.contains("f").unwrap());
        assert_eq!(block_keys(&store), ["g_0"]);
        assert_eq!(store.read_to_vec("g").unwrap(), Some(b"keep".to_vec()));

        // A removed file starts from scratch.
        append_all(&store, "f", b"new");
        assert_eq!(store.read_to_vec("f").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn rename_files() {
        let store = BlockFileStore::in_memory();
        let data = payload(12000);
        append_all(&store, "a", &data);
        store.rename("a", "b").unwrap();
        assert!(!store.contains("a").unwrap());
        assert_eq!(store.read_to_vec("b").unwrap(), Some(data.clone()));
        assert_eq!(block_keys(&store), ["b_0", "b_1"]);

        // Renaming to itself changes nothing.
        store.rename("b", "b").unwrap();
        assert_eq!(store.read_to_vec("b").unwrap(), Some(data.clone()));

        // A missing source leaves the destination alone.
        let err = store.rename("missing", "b").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref name) if name == "missing"));
        assert!(err.is_contract_violation());
        assert_eq!(store.read_to_vec("b").unwrap(), Some(data));
    }

    #[test]
    fn rename_over_larger_file() {
        let store = BlockFileStore::in_memory();
        append_all(&store, "dest", &payload(25000));
        append_all(&store, "src", b"small");
        store.rename("src", "dest").unwrap();

        assert_eq!(store.size("dest").unwrap(), Some(5));
        assert_eq!(store.read_to_vec("dest").unwrap(), Some(b"small".to_vec()));
        assert_eq!(block_keys(&store), ["dest_0"]);
        assert_eq!(
            store.list_keys().unwrap(),
            HashSet::from(["dest".to_string()])
        );
        assert_eq!(store.verify().unwrap().orphans, 0);
    }

    #[test]
    fn list_and_clear() {
        let store = BlockFileStore::in_memory();
        assert!(store.list_keys().unwrap().is_empty());
        store.clear().unwrap();

        append_all(&store, "segments_1", &payload(11000));
        append_all(&store, "_0.cfs", b"x");
        append_all(&store, "_0", b"y");
        let names: HashSet<_> = ["segments_1", "_0.cfs", "_0"].iter().map(|s| {
            s.to_string()
        }).collect();
        assert_eq!(store.list_keys().unwrap(), names);

        store.clear().unwrap();
        assert!(store.list_keys().unwrap().is_empty());
        assert!(store.inner.read().meta.is_empty());
        assert!(store.inner.read().data.is_empty());
    }


    //--- Integrity

    #[test]
    fn missing_block() {
        let store = BlockFileStore::in_memory();
        append_all(&store, "f", &payload(25000));
        store.inner.read().data.delete(b"f_1").unwrap();

        let mut buf = vec![0; 25000];
        // Reading from the first block alone is still fine.
        assert_eq!(store.load("f", 0, &mut buf, 0, 100).unwrap(), Some(100));
        let err = store.load("f", 0, &mut buf, 0, 25000).unwrap_err();
        assert!(matches!(
            err, StoreError::MissingBlock { ref name, index: 1 } if name == "f"
        ));
        assert!(err.is_integrity());
        assert!(matches!(
            store.verify(), Err(StoreError::MissingBlock { index: 1, .. })
        ));
        assert!(matches!(
            store.rename("f", "g"), Err(StoreError::MissingBlock { .. })
        ));
    }

    #[test]
    fn bad_block_length() {
        let store = BlockFileStore::in_memory();
        append_all(&store, "f", b"abc");
        store.inner.read().data.put(b"f_0", b"abc").unwrap();

        let mut buf = [0u8; 3];
        let err = store.load("f", 0, &mut buf, 0, 3).unwrap_err();
        assert!(matches!(
            err, StoreError::BadBlockLength { index: 0, len: 3, .. }
        ));
        assert_eq!(
            err.to_string(),
            format!("block 0 of file 'f' has 3 octets instead of {}", BLOCK_SIZE)
        );
        assert!(matches!(
            store.append("f", b"d", 0, 1),
            Err(StoreError::BadBlockLength { .. })
        ));
        assert_eq!(store.size("f").unwrap(), Some(3));

        // Overlong blocks are rejected just the same.
        store.inner.read().data.put(
            b"f_0", &vec![0; BLOCK_SIZE + 1]
        ).unwrap();
        let err = store.load("f", 0, &mut buf, 0, 3).unwrap_err();
        assert!(matches!(
            err, StoreError::BadBlockLength { index: 0, len, .. }
                if len == BLOCK_SIZE + 1
        ));
        assert!(err.is_integrity());
        assert!(matches!(
            store.verify(), Err(StoreError::BadBlockLength { .. })
        ));
    }

    #[test]
    fn rename_keeps_dest_on_damaged_source() {
        let store = BlockFileStore::in_memory();
        append_all(&store, "dest", b"precious");
        append_all(&store, "src", &payload(15000));
        store.inner.read().data.delete(b"src_1").unwrap();

        assert!(matches!(
            store.rename("src", "dest"),
            Err(StoreError::MissingBlock { ref name, index: 1 })
                if name == "src"
        ));
        assert_eq!(
            store.read_to_vec("dest").unwrap().as_deref(),
            Some(b"precious".as_ref())
        );
        assert_eq!(store.size("src").unwrap(), Some(15000));
        assert!(store.inner.read().data.get(b"dest_1").unwrap().is_none());
        assert_eq!(block_keys(&store), ["dest_0", "src_0"]);
    }

    #[test]
    fn corrupt_metadata() {
        let store = BlockFileStore::in_memory();
        store.inner.read().meta.put(b"f", &[0, 1, 2]).unwrap();
        let err = store.size("f").unwrap_err();
        assert!(matches!(err, StoreError::CorruptSize { ref name } if name == "f"));
        assert!(err.is_integrity());
        // Existence only looks at the key.
        assert!(store.contains("f").unwrap());
        assert!(!store.contains("g").unwrap());

        store.inner.read().meta.put(b"\xff", &encode_size(0)).unwrap();
        assert!(matches!(store.list_keys(), Err(StoreError::CorruptName)));
    }

    #[test]
    fn engine_errors() {
        let state = Arc::new(FailState::default());
        let store = BlockFileStore::new(
            FailingKeyspace::default(),
            FailingKeyspace {
                entries: MemoryKeyspace::new(), state: state.clone()
            },
        );
        append_all(&store, "f", b"abc");

        state.fail.store(true, Ordering::Relaxed);
        let err = store.append("f", b"def", 0, 3).unwrap_err();
        assert!(matches!(err, StoreError::Engine(EngineError::Io(_))));
        assert!(!err.is_integrity());
        assert!(!err.is_contract_violation());
        assert!(matches!(store.remove("f"), Err(StoreError::Engine(_))));
        assert!(matches!(store.verify(), Err(StoreError::Engine(_))));

        // Failed writes never got to the metadata.
        state.fail.store(false, Ordering::Relaxed);
        assert_eq!(store.read_to_vec("f").unwrap(), Some(b"abc".to_vec()));
    }

    #[test]
    fn close_flushes_both() {
        let meta = Arc::new(FailState::default());
        let data = Arc::new(FailState::default());
        meta.fail.store(true, Ordering::Relaxed);
        let store = BlockFileStore::new(
            FailingKeyspace {
                entries: MemoryKeyspace::new(), state: meta.clone()
            },
            FailingKeyspace {
                entries: MemoryKeyspace::new(), state: data.clone()
            },
        );
        assert!(matches!(store.close(), Err(StoreError::Engine(_))));
        assert!(meta.flushed.load(Ordering::Relaxed));
        assert!(data.flushed.load(Ordering::Relaxed));
    }

    #[test]
    fn verify_and_sanitize() {
        let store = BlockFileStore::in_memory();
        let data = payload(25000);
        append_all(&store, "a", &data);
        append_all(&store, "b", b"tiny");
        {
            let inner = store.inner.read();
            inner.data.put(b"gone_0", &[0; BLOCK_SIZE]).unwrap();
            inner.data.put(b"a_3", &[0; BLOCK_SIZE]).unwrap();
            inner.data.put(b"junk", b"junk").unwrap();
        }

        let stats = store.verify().unwrap();
        assert_eq!(
            stats,
            StoreStats { files: 2, blocks: 4, bytes: 25004, orphans: 3 }
        );
        let mut report = Vec::new();
        stats.write(&mut report).unwrap();
        assert_eq!(
            String::from_utf8(report).unwrap(),
            "  files: 2\n  blocks: 4\n  bytes: 25004\n  orphaned blocks: 3\n"
        );
        assert_eq!(store.sanitize().unwrap(), 3);
        assert_eq!(store.verify().unwrap().orphans, 0);
        assert_eq!(store.sanitize().unwrap(), 0);
        assert_eq!(block_keys(&store), ["a_0", "a_1", "a_2", "b_0"]);
        assert_eq!(store.read_to_vec("a").unwrap(), Some(data));
    }


    //--- Concurrency

    #[test]
    fn concurrent_readers() {
        let store = BlockFileStore::in_memory();
        let data = payload(30000);
        append_all(&store, "f", &data);

        crossbeam_utils::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|_| {
                    let mut rng = rand::thread_rng();
                    for _ in 0..50 {
                        let position = rng.gen_range(0..data.len());
                        let mut buf = vec![0; 1000];
                        let read = store.load(
                            "f", position as u64, &mut buf, 0, 1000
                        ).unwrap().unwrap();
                        assert_eq!(
                            &buf[..read], &data[position..position + read]
                        );
                    }
                });
            }
        }).unwrap();
    }

    #[test]
    fn exclusive_writers() {
        const CHUNK: usize = 3000;
        const WRITERS: u8 = 4;
        const ROUNDS: usize = 25;

        let store = BlockFileStore::in_memory();
        crossbeam_utils::thread::scope(|scope| {
            for tag in 1..=WRITERS {
                let store = &store;
                scope.spawn(move |_| {
                    let chunk = [tag; CHUNK];
                    for _ in 0..ROUNDS {
                        store.append("log", &chunk, 0, CHUNK).unwrap();
                    }
                });
            }
            scope.spawn(|_| {
                for _ in 0..ROUNDS {
                    // Readers only ever see whole chunks.
                    if let Some(content) = store.read_to_vec("log").unwrap() {
                        assert_eq!(content.len() % CHUNK, 0);
                        for chunk in content.chunks(CHUNK) {
                            assert!(chunk.iter().all(|&ch| ch == chunk[0]));
                        }
                    }
                }
            });
        }).unwrap();

        let content = store.read_to_vec("log").unwrap().unwrap();
        assert_eq!(content.len(), CHUNK * ROUNDS * usize::from(WRITERS));
        let mut counts = [0usize; WRITERS as usize + 1];
        for chunk in content.chunks(CHUNK) {
            assert!(chunk.iter().all(|&ch| ch == chunk[0]));
            counts[usize::from(chunk[0])] += 1;
        }
        assert_eq!(counts[0], 0);
        assert!(counts[1..].iter().all(|&count| count == ROUNDS));
    }


    //--- Sled

    #[test]
    fn sled_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store_dir = dir.path().join("store");
        let data = payload(15000);

        let store = BlockFileStore::open(&config).unwrap();
        append_all(&store, "f", &data);
        store.close().unwrap();
        assert!(config.store_dir.join(BlockFileStore::META_DIR).is_dir());
        assert!(config.store_dir.join(BlockFileStore::DATA_DIR).is_dir());

        let store = BlockFileStore::open(&config).unwrap();
        assert_eq!(store.read_to_vec("f").unwrap(), Some(data));
        store.close().unwrap();

        config.fresh = true;
        let store = BlockFileStore::open(&config).unwrap();
        assert!(store.list_keys().unwrap().is_empty());
        store.close().unwrap();
    }

    #[test]
    fn temporary_sled_store() {
        let store = BlockFileStore::temporary().unwrap();
        append_all(&store, "f", b"hello");
        store.rename("f", "g").unwrap();
        assert_eq!(store.read_to_vec("g").unwrap(), Some(b"hello".to_vec()));
        assert_eq!(store.verify().unwrap().files, 1);
    }
}
