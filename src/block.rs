//! Block addressing and the on-disk encodings.
//!
//! A file’s byte stream is cut into blocks of exactly [`BLOCK_SIZE`]
//! octets. Block `i` of a file holds the bytes from `i * BLOCK_SIZE` up to
//! but excluding `(i + 1) * BLOCK_SIZE`. Only the last block of a file can
//! be partially valid; its trailing bytes are stored but never read.
//!
//! # Keys and values
//!
//! The metadata keyspace uses the UTF-8 encoded file name as the key and
//! the file size as an eight octet big-endian unsigned integer as the
//! value.
//!
//! The data keyspace uses the file name followed by an underscore and the
//! decimal block index as the key, e.g., `segments_1_0` for the first block
//! of a file called `segments_1`. Because the index never contains an
//! underscore, the key can be split again at its last underscore.

use std::{fmt, str};


//------------ Constants -----------------------------------------------------

/// The size of a block in octets.
pub const BLOCK_SIZE: usize = 10 * 1024;

/// The size of a block as a `u64` for position arithmetic.
const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

/// The length of an encoded file size.
pub const SIZE_LEN: usize = 8;

/// The separator between file name and block index in a block key.
const SEPARATOR: u8 = b'_';


//------------ BlockPos ------------------------------------------------------

/// The location of a byte position within the blocks of a file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockPos {
    /// The index of the block containing the position.
    pub index: u64,

    /// The offset of the position within that block.
    pub offset: usize,
}

impl BlockPos {
    /// Returns the block location of the given byte position.
    pub fn at(position: u64) -> Self {
        BlockPos {
            index: position / BLOCK_SIZE_U64,
            // The remainder is always smaller than BLOCK_SIZE.
            offset: (position % BLOCK_SIZE_U64) as usize,
        }
    }

    /// Returns the number of octets left in the block from this position.
    pub fn remaining(self) -> usize {
        BLOCK_SIZE - self.offset
    }
}


//------------ block_count ---------------------------------------------------

/// Returns the number of blocks occupied by a file of the given size.
pub fn block_count(size: u64) -> u64 {
    size / BLOCK_SIZE_U64 + u64::from(size % BLOCK_SIZE_U64 != 0)
}


//------------ BlockKey ------------------------------------------------------

/// The key of a block in the data keyspace.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockKey<'a> {
    name: &'a str,
    index: u64,
}

impl<'a> BlockKey<'a> {
    /// Creates the key for block `index` of file `name`.
    pub fn new(name: &'a str, index: u64) -> Self {
        BlockKey { name, index }
    }

    /// Parses a raw key from the data keyspace.
    ///
    /// Returns `None` if the key isn’t UTF-8, lacks the separator, has an
    /// empty name, or if the index isn’t a canonical decimal number.
    pub fn parse(key: &'a [u8]) -> Option<Self> {
        let split = key.iter().rposition(|&ch| ch == SEPARATOR)?;
        let (name, index) = (&key[..split], &key[split + 1..]);
        if name.is_empty() || index.is_empty() {
            return None
        }
        if !index.iter().all(u8::is_ascii_digit) {
            return None
        }
        if index.len() > 1 && index[0] == b'0' {
            return None
        }
        Some(BlockKey {
            name: str::from_utf8(name).ok()?,
            index: str::from_utf8(index).ok()?.parse().ok()?,
        })
    }

    /// Returns the name of the file the block belongs to.
    pub fn name(self) -> &'a str {
        self.name
    }

    /// Returns the index of the block within its file.
    pub fn index(self) -> u64 {
        self.index
    }

    /// Returns the raw key.
    pub fn to_bytes(self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl<'a> fmt::Display for BlockKey<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}{}", self.name, char::from(SEPARATOR), self.index)
    }
}


//------------ Size Codec ----------------------------------------------------

/// Encodes a file size for the metadata keyspace.
pub fn encode_size(size: u64) -> [u8; SIZE_LEN] {
    size.to_be_bytes()
}

/// Decodes a file size from the metadata keyspace.
///
/// Returns `None` if the value doesn’t have exactly [`SIZE_LEN`] octets.
pub fn decode_size(value: &[u8]) -> Option<u64> {
    let value: [u8; SIZE_LEN] = value.try_into().ok()?;
    Some(u64::from_be_bytes(value))
}


//============ Tests =========================================================
