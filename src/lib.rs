//! Named, append-only files stored in a key-value engine.
//!
//! This crate provides [`BlockFileStore`], a store of files that can be
//! appended to, read at arbitrary positions, renamed, and removed. The
//! files are kept in two keyspaces of a key-value engine: one that maps
//! each file name to the file’s size and one that holds the content cut
//! into blocks of fixed size. The [`store`] module describes how this works
//! in detail.
//!
//! The command line tool `blockfile`, via `main.rs`, is only a very tiny
//! frontend to the [`operation`] module.

pub use self::config::Config;
pub use self::error::{ExitError, Failed};
pub use self::keyspace::{Keyspace, MemoryKeyspace, SledKeyspace};
pub use self::operation::Operation;
pub use self::store::{BlockFileStore, StoreError, StoreStats};

pub mod block;
pub mod config;
pub mod error;
pub mod keyspace;
pub mod log;
pub mod operation;
pub mod store;
pub mod utils;
