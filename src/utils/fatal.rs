//! Utilities for dealing with the file system.
//!
//! Variations on some of the functions provided by `std::fs` that log the
//! `std::io::Error` and return our own [`Failed`] instead. Only the store
//! provisioning and the command line front end use these: the store itself
//! never touches files directly but goes through its keyspaces.

use std::{fs, io};
use std::path::Path;
use log::error;
use crate::error::Failed;


//------------ create_dir_all ------------------------------------------------

/// Creates all directories leading to the given directory or logs an error.
pub fn create_dir_all(path: &Path) -> Result<(), Failed> {
    fs::create_dir_all(path).map_err(|err| {
        error!(
            "Fatal: failed to create directory {}: {}",
            path.display(), err
        );
        Failed
    })
}


//------------ remove_existing_dir_all ---------------------------------------

/// Removes a directory tree if it exists.
///
/// A missing directory is not an error.
pub fn remove_existing_dir_all(path: &Path) -> Result<(), Failed> {
    if let Err(err) = fs::remove_dir_all(path) {
        if err.kind() != io::ErrorKind::NotFound {
            error!(
                "Fatal: failed to remove directory tree {}: {}",
                path.display(), err
            );
            return Err(Failed)
        }
    }
    Ok(())
}


//------------ read_file -----------------------------------------------------

/// Reads a file’s entire content into a vec.
///
/// Errors out if the file cannot be opened for reading or reading fails.
pub fn read_file(path: &Path) -> Result<Vec<u8>, Failed> {
    fs::read(path).map_err(|err| {
        error!(
            "Fatal: failed to read file {}: {}",
            path.display(), err
        );
        Failed
    })
}


//============ Tests =========================================================
