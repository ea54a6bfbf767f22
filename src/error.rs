//! Error types used by the application side of the crate.
//!
//! The store itself reports problems through the detailed
//! [`StoreError`][crate::store::StoreError]. Code that only needs to know
//! that something went wrong uses [`Failed`]: this error indicates that an
//! operation had to be canceled for some reason and callers can assume
//! that all diagnostic information has been logged and they need not do
//! anything further.
//!
//! Secondly, [`ExitError`] is used when the program should be terminated. It
//! provides enough information to determine the exit code of the program.

use log::error;
use crate::keyspace::EngineError;
use crate::store::StoreError;


//------------ Failed --------------------------------------------------------

/// An operation has failed to complete.
///
/// This error types is used to indicate that an operation has failed,
/// diagnostic information has been printed or logged, and the caller can’t
/// really do anything to recover.
#[derive(Clone, Copy, Debug)]
pub struct Failed;

impl From<EngineError> for Failed {
    fn from(err: EngineError) -> Failed {
        error!("Block store engine error: {}", err);
        if let EngineError::Sled(sled::Error::Corruption { .. }) = err {
            error!(
                "Opening the store with the --fresh option \
                 may fix this issue but will delete all files"
            );
        }
        Failed
    }
}

impl From<StoreError> for Failed {
    fn from(err: StoreError) -> Failed {
        log_store_error(err);
        Failed
    }
}

/// Logs a store error together with a hint on how to deal with it.
fn log_store_error(err: StoreError) {
    match err {
        StoreError::Engine(err) => {
            Failed::from(err);
        }
        err if err.is_integrity() => {
            error!("Block store is inconsistent: {}", err);
            error!(
                "Running 'blockfile verify' shows the extent of the \
                 damage, 'blockfile sanitize' removes stray blocks"
            );
        }
        err => error!("{}", err),
    }
}


//------------ ExitError -----------------------------------------------------

/// An error happened that should lead to terminating the program.
#[derive(Clone, Copy, Debug)]
pub enum ExitError {
    /// Something has happened.
    ///
    /// This should be exit status 1.
    Generic,

    /// The store has been found to be inconsistent.
    ///
    /// This should be exit status 2.
    Inconsistent,
}

impl From<Failed> for ExitError {
    fn from(_: Failed) -> ExitError {
        ExitError::Generic
    }
}

impl From<StoreError> for ExitError {
    fn from(err: StoreError) -> ExitError {
        let inconsistent = err.is_integrity();
        log_store_error(err);
        if inconsistent {
            ExitError::Inconsistent
        }
        else {
            ExitError::Generic
        }
    }
}


//============ Tests =========================================================
