//! Error types used by multiple modules.
//!
//! There are two error types that are used widely within the crate.
//!
//! The most important is [`Failed`]. This error indicates that an
//! operation had to be canceled for some reason and callers can assume
//! that all diagnostic information has been logged and they need not do
//! anything further.
//!
//! Secondly, [`ExitError`] is used when the program should be terminated. It
//! provides enough information to determine the exit code of the program.
//!
//! Errors that describe what went wrong with an individual chain are not
//! in here. They live with the code producing them and travel through the
//! fixer’s error channel instead.

use std::fmt;


//------------ Failed --------------------------------------------------------

/// An operation has failed to complete.
///
/// This error types is used to indicate that an operation has failed,
/// diagnostic information has been printed or logged, and the caller can’t
/// really do anything to recover.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Failed;

impl fmt::Display for Failed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("operation failed")
    }
}

impl std::error::Error for Failed { }


//------------ ExitError -----------------------------------------------------

/// An error happened that should lead to terminating the program.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitError {
    /// Something has happened.
    ///
    /// This should be exit status 1.
    Generic,

    /// At least one of the submitted chains could not be fixed.
    ///
    /// This should be exit status 2.
    Unfixed,
}

impl ExitError {
    /// Returns the process exit code for the error.
    pub fn exit_code(self) -> i32 {
        match self {
            ExitError::Generic => 1,
            ExitError::Unfixed => 2,
        }
    }
}

impl From<Failed> for ExitError {
    fn from(_: Failed) -> ExitError {
        ExitError::Generic
    }
}
