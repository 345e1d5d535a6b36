//! Error types for the kvscript transaction engine.

use std::fmt;
use std::io;

use crate::reply::ReplyError;

/// The result type used throughout kvscript.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for kvscript operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A catalog script could not be loaded or compiled.
    ///
    /// This is fatal: a process must not run queries against a partially
    /// populated catalog.
    #[error("Script initialization failed for {script}: {reason}")]
    Init {
        /// Name of the script that failed.
        script: String,
        /// Why it failed.
        reason: String,
    },

    /// An operation was built with arguments that violate its contract.
    #[error("Argument contract violated by {operation}: {reason}")]
    ArgumentContract {
        /// Primitive, script or command name.
        operation: String,
        /// What was wrong with the arguments.
        reason: String,
    },

    /// The named script is not registered in the catalog.
    #[error("Unknown script: {0}")]
    UnknownScript(String),

    /// The batch could not be delivered or its replies could not be read.
    ///
    /// No operation of the batch was applied.
    #[error("Transport error: {0}")]
    Transport(String),

    /// One or more operations of an executed batch failed.
    #[error("{}", FailureList(.failures))]
    Execution {
        /// Every failed operation, in enqueue order.
        failures: Vec<OperationFailure>,
    },

    /// An invalid configuration value was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Creates a new initialization error.
    pub fn init(script: impl Into<String>, reason: impl fmt::Display) -> Self {
        Error::Init { script: script.into(), reason: reason.to_string() }
    }

    /// Creates a new argument contract error.
    pub fn contract(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ArgumentContract { operation: operation.into(), reason: reason.into() }
    }

    /// Creates a new transport error.
    pub fn transport(msg: impl fmt::Display) -> Self {
        Error::Transport(msg.to_string())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Returns the per-operation failures of an [`Error::Execution`].
    pub fn failures(&self) -> &[OperationFailure] {
        match self {
            Error::Execution { failures } => failures,
            _ => &[],
        }
    }
}

/// A single operation of an executed batch that did not succeed.
#[derive(Debug)]
pub struct OperationFailure {
    /// Zero-based enqueue position inside the transaction.
    pub position: usize,
    /// Primitive or command name the operation was queued under.
    pub operation: String,
    /// Why the reply could not be used.
    pub error: ReplyError,
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation #{} ({}): {}", self.position, self.operation, self.error)
    }
}

struct FailureList<'a>(&'a [OperationFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} operation(s) failed", self.0.len())?;
        for failure in self.0 {
            write!(f, "; {}", failure)?;
        }
        Ok(())
    }
}
