//! Untyped store replies and the shape inspector used by every decoder.
//!
//! A [`Reply`] mirrors what the backing store sends back for one operation.
//! The `into_*` inspectors either return the expected shape or fail with a
//! [`ReplyError`]; they never coerce one shape into another.

use bytes::Bytes;

/// A raw reply for a single queued operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Absent value (missing key, `false` returned from a script).
    Nil,
    /// Integer reply.
    Integer(i64),
    /// Binary-safe string reply.
    Bulk(Bytes),
    /// Simple status reply such as `OK`.
    Status(String),
    /// Error reply produced by the store for this operation only.
    Error(String),
    /// Ordered array of nested replies.
    Array(Vec<Reply>),
}

/// Why a reply could not be decoded into the requested shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplyError {
    /// The store answered this operation with an error.
    #[error("store error: {0}")]
    Store(String),

    /// The reply had a different shape than the decoder expects.
    #[error("expected {expected} reply, found {found}")]
    UnexpectedShape {
        /// Shape the decoder needed.
        expected: &'static str,
        /// Shape that arrived.
        found: &'static str,
    },

    /// An entity field list did not consist of name/value pairs.
    #[error("entity #{entity} has an odd number of field elements ({len})")]
    OddFieldCount {
        /// Index of the entity inside the reply array.
        entity: usize,
        /// Number of elements in its field list.
        len: usize,
    },

    /// A value that must be text was not valid UTF-8.
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// The model collaborator rejected an entity's fields.
    #[error("failed to materialize {model}: {reason}")]
    Materialize {
        /// Model name the entity belongs to.
        model: String,
        /// Collaborator's explanation.
        reason: String,
    },
}

impl Reply {
    /// Builds a bulk reply from anything convertible to bytes.
    pub fn bulk(value: impl Into<Bytes>) -> Self {
        Reply::Bulk(value.into())
    }

    /// Builds the `OK` status reply.
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    /// Name of this reply's shape, used in decode error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Nil => "nil",
            Reply::Integer(_) => "integer",
            Reply::Bulk(_) => "bulk",
            Reply::Status(_) => "status",
            Reply::Error(_) => "error",
            Reply::Array(_) => "array",
        }
    }

    /// Returns true for an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    fn mismatch(self, expected: &'static str) -> ReplyError {
        match self {
            Reply::Error(msg) => ReplyError::Store(msg),
            other => ReplyError::UnexpectedShape { expected, found: other.kind() },
        }
    }

    /// Expects an integer reply.
    pub fn into_integer(self) -> Result<i64, ReplyError> {
        match self {
            Reply::Integer(n) => Ok(n),
            other => Err(other.mismatch("integer")),
        }
    }

    /// Expects a bulk reply.
    pub fn into_bulk(self) -> Result<Bytes, ReplyError> {
        match self {
            Reply::Bulk(b) => Ok(b),
            other => Err(other.mismatch("bulk")),
        }
    }

    /// Expects a bulk reply holding UTF-8 text.
    pub fn into_string(self) -> Result<String, ReplyError> {
        let bytes = self.into_bulk()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ReplyError::InvalidUtf8("bulk reply"))
    }

    /// Expects an array reply.
    pub fn into_array(self) -> Result<Vec<Reply>, ReplyError> {
        match self {
            Reply::Array(items) => Ok(items),
            other => Err(other.mismatch("array")),
        }
    }

    /// Fails with [`ReplyError::Store`] for error replies and passes every
    /// other reply through untouched.
    pub fn check(self) -> Result<Reply, ReplyError> {
        match self {
            Reply::Error(msg) => Err(ReplyError::Store(msg)),
            other => Ok(other),
        }
    }
}
