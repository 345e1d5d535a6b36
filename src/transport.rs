//! Boundary to the transport collaborator.
//!
//! A [`Transport`] accepts an ordered batch of [`Request`]s, has the backing
//! store evaluate them as one atomic unit, and returns one [`Reply`] per
//! request in the same order. Connection pooling, retries and timeouts are
//! the transport's business.
//!
//! Requests render to the store's wire format (RESP arrays of bulk strings):
//!
//! ```text
//! Command:  *<1+n>  $len NAME  $len arg ...
//! Script:   *<3+k+n> $7 EVALSHA  $len digest  $len k  $len key ...  $len arg ...
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::reply::Reply;
use crate::script::ScriptHandle;
use crate::Result;

/// Converts a value into a single command argument.
pub trait IntoArg {
    /// Returns the argument bytes.
    fn into_arg(self) -> Bytes;
}

impl IntoArg for Bytes {
    fn into_arg(self) -> Bytes {
        self
    }
}

impl IntoArg for &str {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoArg for String {
    fn into_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoArg for &String {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoArg for &[u8] {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl IntoArg for Vec<u8> {
    fn into_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

macro_rules! impl_into_arg_for_int {
    ($($t:ty),*) => {
        $(impl IntoArg for $t {
            fn into_arg(self) -> Bytes {
                Bytes::from(self.to_string())
            }
        })*
    };
}

impl_into_arg_for_int!(u32, u64, usize, i32, i64, f64);

/// Collects arguments in order.
///
/// # Example
///
/// ```
/// use kvscript::transport::Args;
///
/// let args = Args::new().arg("users").arg(10u32).arg(0u32);
/// assert_eq!(args.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args(Vec<Bytes>);

impl Args {
    /// Creates an empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an argument.
    pub fn arg(mut self, value: impl IntoArg) -> Self {
        self.0.push(value.into_arg());
        self
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the list, returning the raw arguments.
    pub fn into_vec(self) -> Vec<Bytes> {
        self.0
    }
}

impl<A: IntoArg> FromIterator<A> for Args {
    fn from_iter<I: IntoIterator<Item = A>>(iter: I) -> Self {
        Args(iter.into_iter().map(IntoArg::into_arg).collect())
    }
}

/// One operation as sent to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Plain store command.
    Command {
        /// Command name, e.g. `SADD`.
        name: String,
        /// Command arguments.
        args: Vec<Bytes>,
    },
    /// Invocation of a catalog script.
    Script {
        /// Script being invoked.
        script: ScriptHandle,
        /// Key arguments; exactly `script.key_count()` of them.
        keys: Vec<Bytes>,
        /// Remaining arguments.
        args: Vec<Bytes>,
    },
}

impl Request {
    /// Command or script name.
    pub fn name(&self) -> &str {
        match self {
            Request::Command { name, .. } => name,
            Request::Script { script, .. } => script.name(),
        }
    }

    /// Appends the wire form of this request to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Request::Command { name, args } => {
                put_array_header(buf, 1 + args.len());
                put_bulk(buf, name.as_bytes());
                for arg in args {
                    put_bulk(buf, arg);
                }
            }
            Request::Script { script, keys, args } => {
                put_array_header(buf, 3 + keys.len() + args.len());
                put_bulk(buf, b"EVALSHA");
                put_bulk(buf, script.digest().as_bytes());
                put_bulk(buf, keys.len().to_string().as_bytes());
                for arg in keys.iter().chain(args) {
                    put_bulk(buf, arg);
                }
            }
        }
    }

    /// Returns the wire form of this request.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Size of the wire form in bytes.
    pub fn encoded_len(&self) -> usize {
        self.to_bytes().len()
    }
}

fn put_array_header(buf: &mut BytesMut, len: usize) {
    buf.put_u8(b'*');
    buf.put_slice(len.to_string().as_bytes());
    buf.put_slice(b"\r\n");
}

fn put_bulk(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u8(b'$');
    buf.put_slice(data.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
}

/// Delivers batches to the backing store.
pub trait Transport: Send + Sync {
    /// Evaluates `batch` atomically and returns one reply per request, in
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Transport`] if the batch could not be
    /// delivered or answered; in that case none of it was applied.
    fn exec(&self, batch: &[Request]) -> Result<Vec<Reply>>;

    /// Makes scripts known to the store ahead of their first invocation.
    fn load_scripts(&self, _scripts: &[ScriptHandle]) -> Result<()> {
        Ok(())
    }
}
