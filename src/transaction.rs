//! Transactions: ordered batches of commands and script invocations that
//! execute as one atomic request.
//!
//! # Lifecycle
//!
//! ```text
//! Client::transaction()  ->  enqueue / enqueue_script / query primitives
//!                        ->  execute(self)   (sends once, decodes in order)
//! ```
//!
//! Argument contracts are checked at enqueue time, so a malformed operation
//! never reaches the transport. `execute` consumes the transaction; a
//! transaction can therefore never be sent twice.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use crate::config::Options;
use crate::error::OperationFailure;
use crate::handler::ReplyHandler;
use crate::script::{Catalog, ScriptHandle};
use crate::transport::{Args, IntoArg, Request, Transport};
use crate::{Error, Result};

/// Creates transactions bound to a catalog and a transport.
///
/// Cloning a client is cheap; clones share the catalog and transport.
#[derive(Clone)]
pub struct Client {
    catalog: Arc<Catalog>,
    transport: Arc<dyn Transport>,
    max_batch_size: usize,
}

impl Client {
    /// Creates a client with default options.
    pub fn new(catalog: Arc<Catalog>, transport: Arc<dyn Transport>) -> Self {
        Self { catalog, transport, max_batch_size: Options::default().max_batch_size }
    }

    /// Creates a client with explicit options.
    pub fn with_options(
        catalog: Arc<Catalog>,
        transport: Arc<dyn Transport>,
        options: &Options,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self { catalog, transport, max_batch_size: options.max_batch_size })
    }

    /// The shared script catalog.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Starts a new, empty transaction.
    pub fn transaction(&self) -> Transaction {
        Transaction {
            catalog: Arc::clone(&self.catalog),
            transport: Arc::clone(&self.transport),
            max_batch_size: self.max_batch_size,
            operations: Vec::new(),
        }
    }
}

/// Key and non-key arguments of one script invocation.
///
/// # Example
///
/// ```
/// use kvscript::ScriptCall;
///
/// let call = ScriptCall::new().key("User:all").arg("User").arg(10u32).arg(0u32);
/// assert_eq!(call.key_len(), 1);
/// assert_eq!(call.arg_len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptCall {
    keys: Vec<Bytes>,
    args: Vec<Bytes>,
}

impl ScriptCall {
    /// Creates an invocation with no arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a key argument.
    pub fn key(mut self, key: impl IntoArg) -> Self {
        self.keys.push(key.into_arg());
        self
    }

    /// Appends a non-key argument.
    pub fn arg(mut self, value: impl IntoArg) -> Self {
        self.args.push(value.into_arg());
        self
    }

    /// Number of key arguments.
    pub fn key_len(&self) -> usize {
        self.keys.len()
    }

    /// Number of non-key arguments.
    pub fn arg_len(&self) -> usize {
        self.args.len()
    }
}

#[derive(Debug)]
struct QueuedOperation {
    label: String,
    request: Request,
    handler: ReplyHandler,
}

/// A single-owner, single-use batch of operations.
pub struct Transaction {
    catalog: Arc<Catalog>,
    transport: Arc<dyn Transport>,
    max_batch_size: usize,
    operations: Vec<QueuedOperation>,
}

impl Transaction {
    /// The catalog this transaction resolves scripts against.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if nothing has been queued.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Queues a plain command whose reply is ignored.
    ///
    /// Error replies are still reported by [`Transaction::execute`].
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use kvscript::{Client, transport::Args};
    /// # fn demo(client: &Client) -> Result<(), kvscript::Error> {
    /// let mut tx = client.transaction();
    /// tx.enqueue("SADD", Args::new().arg("User:all").arg("u1"))?;
    /// tx.execute()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn enqueue(&mut self, command: &str, args: Args) -> Result<()> {
        self.enqueue_with(command, args, ReplyHandler::Discard)
    }

    /// Queues a plain command with a reply handler.
    pub fn enqueue_with(&mut self, command: &str, args: Args, handler: ReplyHandler) -> Result<()> {
        if command.trim().is_empty() {
            return Err(Error::contract("command", "command name must not be empty"));
        }
        let request = Request::Command { name: command.to_ascii_uppercase(), args: args.into_vec() };
        self.push(command.to_ascii_uppercase(), request, handler)
    }

    /// Queues a script invocation.
    ///
    /// # Arguments
    ///
    /// * `script` - Catalog script to invoke
    /// * `call` - Key and non-key arguments, in contract order
    /// * `handler` - Decoder for the script's reply
    ///
    /// # Errors
    ///
    /// Returns [`Error::ArgumentContract`] without queuing anything if the
    /// number of keys differs from the script's declared key count, or if the
    /// script is not the one registered in this transaction's catalog.
    pub fn enqueue_script(
        &mut self,
        script: &ScriptHandle,
        call: ScriptCall,
        handler: ReplyHandler,
    ) -> Result<()> {
        self.enqueue_script_as(script.name(), script, call, handler)
    }

    pub(crate) fn enqueue_script_as(
        &mut self,
        label: &str,
        script: &ScriptHandle,
        call: ScriptCall,
        handler: ReplyHandler,
    ) -> Result<()> {
        if self.catalog.get(script.name()) != Some(script) {
            return Err(Error::contract(
                label,
                format!("script {} is not registered in this catalog", script.name()),
            ));
        }
        if call.keys.len() != script.key_count() {
            return Err(Error::contract(
                label,
                format!(
                    "script {} expects {} key argument(s), got {}",
                    script.name(),
                    script.key_count(),
                    call.keys.len()
                ),
            ));
        }

        let request = Request::Script { script: script.clone(), keys: call.keys, args: call.args };
        self.push(label.to_string(), request, handler)
    }

    fn push(&mut self, label: String, request: Request, handler: ReplyHandler) -> Result<()> {
        if self.operations.len() >= self.max_batch_size {
            return Err(Error::contract(
                label,
                format!("transaction already holds {} operations", self.max_batch_size),
            ));
        }
        log::debug!(
            "Queued #{} {} ({} handler)",
            self.operations.len(),
            label,
            handler.shape()
        );
        self.operations.push(QueuedOperation { label, request, handler });
        Ok(())
    }

    /// Sends every queued operation as one atomic request and runs each
    /// handler with its own reply, in enqueue order.
    ///
    /// An empty transaction succeeds without contacting the store.
    ///
    /// # Errors
    ///
    /// - [`Error::Transport`] if the batch could not be delivered or the
    ///   store answered with the wrong number of replies. No handler runs.
    /// - [`Error::Execution`] if one or more operations got an error reply or
    ///   could not be decoded. Every other handler still ran.
    pub fn execute(self) -> Result<()> {
        let start_time = Instant::now();
        if self.operations.is_empty() {
            log::debug!("Executed empty transaction");
            return Ok(());
        }

        // Step 1: Send the whole batch at once
        let (requests, pending): (Vec<Request>, Vec<(String, ReplyHandler)>) = self
            .operations
            .into_iter()
            .map(|op| (op.request, (op.label, op.handler)))
            .unzip();

        let replies = self.transport.exec(&requests)?;
        if replies.len() != requests.len() {
            return Err(Error::transport(format!(
                "expected {} replies, got {}",
                requests.len(),
                replies.len()
            )));
        }

        // Step 2: Decode every reply with its own handler
        let mut failures = Vec::new();
        for (position, ((label, handler), reply)) in pending.into_iter().zip(replies).enumerate() {
            if let Err(error) = handler.handle(reply) {
                log::warn!("Operation #{} ({}) failed: {}", position, label, error);
                failures.push(OperationFailure { position, operation: label, error });
            }
        }

        log::info!(
            "Executed transaction of {} operations in {:?} ({} failed)",
            requests.len(),
            start_time.elapsed(),
            failures.len()
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Execution { failures })
        }
    }

    /// Drops every queued operation without sending anything.
    pub fn discard(self) {
        log::debug!("Discarded transaction with {} queued operations", self.operations.len());
    }
}
