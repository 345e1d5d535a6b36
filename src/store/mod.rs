//! In-process reference store.
//!
//! [`MemoryStore`] implements [`Transport`] on top of an in-memory
//! [`Keyspace`]. It evaluates a whole batch while holding the store lock and
//! works on a copy of the keyspace, which replaces the committed state only
//! once every operation has run. A batch that fails to arrive therefore
//! leaves the store exactly as it was.
//!
//! Faults can be injected to exercise the transport-failure paths of a
//! transaction without a network.

mod keyspace;
mod lua;

pub use keyspace::{Keyspace, Value};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::config::Options;
use crate::reply::Reply;
use crate::script::ScriptHandle;
use crate::transport::{Args, Request, Transport};
use crate::{Error, Result};
use lua::ScriptRuntime;

/// A one-shot failure applied to the next batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The connection drops once more than this many request bytes were
    /// sent. Operations already evaluated are discarded.
    FailAfterBytes(usize),
    /// The connection is gone before anything is sent.
    Disconnect,
}

/// In-memory backing store that evaluates batches atomically.
///
/// # Cost
///
/// Atomicity is bought with copies. Every non-empty batch clones the whole
/// keyspace into a working copy, and every script invocation snapshots the
/// working copy again so a raised error can roll it back. A batch of `n`
/// script calls therefore costs O(n · keyspace size) in clones, on top of the
/// commands themselves. The store is meant for tests and demos, not as a
/// production backend.
///
/// # Example
///
/// ```
/// use kvscript::store::MemoryStore;
/// use kvscript::transport::Args;
/// use kvscript::Reply;
///
/// let store = MemoryStore::new();
/// store.execute_command("SADD", Args::new().arg("User:all").arg("1"));
/// assert_eq!(store.execute_command("SCARD", Args::new().arg("User:all")), Reply::Integer(1));
/// ```
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
    scripts: RwLock<HashMap<String, String>>,
    fault: Mutex<Option<Fault>>,
    script_timeout: Option<Duration>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store with default options.
    pub fn new() -> Self {
        Self::with_options(&Options::default())
    }

    /// Creates an empty store.
    ///
    /// # Arguments
    ///
    /// * `options` - Only `script_timeout` is used by the store
    pub fn with_options(options: &Options) -> Self {
        Self {
            keyspace: Mutex::new(Keyspace::new()),
            scripts: RwLock::new(HashMap::new()),
            fault: Mutex::new(None),
            script_timeout: options.script_timeout,
        }
    }

    /// Runs one command directly against the committed state.
    ///
    /// Used to seed data and inspect results around transactions.
    pub fn execute_command(&self, name: &str, args: Args) -> Reply {
        self.keyspace.lock().apply(name, &args.into_vec())
    }

    /// Returns a copy of the committed keyspace.
    pub fn dump(&self) -> Keyspace {
        self.keyspace.lock().clone()
    }

    /// Returns true if a script with this digest is cached.
    pub fn script_exists(&self, digest: &str) -> bool {
        self.scripts.read().contains_key(digest)
    }

    /// Makes the next batch fail as described by `fault`.
    pub fn inject_fault(&self, fault: Fault) {
        log::debug!("Injecting fault for next batch: {:?}", fault);
        *self.fault.lock() = Some(fault);
    }

    fn script_source(&self, script: &ScriptHandle) -> String {
        if let Some(source) = self.scripts.read().get(script.digest()) {
            return source.clone();
        }
        // Unknown digest: load the body that came with the handle.
        log::debug!("Script '{}' ({}) not cached, loading it", script.name(), script.digest());
        self.scripts
            .write()
            .insert(script.digest().to_string(), script.source().to_string());
        script.source().to_string()
    }
}

impl Transport for MemoryStore {
    fn exec(&self, batch: &[Request]) -> Result<Vec<Reply>> {
        let start = Instant::now();
        let fault = self.fault.lock().take();
        if fault == Some(Fault::Disconnect) {
            log::warn!("Connection closed before sending {} operations", batch.len());
            return Err(Error::transport("connection closed"));
        }

        // Step 1: Work on a copy while holding the store lock
        let mut committed = self.keyspace.lock();
        let working = Arc::new(Mutex::new(committed.clone()));

        let mut runtime = if batch.iter().any(|r| matches!(r, Request::Script { .. })) {
            let rt = ScriptRuntime::new(Arc::clone(&working), self.script_timeout)
                .map_err(|e| Error::transport(format!("failed to start script runtime: {}", e)))?;
            Some(rt)
        } else {
            None
        };

        // Step 2: Evaluate every operation in order
        let mut sent = 0usize;
        let mut replies = Vec::with_capacity(batch.len());
        for (position, request) in batch.iter().enumerate() {
            sent += request.encoded_len();
            if let Some(Fault::FailAfterBytes(limit)) = fault {
                if sent > limit {
                    log::warn!(
                        "Connection lost after {} bytes at operation #{}, batch discarded",
                        limit,
                        position
                    );
                    return Err(Error::transport(format!("connection lost after {} bytes", limit)));
                }
            }

            let reply = match request {
                Request::Command { name, args } => working.lock().apply(name, args),
                Request::Script { script, keys, args } => {
                    let source = self.script_source(script);
                    match runtime.as_mut() {
                        Some(rt) => rt.eval(script.name(), script.digest(), &source, keys, args),
                        None => Reply::Error("ERR script runtime unavailable".to_string()),
                    }
                }
            };
            replies.push(reply);
        }

        // Step 3: Commit
        drop(runtime);
        *committed = std::mem::take(&mut *working.lock());

        log::debug!("Store applied {} operations in {:?}", batch.len(), start.elapsed());
        Ok(replies)
    }

    fn load_scripts(&self, scripts: &[ScriptHandle]) -> Result<()> {
        let mut cache = self.scripts.write();
        for script in scripts {
            cache.insert(script.digest().to_string(), script.source().to_string());
        }
        log::info!("Store loaded {} scripts", scripts.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{Catalog, MemoryScriptSource};
    use bytes::Bytes;

    fn command(name: &str, args: &[&str]) -> Request {
        Request::Command {
            name: name.to_string(),
            args: args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect(),
        }
    }

    fn script(name: &str, key_count: usize, body: &str) -> ScriptHandle {
        let source = MemoryScriptSource::new().with(name, body);
        Catalog::new().register(name, key_count, &source).unwrap()
    }

    fn scard(store: &MemoryStore, key: &str) -> Reply {
        store.execute_command("SCARD", Args::new().arg(key))
    }

    #[test]
    fn test_batch_commits() {
        let store = MemoryStore::new();
        let replies = store
            .exec(&[command("SADD", &["ids", "1", "2"]), command("SCARD", &["ids"])])
            .unwrap();
        assert_eq!(replies, vec![Reply::Integer(2), Reply::Integer(2)]);
        assert_eq!(scard(&store, "ids"), Reply::Integer(2));
    }

    #[test]
    fn test_command_error_does_not_abort_batch() {
        let store = MemoryStore::new();
        let replies = store
            .exec(&[command("BOGUS", &[]), command("SADD", &["ids", "1"])])
            .unwrap();
        assert!(replies[0].is_error());
        assert_eq!(replies[1], Reply::Integer(1));
        assert_eq!(scard(&store, "ids"), Reply::Integer(1));
    }

    #[test]
    fn test_fail_after_bytes_discards_batch() {
        let store = MemoryStore::new();
        store.execute_command("SADD", Args::new().arg("ids").arg("1"));
        let before = store.dump();

        let first = command("SADD", &["ids", "2"]);
        store.inject_fault(Fault::FailAfterBytes(first.encoded_len()));
        let result = store.exec(&[first, command("DEL", &["ids"])]);

        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(store.dump(), before);

        // The fault is consumed.
        assert!(store.exec(&[command("PING", &[])]).is_ok());
    }

    #[test]
    fn test_disconnect() {
        let store = MemoryStore::new();
        store.inject_fault(Fault::Disconnect);
        assert!(matches!(
            store.exec(&[command("SADD", &["ids", "1"])]),
            Err(Error::Transport(_))
        ));
        assert!(store.dump().is_empty());
    }

    #[test]
    fn test_failing_script_rolls_back_only_itself() {
        let store = MemoryStore::new();
        let boom = script("boom", 1, "redis.call('SADD', KEYS[1], 'x') error('boom')");
        let batch = vec![
            command("SADD", &["ids", "1"]),
            Request::Script {
                script: boom,
                keys: vec![Bytes::from_static(b"ids")],
                args: vec![],
            },
            command("SADD", &["ids", "2"]),
        ];

        let replies = store.exec(&batch).unwrap();
        assert!(replies[1].is_error());
        assert_eq!(scard(&store, "ids"), Reply::Integer(2));
        assert_eq!(
            store.execute_command("SISMEMBER", Args::new().arg("ids").arg("x")),
            Reply::Integer(0)
        );
    }

    #[test]
    fn test_script_cache() {
        let store = MemoryStore::new();
        let preloaded = script("one", 0, "return 1");
        let lazy = script("two", 0, "return 2");

        store.load_scripts(std::slice::from_ref(&preloaded)).unwrap();
        assert!(store.script_exists(preloaded.digest()));
        assert!(!store.script_exists(lazy.digest()));

        let request = Request::Script { script: lazy.clone(), keys: vec![], args: vec![] };
        assert_eq!(store.exec(&[request]).unwrap(), vec![Reply::Integer(2)]);
        assert!(store.script_exists(lazy.digest()));
    }
}
