//! Lua runtime that evaluates catalog scripts against a keyspace.
//!
//! Scripts see the usual globals: `KEYS`, `ARGV` and a `redis` table with
//! `call`, `pcall`, `error_reply` and `status_reply`. Every evaluation works
//! against a snapshot; a script that raises leaves the keyspace as it found it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use mlua::{Function, Lua, RegistryKey, Table, Value, Variadic};
use parking_lot::Mutex;

use super::keyspace::Keyspace;
use crate::reply::Reply;

/// One Lua state bound to a keyspace for the duration of a batch.
pub(crate) struct ScriptRuntime {
    lua: Lua,
    keyspace: Arc<Mutex<Keyspace>>,
    functions: HashMap<String, RegistryKey>,
    timeout: Option<Duration>,
}

impl ScriptRuntime {
    /// Creates a runtime whose `redis.call` operates on `keyspace`.
    pub(crate) fn new(keyspace: Arc<Mutex<Keyspace>>, timeout: Option<Duration>) -> mlua::Result<Self> {
        let lua = Lua::new();
        install_redis_api(&lua, &keyspace)?;
        Ok(Self {
            lua,
            keyspace,
            functions: HashMap::new(),
            timeout,
        })
    }

    /// Evaluates the script `source` known under `digest`.
    ///
    /// A raised error or a timeout restores the keyspace and is reported as
    /// an error reply; other operations of the batch are unaffected.
    pub(crate) fn eval(
        &mut self,
        name: &str,
        digest: &str,
        source: &str,
        keys: &[Bytes],
        args: &[Bytes],
    ) -> Reply {
        let snapshot = self.keyspace.lock().clone();
        let start = Instant::now();

        match self.run(name, digest, source, keys, args) {
            Ok(reply) => {
                log::debug!("Script '{}' finished in {:?}", name, start.elapsed());
                reply
            }
            Err(e) => {
                *self.keyspace.lock() = snapshot;
                let message = e.to_string();
                let first_line = message.lines().next().unwrap_or("unknown error");
                log::warn!("Script '{}' failed and was rolled back: {}", name, first_line);
                Reply::Error(format!("ERR error running script '{}': {}", name, first_line))
            }
        }
    }

    fn run(
        &mut self,
        name: &str,
        digest: &str,
        source: &str,
        keys: &[Bytes],
        args: &[Bytes],
    ) -> mlua::Result<Reply> {
        let key = match self.functions.entry(digest.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let function = self.lua.load(source).set_name(format!("={}", name)).into_function()?;
                entry.insert(self.lua.create_registry_value(function)?)
            }
        };
        let function: Function<'_> = self.lua.registry_value(key)?;

        let globals = self.lua.globals();
        globals.set("KEYS", byte_table(&self.lua, keys)?)?;
        globals.set("ARGV", byte_table(&self.lua, args)?)?;

        if let Some(timeout) = self.timeout {
            let timeout_start = Instant::now();
            self.lua.set_hook(
                mlua::HookTriggers {
                    every_nth_instruction: Some(1000),
                    ..Default::default()
                },
                move |_lua, _debug| {
                    if timeout_start.elapsed() > timeout {
                        Err(mlua::Error::RuntimeError("Script execution timeout".to_string()))
                    } else {
                        Ok(())
                    }
                },
            );
        }

        let value: Value<'_> = function.call(())?;
        Ok(to_reply(value))
    }
}

fn install_redis_api(lua: &Lua, keyspace: &Arc<Mutex<Keyspace>>) -> mlua::Result<()> {
    let redis = lua.create_table()?;

    let ks_call = Arc::clone(keyspace);
    let call = lua.create_function(move |lua, args| redis_call(lua, &ks_call, args, false))?;
    redis.set("call", call)?;

    let ks_pcall = Arc::clone(keyspace);
    let pcall = lua.create_function(move |lua, args| redis_call(lua, &ks_pcall, args, true))?;
    redis.set("pcall", pcall)?;

    let error_reply = lua.create_function(|lua, msg: String| {
        let table = lua.create_table()?;
        table.raw_set("err", msg)?;
        Ok(table)
    })?;
    redis.set("error_reply", error_reply)?;

    let status_reply = lua.create_function(|lua, msg: String| {
        let table = lua.create_table()?;
        table.raw_set("ok", msg)?;
        Ok(table)
    })?;
    redis.set("status_reply", status_reply)?;

    lua.globals().set("redis", redis)
}

fn redis_call<'lua>(
    lua: &'lua Lua,
    keyspace: &Mutex<Keyspace>,
    args: Variadic<Value<'lua>>,
    protected: bool,
) -> mlua::Result<Value<'lua>> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args.iter() {
        match arg {
            Value::String(s) => parts.push(Bytes::copy_from_slice(s.as_bytes())),
            Value::Integer(n) => parts.push(Bytes::from(n.to_string())),
            Value::Number(n) => parts.push(Bytes::from(n.to_string())),
            _ => {
                return call_error(
                    lua,
                    "ERR Lua redis lib command arguments must be strings or integers",
                    protected,
                )
            }
        }
    }

    let Some((name, rest)) = parts.split_first() else {
        return call_error(lua, "ERR Please specify at least one argument for this redis lib call", protected);
    };
    let name = String::from_utf8_lossy(name).into_owned();
    let reply = keyspace.lock().apply(&name, rest);

    match reply {
        Reply::Error(msg) if !protected => Err(mlua::Error::RuntimeError(msg)),
        other => to_lua(lua, other),
    }
}

fn call_error<'lua>(lua: &'lua Lua, msg: &str, protected: bool) -> mlua::Result<Value<'lua>> {
    if protected {
        to_lua(lua, Reply::Error(msg.to_string()))
    } else {
        Err(mlua::Error::RuntimeError(msg.to_string()))
    }
}

fn byte_table<'lua>(lua: &'lua Lua, items: &[Bytes]) -> mlua::Result<Table<'lua>> {
    let table = lua.create_table()?;
    for (i, item) in items.iter().enumerate() {
        table.raw_set(i + 1, lua.create_string(item)?)?;
    }
    Ok(table)
}

/// Converts a store reply into the value a script sees.
fn to_lua(lua: &Lua, reply: Reply) -> mlua::Result<Value<'_>> {
    Ok(match reply {
        Reply::Nil => Value::Boolean(false),
        Reply::Integer(n) => Value::Integer(n),
        Reply::Bulk(b) => Value::String(lua.create_string(&b)?),
        Reply::Status(s) => {
            let table = lua.create_table()?;
            table.raw_set("ok", s)?;
            Value::Table(table)
        }
        Reply::Error(e) => {
            let table = lua.create_table()?;
            table.raw_set("err", e)?;
            Value::Table(table)
        }
        Reply::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.into_iter().enumerate() {
                table.raw_set(i + 1, to_lua(lua, item)?)?;
            }
            Value::Table(table)
        }
    })
}

/// Converts a script's return value into a reply.
fn to_reply(value: Value<'_>) -> Reply {
    match value {
        Value::Nil | Value::Boolean(false) => Reply::Nil,
        Value::Boolean(true) => Reply::Integer(1),
        Value::Integer(n) => Reply::Integer(n),
        Value::Number(n) => Reply::Integer(n as i64),
        Value::String(s) => Reply::Bulk(Bytes::copy_from_slice(s.as_bytes())),
        Value::Table(table) => table_to_reply(table),
        other => Reply::Error(format!("ERR unsupported script return type {}", other.type_name())),
    }
}

fn table_to_reply(table: Table<'_>) -> Reply {
    if let Ok(Value::String(msg)) = table.raw_get::<_, Value<'_>>("err") {
        return Reply::Error(msg.to_string_lossy().into_owned());
    }
    if let Ok(Value::String(msg)) = table.raw_get::<_, Value<'_>>("ok") {
        return Reply::Status(msg.to_string_lossy().into_owned());
    }

    // Arrays stop at the first nil, as in the store's own conversion.
    let mut items = Vec::new();
    for i in 1..=table.raw_len() {
        match table.raw_get::<_, Value<'_>>(i) {
            Ok(Value::Nil) | Err(_) => break,
            Ok(value) => items.push(to_reply(value)),
        }
    }
    Reply::Array(items)
}
