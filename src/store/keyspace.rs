//! In-memory keyspace and the store commands that operate on it.
//!
//! Values are strings, hashes, sets or sorted sets. Collections that become
//! empty are removed, and commands against a key holding another type fail
//! with `WRONGTYPE`, as a real store would.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use bytes::Bytes;

use crate::reply::Reply;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const NOT_INTEGER: &str = "ERR value is not an integer or out of range";
const NOT_FLOAT: &str = "ERR value is not a valid float";

/// A stored value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Plain string.
    String(Bytes),
    /// Field/value map.
    Hash(BTreeMap<Bytes, Bytes>),
    /// Unordered set; iterated in byte order.
    Set(BTreeSet<Bytes>),
    /// Members ordered by score, then by member bytes.
    SortedSet(HashMap<Bytes, f64>),
}

type CommandResult = std::result::Result<Reply, String>;

/// All keys of a store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Keyspace {
    entries: HashMap<Bytes, Value>,
}

impl Keyspace {
    /// Creates an empty keyspace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no key exists.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the value at `key`.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Returns true if `key` exists.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    /// Executes one command. Failures become error replies.
    pub fn apply(&mut self, name: &str, args: &[Bytes]) -> Reply {
        match self.dispatch(&name.to_ascii_uppercase(), args) {
            Ok(reply) => reply,
            Err(msg) => Reply::Error(msg),
        }
    }

    fn dispatch(&mut self, cmd: &str, args: &[Bytes]) -> CommandResult {
        match cmd {
            "PING" => match args {
                [] => Ok(Reply::Status("PONG".to_string())),
                [msg] => Ok(Reply::Bulk(msg.clone())),
                _ => Err(arity(cmd)),
            },
            "GET" => {
                let [key] = args else { return Err(arity(cmd)) };
                match self.entries.get(key) {
                    None => Ok(Reply::Nil),
                    Some(Value::String(v)) => Ok(Reply::Bulk(v.clone())),
                    Some(_) => Err(WRONGTYPE.to_string()),
                }
            }
            "SET" => {
                let [key, value] = args else { return Err(arity(cmd)) };
                self.entries.insert(key.clone(), Value::String(value.clone()));
                Ok(Reply::ok())
            }
            "DEL" => {
                if args.is_empty() {
                    return Err(arity(cmd));
                }
                let removed = args.iter().filter(|k| self.entries.remove(*k).is_some()).count();
                Ok(Reply::Integer(removed as i64))
            }
            "EXISTS" => {
                if args.is_empty() {
                    return Err(arity(cmd));
                }
                let found = args.iter().filter(|k| self.entries.contains_key(*k)).count();
                Ok(Reply::Integer(found as i64))
            }
            "HSET" => {
                if args.len() < 3 || args.len() % 2 == 0 {
                    return Err(arity(cmd));
                }
                let hash = self.hash_mut(&args[0])?;
                let mut added = 0;
                for pair in args[1..].chunks(2) {
                    if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
                        added += 1;
                    }
                }
                Ok(Reply::Integer(added))
            }
            "HGET" => {
                let [key, field] = args else { return Err(arity(cmd)) };
                let value = self.hash(key)?.and_then(|h| h.get(field)).cloned();
                Ok(value.map(Reply::Bulk).unwrap_or(Reply::Nil))
            }
            "HGETALL" => {
                let [key] = args else { return Err(arity(cmd)) };
                let mut items = Vec::new();
                if let Some(hash) = self.hash(key)? {
                    for (field, value) in hash {
                        items.push(Reply::Bulk(field.clone()));
                        items.push(Reply::Bulk(value.clone()));
                    }
                }
                Ok(Reply::Array(items))
            }
            "HDEL" => {
                if args.len() < 2 {
                    return Err(arity(cmd));
                }
                let removed = match self.entries.get_mut(&args[0]) {
                    None => 0,
                    Some(Value::Hash(hash)) => {
                        args[1..].iter().filter(|f| hash.remove(*f).is_some()).count()
                    }
                    Some(_) => return Err(WRONGTYPE.to_string()),
                };
                self.remove_if_empty(&args[0]);
                Ok(Reply::Integer(removed as i64))
            }
            "SADD" => {
                if args.len() < 2 {
                    return Err(arity(cmd));
                }
                let set = self.set_mut(&args[0])?;
                let added = args[1..].iter().filter(|m| set.insert((*m).clone())).count();
                Ok(Reply::Integer(added as i64))
            }
            "SREM" => {
                if args.len() < 2 {
                    return Err(arity(cmd));
                }
                let removed = match self.entries.get_mut(&args[0]) {
                    None => 0,
                    Some(Value::Set(set)) => args[1..].iter().filter(|m| set.remove(*m)).count(),
                    Some(_) => return Err(WRONGTYPE.to_string()),
                };
                self.remove_if_empty(&args[0]);
                Ok(Reply::Integer(removed as i64))
            }
            "SMEMBERS" => {
                let [key] = args else { return Err(arity(cmd)) };
                let members = self.set(key)?.map(|s| s.iter().cloned().map(Reply::Bulk).collect());
                Ok(Reply::Array(members.unwrap_or_default()))
            }
            "SCARD" => {
                let [key] = args else { return Err(arity(cmd)) };
                Ok(Reply::Integer(self.set(key)?.map_or(0, |s| s.len()) as i64))
            }
            "SISMEMBER" => {
                let [key, member] = args else { return Err(arity(cmd)) };
                let found = self.set(key)?.is_some_and(|s| s.contains(member));
                Ok(Reply::Integer(found as i64))
            }
            "ZADD" => {
                if args.len() < 3 || args.len() % 2 == 0 {
                    return Err(arity(cmd));
                }
                let mut pairs = Vec::with_capacity(args.len() / 2);
                for pair in args[1..].chunks(2) {
                    pairs.push((parse_float(&pair[0])?, pair[1].clone()));
                }
                let zset = self.zset_mut(&args[0])?;
                let mut added = 0;
                for (score, member) in pairs {
                    if zset.insert(member, score).is_none() {
                        added += 1;
                    }
                }
                Ok(Reply::Integer(added))
            }
            "ZREM" => {
                if args.len() < 2 {
                    return Err(arity(cmd));
                }
                let removed = match self.entries.get_mut(&args[0]) {
                    None => 0,
                    Some(Value::SortedSet(zset)) => {
                        args[1..].iter().filter(|m| zset.remove(*m).is_some()).count()
                    }
                    Some(_) => return Err(WRONGTYPE.to_string()),
                };
                self.remove_if_empty(&args[0]);
                Ok(Reply::Integer(removed as i64))
            }
            "ZCARD" => {
                let [key] = args else { return Err(arity(cmd)) };
                Ok(Reply::Integer(self.zset(key)?.map_or(0, |z| z.len()) as i64))
            }
            "ZSCORE" => {
                let [key, member] = args else { return Err(arity(cmd)) };
                let score = self.zset(key)?.and_then(|z| z.get(member)).copied();
                Ok(score.map(|s| Reply::Bulk(Bytes::from(s.to_string()))).unwrap_or(Reply::Nil))
            }
            "ZRANGE" | "ZREVRANGE" => {
                let [key, start, stop] = args else { return Err(arity(cmd)) };
                let start = parse_int(start)?;
                let stop = parse_int(stop)?;
                let mut members = match self.zset(key)? {
                    Some(zset) => ordered_members(zset),
                    None => Vec::new(),
                };
                if cmd == "ZREVRANGE" {
                    members.reverse();
                }
                let items = slice_range(members, start, stop).into_iter().map(Reply::Bulk).collect();
                Ok(Reply::Array(items))
            }
            other => Err(format!("ERR unknown command '{}'", other.to_ascii_lowercase())),
        }
    }

    fn remove_if_empty(&mut self, key: &[u8]) {
        let empty = match self.entries.get(key) {
            Some(Value::Hash(h)) => h.is_empty(),
            Some(Value::Set(s)) => s.is_empty(),
            Some(Value::SortedSet(z)) => z.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }

    fn hash(&self, key: &[u8]) -> std::result::Result<Option<&BTreeMap<Bytes, Bytes>>, String> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Value::Hash(h)) => Ok(Some(h)),
            Some(_) => Err(WRONGTYPE.to_string()),
        }
    }

    fn hash_mut(&mut self, key: &Bytes) -> std::result::Result<&mut BTreeMap<Bytes, Bytes>, String> {
        match self.entries.entry(key.clone()).or_insert_with(|| Value::Hash(BTreeMap::new())) {
            Value::Hash(h) => Ok(h),
            _ => Err(WRONGTYPE.to_string()),
        }
    }

    fn set(&self, key: &[u8]) -> std::result::Result<Option<&BTreeSet<Bytes>>, String> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Value::Set(s)) => Ok(Some(s)),
            Some(_) => Err(WRONGTYPE.to_string()),
        }
    }

    fn set_mut(&mut self, key: &Bytes) -> std::result::Result<&mut BTreeSet<Bytes>, String> {
        match self.entries.entry(key.clone()).or_insert_with(|| Value::Set(BTreeSet::new())) {
            Value::Set(s) => Ok(s),
            _ => Err(WRONGTYPE.to_string()),
        }
    }

    fn zset(&self, key: &[u8]) -> std::result::Result<Option<&HashMap<Bytes, f64>>, String> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Value::SortedSet(z)) => Ok(Some(z)),
            Some(_) => Err(WRONGTYPE.to_string()),
        }
    }

    fn zset_mut(&mut self, key: &Bytes) -> std::result::Result<&mut HashMap<Bytes, f64>, String> {
        match self.entries.entry(key.clone()).or_insert_with(|| Value::SortedSet(HashMap::new())) {
            Value::SortedSet(z) => Ok(z),
            _ => Err(WRONGTYPE.to_string()),
        }
    }
}

fn arity(cmd: &str) -> String {
    format!("ERR wrong number of arguments for '{}' command", cmd.to_ascii_lowercase())
}

fn parse_int(arg: &[u8]) -> std::result::Result<i64, String> {
    std::str::from_utf8(arg).ok().and_then(|s| s.parse().ok()).ok_or_else(|| NOT_INTEGER.to_string())
}

fn parse_float(arg: &[u8]) -> std::result::Result<f64, String> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|f| !f.is_nan())
        .ok_or_else(|| NOT_FLOAT.to_string())
}

fn ordered_members(zset: &HashMap<Bytes, f64>) -> Vec<Bytes> {
    let mut entries: Vec<(&Bytes, f64)> = zset.iter().map(|(m, s)| (m, *s)).collect();
    entries.sort_by(|a, b| match a.1.total_cmp(&b.1) {
        Ordering::Equal => a.0.cmp(b.0),
        other => other,
    });
    entries.into_iter().map(|(m, _)| m.clone()).collect()
}

/// Applies inclusive, possibly negative, range indices.
fn slice_range(items: Vec<Bytes>, start: i64, stop: i64) -> Vec<Bytes> {
    let len = items.len() as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return Vec::new();
    }
    items.into_iter().skip(start as usize).take((stop - start + 1) as usize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<Bytes> {
        items.iter().map(|s| Bytes::copy_from_slice(s.as_bytes())).collect()
    }

    fn run(ks: &mut Keyspace, cmd: &str, items: &[&str]) -> Reply {
        ks.apply(cmd, &args(items))
    }

    fn bulk_list(items: &[&str]) -> Reply {
        Reply::Array(items.iter().map(|s| Reply::bulk(s.to_string())).collect())
    }

    #[test]
    fn test_string_commands() {
        let mut ks = Keyspace::new();
        assert_eq!(run(&mut ks, "set", &["k", "v"]), Reply::ok());
        assert_eq!(run(&mut ks, "GET", &["k"]), Reply::bulk("v"));
        assert_eq!(run(&mut ks, "EXISTS", &["k", "x"]), Reply::Integer(1));
        assert_eq!(run(&mut ks, "DEL", &["k", "x"]), Reply::Integer(1));
        assert_eq!(run(&mut ks, "GET", &["k"]), Reply::Nil);
    }

    #[test]
    fn test_hash_commands() {
        let mut ks = Keyspace::new();
        assert_eq!(run(&mut ks, "HSET", &["User:1", "name", "Alice", "age", "31"]), Reply::Integer(2));
        assert_eq!(run(&mut ks, "HGET", &["User:1", "name"]), Reply::bulk("Alice"));
        assert_eq!(run(&mut ks, "HGETALL", &["User:1"]), bulk_list(&["age", "31", "name", "Alice"]));
        assert_eq!(run(&mut ks, "HDEL", &["User:1", "age", "name"]), Reply::Integer(2));
        assert!(!ks.contains_key(b"User:1"));
        assert_eq!(run(&mut ks, "HGETALL", &["User:1"]), Reply::Array(vec![]));
    }

    #[test]
    fn test_set_commands() {
        let mut ks = Keyspace::new();
        assert_eq!(run(&mut ks, "SADD", &["ids", "b", "a", "b"]), Reply::Integer(2));
        assert_eq!(run(&mut ks, "SCARD", &["ids"]), Reply::Integer(2));
        assert_eq!(run(&mut ks, "SISMEMBER", &["ids", "a"]), Reply::Integer(1));
        assert_eq!(run(&mut ks, "SMEMBERS", &["ids"]), bulk_list(&["a", "b"]));
        assert_eq!(run(&mut ks, "SREM", &["ids", "a", "b"]), Reply::Integer(2));
        assert!(ks.is_empty());
    }

    #[test]
    fn test_sorted_set_commands() {
        let mut ks = Keyspace::new();
        assert_eq!(run(&mut ks, "ZADD", &["z", "2", "b", "1", "a", "3", "c"]), Reply::Integer(3));
        assert_eq!(run(&mut ks, "ZRANGE", &["z", "0", "-1"]), bulk_list(&["a", "b", "c"]));
        assert_eq!(run(&mut ks, "ZREVRANGE", &["z", "0", "-1"]), bulk_list(&["c", "b", "a"]));
        assert_eq!(run(&mut ks, "ZRANGE", &["z", "1", "1"]), bulk_list(&["b"]));
        assert_eq!(run(&mut ks, "ZRANGE", &["z", "-2", "10"]), bulk_list(&["b", "c"]));
        assert_eq!(run(&mut ks, "ZRANGE", &["z", "5", "10"]), Reply::Array(vec![]));
        assert_eq!(run(&mut ks, "ZSCORE", &["z", "c"]), Reply::bulk("3"));
        assert_eq!(run(&mut ks, "ZREM", &["z", "a"]), Reply::Integer(1));
        assert_eq!(run(&mut ks, "ZCARD", &["z"]), Reply::Integer(2));
    }

    #[test]
    fn test_equal_scores_order_by_member() {
        let mut ks = Keyspace::new();
        run(&mut ks, "ZADD", &["idx", "0", "carol", "0", "alice", "0", "bob"]);
        assert_eq!(run(&mut ks, "ZRANGE", &["idx", "0", "-1"]), bulk_list(&["alice", "bob", "carol"]));
    }

    #[test]
    fn test_wrong_type_and_arity() {
        let mut ks = Keyspace::new();
        run(&mut ks, "SET", &["k", "v"]);
        assert_eq!(run(&mut ks, "SADD", &["k", "m"]), Reply::Error(WRONGTYPE.to_string()));
        assert!(run(&mut ks, "GET", &[]).is_error());
        assert!(run(&mut ks, "ZADD", &["z", "nan?", "m"]).is_error());
        assert!(run(&mut ks, "ZRANGE", &["z", "a", "1"]).is_error());
        assert_eq!(
            run(&mut ks, "FLY", &[]),
            Reply::Error("ERR unknown command 'fly'".to_string())
        );
    }
}
