// Fault Injection Tests for kvscript
// These tests simulate transport failures to ensure a batch is all-or-nothing

use kvscript::keys::{model_key, string_index_key, string_index_member};
use kvscript::store::Fault;
use kvscript::transport::Args;
use kvscript::{
    Catalog, Client, Error, MemoryStore, OrderKind, Reply, ReplyHandler, ReplySlot, Request,
    Transport,
};
use std::sync::Arc;

fn setup() -> (Arc<MemoryStore>, Client) {
    env_logger::try_init().ok();
    let catalog = Arc::new(Catalog::builtin().unwrap());
    let store = Arc::new(MemoryStore::new());
    let client = Client::new(catalog, store.clone());
    (store, client)
}

fn seed(store: &MemoryStore) {
    for (id, name) in [("1", "alice"), ("2", "bob")] {
        store.execute_command("HSET", Args::new().arg(model_key("User", id)).arg("name").arg(name));
        store.execute_command("SADD", Args::new().arg("User:all").arg(id));
        store.execute_command(
            "ZADD",
            Args::new()
                .arg(string_index_key("User", "name"))
                .arg(0)
                .arg(string_index_member(name, id)),
        );
    }
}

/// Test that a connection lost mid-batch leaves the store unchanged
#[test]
fn test_fail_after_bytes_leaves_state_unchanged() {
    let (store, client) = setup();
    seed(&store);
    let before = store.dump();

    // Enough bytes for the first operation only
    store.inject_fault(Fault::FailAfterBytes(100));

    let deleted = ReplySlot::new();
    let ids = ReplySlot::new();
    let mut tx = client.transaction();
    tx.delete_string_index("User", "1", "name").unwrap();
    tx.delete_models_by_set_ids("User:all", "User", ReplyHandler::count(&deleted)).unwrap();
    tx.extract_ids_from_string_index(
        &string_index_key("User", "name"),
        OrderKind::Ascending,
        ReplyHandler::ids(&ids),
    )
    .unwrap();

    let err = tx.execute().unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert!(err.failures().is_empty());

    assert_eq!(store.dump(), before);
    assert!(!deleted.is_filled());
    assert!(!ids.is_filled());
}

/// Test that a fault at byte zero fails before anything runs
#[test]
fn test_fail_after_zero_bytes() {
    let (store, client) = setup();
    seed(&store);
    let before = store.dump();
    store.inject_fault(Fault::FailAfterBytes(0));

    let mut tx = client.transaction();
    tx.enqueue("DEL", Args::new().arg("User:all")).unwrap();
    assert!(matches!(tx.execute(), Err(Error::Transport(_))));
    assert_eq!(store.dump(), before);
}

/// Test that a batch smaller than the fault threshold goes through
#[test]
fn test_fault_threshold_not_reached() {
    let (store, client) = setup();
    store.inject_fault(Fault::FailAfterBytes(1 << 20));

    let mut tx = client.transaction();
    tx.enqueue("SADD", Args::new().arg("User:all").arg("9")).unwrap();
    tx.execute().unwrap();

    assert_eq!(
        store.execute_command("SISMEMBER", Args::new().arg("User:all").arg("9")),
        Reply::Integer(1)
    );
}

/// Test that a disconnected store runs no handler
#[test]
fn test_disconnect_runs_no_handler() {
    let (store, client) = setup();
    seed(&store);
    store.inject_fault(Fault::Disconnect);

    let deleted = ReplySlot::new();
    let mut tx = client.transaction();
    tx.delete_models_by_set_ids("User:all", "User", ReplyHandler::count(&deleted)).unwrap();
    assert!(matches!(tx.execute(), Err(Error::Transport(_))));
    assert!(!deleted.is_filled());

    // The next transaction finds the data intact
    let deleted = ReplySlot::new();
    let mut tx = client.transaction();
    tx.delete_models_by_set_ids("User:all", "User", ReplyHandler::count(&deleted)).unwrap();
    tx.execute().unwrap();
    assert_eq!(deleted.take(), Some(2));
}

/// Transport that drops the last reply of every batch
struct TruncatingTransport(MemoryStore);

impl Transport for TruncatingTransport {
    fn exec(&self, batch: &[Request]) -> kvscript::Result<Vec<Reply>> {
        let mut replies = self.0.exec(batch)?;
        replies.pop();
        Ok(replies)
    }
}

/// Test that a reply count mismatch is a transport error
#[test]
fn test_reply_count_mismatch() {
    env_logger::try_init().ok();
    let catalog = Arc::new(Catalog::builtin().unwrap());
    let client = Client::new(catalog, Arc::new(TruncatingTransport(MemoryStore::new())));

    let first = ReplySlot::new();
    let second = ReplySlot::new();
    let mut tx = client.transaction();
    tx.enqueue_with("PING", Args::new(), ReplyHandler::raw(&first)).unwrap();
    tx.enqueue_with("PING", Args::new(), ReplyHandler::raw(&second)).unwrap();

    assert!(matches!(tx.execute(), Err(Error::Transport(_))));
    assert!(!first.is_filled());
    assert!(!second.is_filled());
}
