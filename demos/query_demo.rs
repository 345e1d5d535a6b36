//! Example: Scripted Queries over the In-Process Store
//!
//! This example writes a few models with their set and string index entries,
//! reads them back through the query scripts, and shows how a lost connection
//! leaves the store untouched.
//!
//! Run with `RUST_LOG=debug` to see every queued operation.

use kvscript::keys::{string_index_key, string_index_member};
use kvscript::store::Fault;
use kvscript::transport::Args;
use kvscript::{
    Catalog, Client, EntityMaterializer, MemoryStore, Options, OrderKind, ReplyHandler, ReplySlot,
};
use std::sync::Arc;

fn main() -> Result<(), kvscript::Error> {
    env_logger::init();

    let options = Options::from_env();
    let catalog = Arc::new(Catalog::from_options(&options)?);
    let store = Arc::new(MemoryStore::with_options(&options));
    catalog.preload(store.as_ref())?;
    let client = Client::with_options(catalog, store.clone(), &options)?;

    println!("=== Scripted Query Example ===\n");

    // Example 1: Save models together with their set and index entries
    println!("Example 1: Saving users");
    println!("-----------------------");
    let mut tx = client.transaction();
    for (id, name) in [("1", "carol"), ("2", "alice"), ("3", "bob")] {
        tx.save_model_fields("User", id, [("name", name)])?;
        tx.enqueue("SADD", Args::new().arg("User:all").arg(id))?;
        tx.enqueue(
            "ZADD",
            Args::new()
                .arg(string_index_key("User", "name"))
                .arg(0)
                .arg(string_index_member(name, id)),
        )?;
    }
    let queued = tx.len();
    tx.execute()?;
    println!("Executed {} operations in one batch\n", queued);

    // Example 2: Read through the set and the index in one transaction
    println!("Example 2: Querying");
    println!("-------------------");
    let users = ReplySlot::new();
    let ids = ReplySlot::new();
    let mut tx = client.transaction();
    tx.find_models_by_set_ids(
        "User:all",
        "User",
        0,
        0,
        ReplyHandler::entities("User", Arc::new(EntityMaterializer), &users),
    )?;
    tx.extract_ids_from_string_index(
        &string_index_key("User", "name"),
        OrderKind::Descending,
        ReplyHandler::ids(&ids),
    )?;
    tx.execute()?;

    for user in users.take().unwrap_or_default() {
        println!("  User {}: {}", user.id, user.field("name").unwrap_or("?"));
    }
    println!("  Ids by name, descending: {:?}\n", ids.take().unwrap_or_default());

    // Example 3: A lost connection applies nothing
    println!("Example 3: Connection lost mid-batch");
    println!("------------------------------------");
    store.inject_fault(Fault::FailAfterBytes(48));
    let deleted = ReplySlot::new();
    let mut tx = client.transaction();
    tx.delete_string_index("User", "1", "name")?;
    tx.delete_models_by_set_ids("User:all", "User", ReplyHandler::count(&deleted))?;
    match tx.execute() {
        Ok(()) => println!("  Unexpected success"),
        Err(e) => println!("  ✓ Batch failed: {}", e),
    }

    let deleted = ReplySlot::new();
    let mut tx = client.transaction();
    tx.delete_models_by_set_ids("User:all", "User", ReplyHandler::count(&deleted))?;
    tx.execute()?;
    println!("  Retried delete removed {} users", deleted.take().unwrap_or(0));

    println!("\n=== Example completed successfully ===");
    Ok(())
}
