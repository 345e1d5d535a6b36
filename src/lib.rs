//! # kvscript - Scripted Transactions for a Key-Value Object Mapper
//!
//! kvscript is the part of an object mapper that talks to a Redis-style
//! key-value store through server-side Lua scripts. It loads a catalog of
//! scripts, queues commands and script invocations into transactions that
//! the store applies atomically, and decodes every reply into counts, id
//! lists or typed entities.
//!
//! ## Architecture
//!
//! - **Script catalog**: Named Lua scripts with a declared key-argument count
//! - **Transaction**: Ordered batch of operations, each paired with a reply handler
//! - **Reply handlers**: Count, id-list and entity-list decoders
//! - **Query primitives**: Six scripted lookups and deletions over sets,
//!   sorted sets and string indexes
//! - **Transport**: Boundary to the store; [`store::MemoryStore`] is an
//!   in-process implementation with fault injection
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use kvscript::{Catalog, Client, EntityMaterializer, MemoryStore, ReplyHandler, ReplySlot};
//! use kvscript::transport::Args;
//!
//! # fn main() -> Result<(), kvscript::Error> {
//! let catalog = Arc::new(Catalog::builtin()?);
//! let store = Arc::new(MemoryStore::new());
//! let client = Client::new(catalog, store);
//!
//! // Write a model and register its id
//! let mut tx = client.transaction();
//! tx.save_model_fields("User", "1", [("name", "Alice")])?;
//! tx.enqueue("SADD", Args::new().arg("User:all").arg("1"))?;
//! tx.execute()?;
//!
//! // Read it back through a script
//! let users = ReplySlot::new();
//! let mut tx = client.transaction();
//! tx.find_models_by_set_ids(
//!     "User:all",
//!     "User",
//!     0,
//!     0,
//!     ReplyHandler::entities("User", Arc::new(EntityMaterializer), &users),
//! )?;
//! tx.execute()?;
//!
//! let users = users.take().unwrap_or_default();
//! assert_eq!(users[0].field("name"), Some("Alice"));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod config;
pub mod error;
pub mod handler;
pub mod keys;
pub mod model;
pub mod query;
pub mod reply;
pub mod script;
pub mod store;
pub mod transaction;
pub mod transport;

// Re-exports
pub use config::Options;
pub use error::{Error, OperationFailure, Result};
pub use handler::{EntitySink, ReplyHandler, ReplySlot};
pub use model::{Entity, EntityMaterializer, FieldList, JsonMaterializer, Materializer};
pub use query::OrderKind;
pub use reply::{Reply, ReplyError};
pub use script::{Catalog, ScriptHandle};
pub use store::MemoryStore;
pub use transaction::{Client, ScriptCall, Transaction};
pub use transport::{Args, Request, Transport};
