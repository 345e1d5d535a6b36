//! Server-side script catalog.
//!
//! Scripts are Lua programs evaluated atomically by the backing store. Each
//! one is registered under a unique name together with the number of key
//! arguments it expects, and is invoked through a [`ScriptHandle`].
//!
//! # Architecture
//!
//! - **ScriptSource**: Reads script bodies (filesystem, embedded, in-memory)
//! - **Catalog**: Validates, fingerprints and caches the scripts
//!
//! # Example
//!
//! ```rust,no_run
//! use kvscript::script::Catalog;
//! use kvscript::Options;
//!
//! # fn main() -> Result<(), kvscript::Error> {
//! // Fatal if any standard script is missing or does not compile
//! let catalog = Catalog::from_options(&Options::from_env())?;
//! let handle = catalog.script("delete_models_by_set_ids")?;
//! assert_eq!(handle.key_count(), 1);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod source;

pub use catalog::{script_digest, Catalog, ScriptDefinition, ScriptHandle, STANDARD_SCRIPTS};
pub use source::{DirScriptSource, EmbeddedScriptSource, MemoryScriptSource, ScriptSource};
