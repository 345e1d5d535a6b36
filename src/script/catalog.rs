//! The script catalog: named, validated server-side scripts and their
//! key-argument counts.
//!
//! The catalog is built once at process start and shared read-only behind an
//! `Arc`. Loading is all-or-nothing: if any script fails to load or compile,
//! no catalog is returned.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use mlua::Lua;

use crate::config::Options;
use crate::script::source::{DirScriptSource, EmbeddedScriptSource, ScriptSource};
use crate::transport::Transport;
use crate::{Error, Result};

/// Fetches model fields for every id in a set, with limit/offset.
pub const FIND_MODELS_BY_SET_IDS: &str = "find_models_by_set_ids";
/// Deletes every model whose id is in a set; returns the count.
pub const DELETE_MODELS_BY_SET_IDS: &str = "delete_models_by_set_ids";
/// Removes one string index entry, if present.
pub const DELETE_STRING_INDEX: &str = "delete_string_index";
/// Fetches model fields for ids in a sorted set, in the requested order.
pub const FIND_MODELS_BY_SORTED_SET_IDS: &str = "find_models_by_sorted_set_ids";
/// Fetches model fields for ids referenced by a string index.
pub const FIND_MODELS_BY_STRING_INDEX: &str = "find_models_by_string_index";
/// Returns the ids referenced by a string index.
pub const EXTRACT_IDS_FROM_STRING_INDEX: &str = "extract_ids_from_string_index";

/// Every standard script with its declared key-argument count.
pub const STANDARD_SCRIPTS: [(&str, usize); 6] = [
    (FIND_MODELS_BY_SET_IDS, 1),
    (DELETE_MODELS_BY_SET_IDS, 1),
    (DELETE_STRING_INDEX, 0),
    (FIND_MODELS_BY_SORTED_SET_IDS, 1),
    (FIND_MODELS_BY_STRING_INDEX, 1),
    (EXTRACT_IDS_FROM_STRING_INDEX, 1),
];

/// A registered script. Immutable once created.
#[derive(Debug, PartialEq, Eq)]
pub struct ScriptDefinition {
    name: String,
    key_count: usize,
    source: String,
    digest: String,
}

/// Cheap, cloneable reference to a [`ScriptDefinition`].
#[derive(Clone, PartialEq, Eq)]
pub struct ScriptHandle(Arc<ScriptDefinition>);

impl ScriptHandle {
    /// Script name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Number of key arguments every invocation must supply.
    pub fn key_count(&self) -> usize {
        self.0.key_count
    }

    /// Lua source text.
    pub fn source(&self) -> &str {
        &self.0.source
    }

    /// Hex fingerprint of the source; stores use it to invoke a loaded
    /// script by reference.
    pub fn digest(&self) -> &str {
        &self.0.digest
    }
}

impl fmt::Debug for ScriptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptHandle")
            .field("name", &self.0.name)
            .field("key_count", &self.0.key_count)
            .field("digest", &self.0.digest)
            .finish()
    }
}

/// Computes the digest used to identify a script body: the lowercase hex
/// SHA1 that `EVALSHA` and `SCRIPT LOAD` use.
pub fn script_digest(source: &str) -> String {
    sha1_smol::Sha1::from(source).digest().to_string()
}

/// Registry of named scripts.
///
/// # Example
///
/// ```
/// use kvscript::script::{Catalog, MemoryScriptSource};
///
/// # fn main() -> Result<(), kvscript::Error> {
/// let source = MemoryScriptSource::new().with("get_one", "return redis.call('GET', KEYS[1])");
/// let mut catalog = Catalog::new();
/// let handle = catalog.register("get_one", 1, &source)?;
/// assert_eq!(handle.key_count(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct Catalog {
    scripts: HashMap<String, ScriptHandle>,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the six standard scripts from `source`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Init`] for the first script that cannot be loaded or
    /// compiled. The process should treat this as fatal.
    pub fn load(source: &dyn ScriptSource) -> Result<Self> {
        let mut catalog = Catalog::new();
        for (name, key_count) in STANDARD_SCRIPTS {
            catalog.register(name, key_count, source)?;
        }
        log::info!("Loaded {} catalog scripts", catalog.len());
        Ok(catalog)
    }

    /// Loads the standard scripts from `options.scripts_dir`.
    pub fn from_options(options: &Options) -> Result<Self> {
        options.validate()?;
        Self::load(&DirScriptSource::new(&options.scripts_dir))
    }

    /// Loads the standard scripts compiled into the crate.
    pub fn builtin() -> Result<Self> {
        Self::load(&EmbeddedScriptSource)
    }

    /// Registers a script under a unique name.
    ///
    /// The body is read from `source` and compiled to check its syntax.
    ///
    /// # Arguments
    ///
    /// * `name` - Unique script name
    /// * `key_count` - Number of key arguments every invocation must supply
    /// * `source` - Where to read the script body from
    ///
    /// # Errors
    ///
    /// Returns [`Error::Init`] if the name is taken, the body cannot be
    /// loaded, or the body does not compile.
    pub fn register(
        &mut self,
        name: &str,
        key_count: usize,
        source: &dyn ScriptSource,
    ) -> Result<ScriptHandle> {
        if self.scripts.contains_key(name) {
            return Err(Error::init(name, "a script with this name is already registered"));
        }

        let body = source.load(name)?;
        compile(name, &body)?;

        let handle = ScriptHandle(Arc::new(ScriptDefinition {
            name: name.to_string(),
            key_count,
            digest: script_digest(&body),
            source: body,
        }));
        log::debug!("Registered script {} ({} keys, digest {})", name, key_count, handle.digest());

        self.scripts.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    /// Returns the script registered under `name`.
    pub fn get(&self, name: &str) -> Option<&ScriptHandle> {
        self.scripts.get(name)
    }

    /// Returns the script registered under `name`, or [`Error::UnknownScript`].
    pub fn script(&self, name: &str) -> Result<&ScriptHandle> {
        self.get(name).ok_or_else(|| Error::UnknownScript(name.to_string()))
    }

    /// Number of registered scripts.
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    /// Returns true if no script is registered.
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Iterates the registered scripts in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &ScriptHandle> {
        self.scripts.values()
    }

    /// Sends every script to the store ahead of time so invocations can go
    /// by digest.
    pub fn preload(&self, transport: &dyn Transport) -> Result<()> {
        let handles: Vec<ScriptHandle> = self.scripts.values().cloned().collect();
        transport.load_scripts(&handles)
    }
}

fn compile(name: &str, body: &str) -> Result<()> {
    let lua = Lua::new();
    lua.load(body)
        .set_name(format!("={}", name))
        .into_function()
        .map_err(|e| Error::init(name, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::source::MemoryScriptSource;

    #[test]
    fn test_builtin_catalog() {
        let catalog = Catalog::builtin().unwrap();
        assert_eq!(catalog.len(), 6);
        for (name, key_count) in STANDARD_SCRIPTS {
            assert_eq!(catalog.script(name).unwrap().key_count(), key_count);
        }
        assert_eq!(catalog.script(DELETE_STRING_INDEX).unwrap().key_count(), 0);
    }

    #[test]
    fn test_from_options_reads_scripts_dir() {
        let catalog = Catalog::from_options(&Options::default()).unwrap();
        assert_eq!(catalog.len(), STANDARD_SCRIPTS.len());
    }

    #[test]
    fn test_syntax_error_is_fatal() {
        let source = MemoryScriptSource::new().with("broken", "return redis.call(");
        let mut catalog = Catalog::new();
        let err = catalog.register("broken", 0, &source).unwrap_err();
        assert!(matches!(err, Error::Init { ref script, .. } if script == "broken"));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_partial_catalog_is_never_returned() {
        // Only one of the six standard scripts is available.
        let source = MemoryScriptSource::new().with(FIND_MODELS_BY_SET_IDS, "return {}");
        assert!(Catalog::load(&source).is_err());
    }

    #[test]
    fn test_duplicate_registration() {
        let source = MemoryScriptSource::new().with("one", "return 1");
        let mut catalog = Catalog::new();
        catalog.register("one", 0, &source).unwrap();
        assert!(catalog.register("one", 0, &source).is_err());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_unknown_script() {
        let catalog = Catalog::new();
        assert!(matches!(catalog.script("nope"), Err(Error::UnknownScript(_))));
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(script_digest("return 1"), script_digest("return 1"));
        assert_ne!(script_digest("return 1"), script_digest("return 2"));
        assert_eq!(script_digest("return 1"), "e0e1f9fabfc9d4800c877a703b823ac0578ff8db");
        assert_eq!(script_digest("").len(), 40);
    }
}
