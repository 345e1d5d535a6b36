//! Script sources: where catalog script bodies are read from.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Supplies the body of a catalog script by name.
pub trait ScriptSource {
    /// Loads the Lua source for `name`.
    fn load(&self, name: &str) -> Result<String>;
}

/// Reads `<dir>/<name>.lua` from the filesystem.
#[derive(Debug, Clone)]
pub struct DirScriptSource {
    dir: PathBuf,
}

impl DirScriptSource {
    /// Creates a source rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory scripts are read from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.lua", name))
    }
}

impl ScriptSource for DirScriptSource {
    fn load(&self, name: &str) -> Result<String> {
        let path = self.path_for(name);
        fs::read_to_string(&path).map_err(|e| Error::init(name, format!("{}: {}", path.display(), e)))
    }
}

/// The standard scripts, compiled into the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedScriptSource;

impl ScriptSource for EmbeddedScriptSource {
    fn load(&self, name: &str) -> Result<String> {
        let body = match name {
            "find_models_by_set_ids" => include_str!("../../scripts/find_models_by_set_ids.lua"),
            "delete_models_by_set_ids" => include_str!("../../scripts/delete_models_by_set_ids.lua"),
            "delete_string_index" => include_str!("../../scripts/delete_string_index.lua"),
            "find_models_by_sorted_set_ids" => {
                include_str!("../../scripts/find_models_by_sorted_set_ids.lua")
            }
            "find_models_by_string_index" => {
                include_str!("../../scripts/find_models_by_string_index.lua")
            }
            "extract_ids_from_string_index" => {
                include_str!("../../scripts/extract_ids_from_string_index.lua")
            }
            _ => return Err(Error::init(name, "no embedded script with this name")),
        };
        Ok(body.to_string())
    }
}

/// In-memory script bodies, mainly for substituting stub scripts in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryScriptSource {
    scripts: HashMap<String, String>,
}

impl MemoryScriptSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a script body.
    pub fn with(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.scripts.insert(name.into(), body.into());
        self
    }
}

impl ScriptSource for MemoryScriptSource {
    fn load(&self, name: &str) -> Result<String> {
        self.scripts.get(name).cloned().ok_or_else(|| Error::init(name, "script not found"))
    }
}
