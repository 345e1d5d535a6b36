//! Configuration options for the kvscript engine.

use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that overrides [`Options::scripts_dir`].
pub const SCRIPTS_PATH_ENV: &str = "KVSCRIPT_SCRIPTS_PATH";

/// Configuration options shared by the catalog, transactions and the
/// reference store.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding one `<name>.lua` file per catalog script.
    /// Default: the `scripts` directory shipped with the crate
    pub scripts_dir: PathBuf,

    /// Maximum wall-clock time a single script may run inside the
    /// reference store. `None` disables the limit.
    /// Default: 5 seconds
    pub script_timeout: Option<Duration>,

    /// Maximum number of operations a single transaction may queue.
    /// Default: 10000
    pub max_batch_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/scripts")),
            script_timeout: Some(Duration::from_secs(5)),
            max_batch_size: 10_000,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates Options with defaults, taking the scripts directory from
    /// `KVSCRIPT_SCRIPTS_PATH` when it is set.
    pub fn from_env() -> Self {
        let mut opts = Self::default();
        if let Some(dir) = std::env::var_os(SCRIPTS_PATH_ENV) {
            log::debug!("Using scripts directory from {}: {:?}", SCRIPTS_PATH_ENV, dir);
            opts.scripts_dir = PathBuf::from(dir);
        }
        opts
    }

    /// Sets the directory scripts are loaded from.
    pub fn scripts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scripts_dir = dir.into();
        self
    }

    /// Sets the per-script execution timeout.
    pub fn script_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.script_timeout = timeout;
        self
    }

    /// Sets the maximum number of operations per transaction.
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_batch_size == 0 {
            return Err(crate::Error::invalid_argument("max_batch_size must be > 0"));
        }
        if self.script_timeout == Some(Duration::ZERO) {
            return Err(crate::Error::invalid_argument(
                "script_timeout must be non-zero (use None to disable it)",
            ));
        }
        if self.scripts_dir.as_os_str().is_empty() {
            return Err(crate::Error::invalid_argument("scripts_dir must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert!(opts.scripts_dir.ends_with("scripts"));
        assert_eq!(opts.script_timeout, Some(Duration::from_secs(5)));
        assert_eq!(opts.max_batch_size, 10_000);
    }

    #[test]
    fn test_options_builder() {
        let opts = Options::new()
            .scripts_dir("/opt/scripts")
            .script_timeout(None)
            .max_batch_size(16);

        assert_eq!(opts.scripts_dir, PathBuf::from("/opt/scripts"));
        assert_eq!(opts.script_timeout, None);
        assert_eq!(opts.max_batch_size, 16);
    }

    #[test]
    fn test_options_validation() {
        let mut opts = Options::default();
        assert!(opts.validate().is_ok());

        opts.max_batch_size = 0;
        assert!(opts.validate().is_err());

        opts.max_batch_size = 1;
        opts.script_timeout = Some(Duration::ZERO);
        assert!(opts.validate().is_err());

        opts.script_timeout = None;
        opts.scripts_dir = PathBuf::new();
        assert!(opts.validate().is_err());
    }
}
