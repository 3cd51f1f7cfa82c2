//! Typed configuration: the full `Options` record a session needs, layered from an optional
//! TOML file (defaults) and CLI flags (overrides).
//!
//! Grounded on the two-layer file-then-CLI settings record in
//! `other_examples/13e1ecae_gustcol-smartcopy__src-config-settings.rs.rs`, combined with the
//! `clap::Parser` derive style used for the CLI front-end.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, IoContext};

/// The full option set a session needs, regardless of which verb is driving it. Individual verbs
/// ignore the fields they have no use for (`Pull`/`Verify` recover `host`/`branch`/etc. from a
/// fresh discovery round and the persisted manifest rather than requiring them again).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Options {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub repository_path: Option<String>,
    pub branch: Option<String>,
    pub target_directory: Option<PathBuf>,
    pub work_directory: Option<PathBuf>,
    pub have: Option<String>,
    pub want: Option<String>,
    #[serde(default)]
    pub clone: bool,
    pub keep_pack: Option<PathBuf>,
    pub use_pack: Option<PathBuf>,
    #[serde(default)]
    pub verbosity: u8,
}

impl Options {
    /// Overlays `overrides` on top of `self` (the file-loaded defaults): any `Some`/non-default
    /// field on `overrides` wins. Booleans and counters (`clone`, `verbosity`) are taken from
    /// `overrides` unconditionally since clap always produces a concrete value for them.
    pub fn merged_with(self, overrides: Options) -> Options {
        Options {
            host: overrides.host.or(self.host),
            port: overrides.port.or(self.port),
            repository_path: overrides.repository_path.or(self.repository_path),
            branch: overrides.branch.or(self.branch),
            target_directory: overrides.target_directory.or(self.target_directory),
            work_directory: overrides.work_directory.or(self.work_directory),
            have: overrides.have.or(self.have),
            want: overrides.want.or(self.want),
            clone: overrides.clone || self.clone,
            keep_pack: overrides.keep_pack.or(self.keep_pack),
            use_pack: overrides.use_pack.or(self.use_pack),
            verbosity: overrides.verbosity.max(self.verbosity),
        }
    }

    pub fn require_host(&self) -> Result<&str, Error> {
        self.host
            .as_deref()
            .ok_or_else(|| Error::Config("missing required option 'host'".to_string()))
    }

    pub fn require_repository_path(&self) -> Result<&str, Error> {
        self.repository_path
            .as_deref()
            .ok_or_else(|| Error::Config("missing required option 'repository_path'".to_string()))
    }

    pub fn require_branch(&self) -> Result<&str, Error> {
        self.branch
            .as_deref()
            .ok_or_else(|| Error::Config("missing required option 'branch'".to_string()))
    }

    pub fn require_target_directory(&self) -> Result<&Path, Error> {
        self.target_directory
            .as_deref()
            .ok_or_else(|| Error::Config("missing required option 'target_directory'".to_string()))
    }

    pub fn require_work_directory(&self) -> Result<&Path, Error> {
        self.work_directory
            .as_deref()
            .ok_or_else(|| Error::Config("missing required option 'work_directory'".to_string()))
    }

    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(443)
    }
}

/// Loads a TOML options file, if a path was given. A caller-supplied `None` is not an error: it
/// just means "no file layer, CLI flags are authoritative".
pub fn load_file(path: Option<&Path>) -> Result<Options, Error> {
    let Some(path) = path else {
        return Ok(Options::default());
    };
    let raw = fs::read_to_string(path).io_context(path)?;
    toml::from_str(&raw).map_err(|source| Error::ConfigFile {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn overrides_win_over_file_defaults() {
        let file_defaults = Options {
            host: Some("file-host".to_string()),
            verbosity: 0,
            ..Options::default()
        };
        let cli_overrides = Options {
            host: Some("cli-host".to_string()),
            verbosity: 2,
            ..Options::default()
        };
        let merged = file_defaults.merged_with(cli_overrides);
        assert_eq!(merged.host.as_deref(), Some("cli-host"));
        assert_eq!(merged.verbosity, 2);
    }

    #[test]
    fn missing_override_falls_back_to_file_default() {
        let file_defaults = Options {
            branch: Some("main".to_string()),
            ..Options::default()
        };
        let merged = file_defaults.merged_with(Options::default());
        assert_eq!(merged.branch.as_deref(), Some("main"));
    }

    #[test]
    fn clone_flag_is_true_if_either_layer_sets_it() {
        let file_defaults = Options {
            clone: true,
            ..Options::default()
        };
        let merged = file_defaults.merged_with(Options::default());
        assert!(merged.clone);
    }

    #[test]
    fn no_config_path_yields_defaults() {
        let opts = load_file(None).unwrap();
        assert!(opts.host.is_none());
    }

    #[test]
    fn loads_toml_file() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), "host = \"example.invalid\"\nverbosity = 1\n").unwrap();
        let opts = load_file(Some(file.path())).unwrap();
        assert_eq!(opts.host.as_deref(), Some("example.invalid"));
        assert_eq!(opts.verbosity, 1);
    }

    #[test]
    fn require_host_errors_when_absent() {
        let opts = Options::default();
        assert!(opts.require_host().is_err());
    }
}
