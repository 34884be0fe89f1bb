//! Configuration file wrangling
// (c) 2025 Ross Younger

use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
};

use anyhow::Result;
use figment::{
    providers::{Env, Format as _, Toml},
    value::Dict,
    Figment, Provider,
};
use tracing::{debug, warn};

use super::Configuration;

/// Prefix of environment variables that override configuration
pub const ENV_PREFIX: &str = "DOWNCHANNEL_";

const CONFIG_FILE_NAME: &str = "downchannel.toml";

/// Processes and merges all possible configuration sources.
///
/// To see which files apply on the current platform, run `downchannel --config-files`.
#[derive(Debug, Default)]
pub struct Manager {
    /// Configuration data
    data: Figment,
}

impl Manager {
    /// Constructor. Holds no data; see [`standard`](Self::standard) for production use.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// General constructor for production use.
    ///
    /// Reads, in increasing priority: the system defaults, the system configuration file,
    /// the user configuration file, an explicitly named file if given, and the environment.
    #[must_use]
    pub fn standard(explicit_file: Option<&Path>) -> Self {
        let mut new1 = Self::new();
        new1.apply_system_default();
        for path in Self::config_file_paths() {
            new1.add_config_file(&path);
        }
        if let Some(path) = explicit_file {
            if path.exists() {
                new1.merge_provider(Toml::file(path));
            } else {
                warn!("configuration file {path:?} not found");
            }
        }
        new1.merge_provider(Env::prefixed(ENV_PREFIX));
        new1
    }

    /// Testing/internal constructor, does not read files or apply environment; DOES apply system default.
    #[must_use]
    pub fn without_files() -> Self {
        let mut new1 = Self::new();
        new1.apply_system_default();
        new1
    }

    fn add_config_file(&mut self, path: &Path) {
        if !path.exists() {
            debug!("configuration file {path:?} not present");
            return;
        }
        self.merge_provider(Toml::file(path));
    }

    fn config_file_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc").join(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("downchannel").join(CONFIG_FILE_NAME));
        } else {
            warn!("could not determine user configuration directory");
        }
        paths
    }

    /// Returns the list of configuration files we would read, whether or not they exist.
    #[must_use]
    pub fn config_files() -> Vec<String> {
        Self::config_file_paths()
            .iter()
            .map(|p| p.as_os_str().to_string_lossy().to_string())
            .collect()
    }

    /// Merges in a data set, which is some sort of [figment::Provider](https://docs.rs/figment/latest/figment/trait.Provider.html).
    /// This uses figment's `merge` operation, which prefers to _replace_ existing items.
    pub fn merge_provider<T>(&mut self, provider: T)
    where
        T: Provider,
    {
        let f = std::mem::take(&mut self.data);
        self.data = f.merge(provider); // in the error case, this leaves the provider in a fused state
    }

    /// Applies the system default settings, at a lower priority than everything else
    pub fn apply_system_default(&mut self) {
        let f = std::mem::take(&mut self.data);
        self.data = f.join(super::SystemDefault {});
    }

    /// Extracts and validates the configuration
    pub fn get(&self) -> Result<Configuration> {
        let config: Configuration = self.data.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the current values, with where each came from
    pub fn to_display(&self) -> Result<String> {
        let values: Dict = self.data.extract()?;
        let mut out = String::new();
        for (key, value) in &values {
            let source = self
                .data
                .find_metadata(key)
                .map_or("unknown", |m| m.name.as_ref());
            let rendered = value
                .as_str()
                .map_or_else(|| format!("{value:?}"), ToOwned::to_owned);
            let _ = writeln!(out, "{key:<24} {rendered:<32} ({source})");
        }
        Ok(out)
    }
}
