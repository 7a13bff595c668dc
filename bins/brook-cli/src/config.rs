//! CLI configuration: flags first, then environment, then defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use brook_esplora::config::{DEFAULT_TIMEOUT_SECS, EsploraConfig, TESTNET_URL};
use brook_store::file::STORE_FILE_NAME;

pub const ENV_DATA_DIR: &str = "BROOK_DATA_DIR";
pub const ENV_ESPLORA_URL: &str = "BROOK_ESPLORA_URL";
pub const ENV_TIMEOUT_SECS: &str = "BROOK_TIMEOUT_SECS";
pub const ENV_LOG_LEVEL: &str = "BROOK_LOG";

/// Values given on the command line, if any.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub esplora_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CliConfig {
    /// Directory holding the wallet state file.
    pub data_dir: PathBuf,
    /// Esplora API root.
    pub esplora_url: String,
    pub timeout_secs: u64,
    /// Filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl CliConfig {
    /// Resolve against the process environment.
    pub fn load(overrides: Overrides) -> Result<Self> {
        Self::resolve(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup.
    pub fn resolve(overrides: Overrides, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = match overrides.data_dir.or_else(|| env(ENV_DATA_DIR).map(PathBuf::from)) {
            Some(dir) => dir,
            None => default_data_dir()?,
        };

        let esplora_url = overrides
            .esplora_url
            .or_else(|| env(ENV_ESPLORA_URL))
            .unwrap_or_else(|| TESTNET_URL.to_string());

        let timeout_secs = match overrides.timeout_secs {
            Some(secs) => secs,
            None => match env(ENV_TIMEOUT_SECS) {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("{ENV_TIMEOUT_SECS} must be a positive integer"))?,
                None => DEFAULT_TIMEOUT_SECS,
            },
        };

        let log_level = overrides
            .log_level
            .or_else(|| env(ENV_LOG_LEVEL))
            .unwrap_or_else(|| "info".to_string());

        Ok(Self {
            data_dir,
            esplora_url,
            timeout_secs,
            log_level,
        })
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE_NAME)
    }

    pub fn esplora(&self) -> EsploraConfig {
        EsploraConfig {
            base_url: self.esplora_url.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

fn default_data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".brook"))
}
