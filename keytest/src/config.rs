//! Harness configuration
//!
//! Read from a TOML file named by `KEYTEST_CONFIG`, or defaults when unset.
//! `KEYTEST_BLOCKLIST` and `KEYTEST_TESTDATA` override the matching fields
//! after the file is read.

use crate::collector::DEFAULT_TEST_PIN;
use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CONFIG: &str = "KEYTEST_CONFIG";
pub const ENV_BLOCKLIST: &str = "KEYTEST_BLOCKLIST";
pub const ENV_TESTDATA: &str = "KEYTEST_TESTDATA";

const BLOCK_LIST_FILE: &str = "blocklist.txt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Serial block list, `None` for the per-user default location
    pub block_list_path: Option<PathBuf>,
    /// Directory holding key and certificate fixtures
    pub test_data_dir: PathBuf,
    /// How long the reset flow waits for the key to come back
    pub reset_timeout_secs: u64,
    /// Delay before the reset flow asks for a touch
    pub touch_notice_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub default_pin: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            block_list_path: None,
            test_data_dir: Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata"),
            reset_timeout_secs: 30,
            touch_notice_delay_ms: 200,
            poll_interval_ms: 100,
            default_pin: DEFAULT_TEST_PIN.to_string(),
        }
    }
}

impl TestConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config = Self::from_toml_str(&content)?;
        log::debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Configuration for the current process, honouring the environment
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var_os(ENV_CONFIG) {
            Some(path) => Self::load(Path::new(&path))?,
            None => Self::default(),
        };
        if let Some(path) = std::env::var_os(ENV_BLOCKLIST) {
            config.block_list_path = Some(PathBuf::from(path));
        }
        if let Some(path) = std::env::var_os(ENV_TESTDATA) {
            config.test_data_dir = PathBuf::from(path);
        }
        Ok(config)
    }

    /// Configured block list, or `<local data dir>/keytest/blocklist.txt`
    pub fn block_list_path(&self) -> Result<PathBuf> {
        match &self.block_list_path {
            Some(path) => Ok(path.clone()),
            None => default_block_list_path(),
        }
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }

    pub fn touch_notice_delay(&self) -> Duration {
        Duration::from_millis(self.touch_notice_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

pub fn default_block_list_path() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join("keytest").join(BLOCK_LIST_FILE))
        .ok_or_else(|| Error::Config("no local data directory for this user".to_string()))
}
