//! Runtime configuration
//!
//! Values come from defaults, an optional JSON file and the environment, in
//! that order of precedence (environment wins).

use crate::tree::MAX_KEY_LENGTH;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Switch that turns off all anchoring (records are still stored)
pub const DISABLE_ANCHORING_VAR: &str = "DISABLE_BLOCKCHAIN";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    /// Tree depth; record ids must be below 2^key_length
    pub key_length: u32,
    /// Queue entries examined per tree and pass on each tick
    pub batch_size: usize,
    /// Time between reconciliation ticks
    #[serde(rename = "interval_secs", with = "duration_secs")]
    pub interval: Duration,
    /// When false, records are stored without touching trees or queues
    pub anchoring_enabled: bool,
    /// Snapshot file
    pub database: PathBuf,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        AnchorConfig {
            key_length: 24,
            batch_size: 100,
            interval: Duration::from_secs(60),
            anchoring_enabled: true,
            database: PathBuf::from("anchors.smt"),
        }
    }
}

impl AnchorConfig {
    /// Defaults overridden by the environment
    pub fn from_env() -> Result<Self> {
        Self::default().apply_vars(|name| std::env::var(name).ok())
    }

    /// Read a JSON config file; absent fields keep their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: AnchorConfig = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Config file at the default location if present, then the environment
    pub fn resolve() -> Result<Self> {
        let base = match Self::default_path() {
            Some(path) if path.exists() => Self::load(path)?,
            _ => Self::default(),
        };
        base.apply_vars(|name| std::env::var(name).ok())
    }

    /// `<config dir>/smt-anchor/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("smt-anchor").join("config.json"))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_length == 0 || self.key_length > MAX_KEY_LENGTH {
            return Err(Error::Config(format!(
                "key_length must be within 1..={}, got {}",
                MAX_KEY_LENGTH, self.key_length
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".into()));
        }
        if self.interval.is_zero() {
            return Err(Error::Config("interval must be positive".into()));
        }
        Ok(())
    }

    fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = var("ANCHOR_KEY_LENGTH") {
            self.key_length = parse("ANCHOR_KEY_LENGTH", &v)?;
        }
        if let Some(v) = var("ANCHOR_BATCH_SIZE") {
            self.batch_size = parse("ANCHOR_BATCH_SIZE", &v)?;
        }
        if let Some(v) = var("ANCHOR_INTERVAL_SECS") {
            self.interval = Duration::from_secs(parse("ANCHOR_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = var("ANCHOR_DATABASE") {
            self.database = PathBuf::from(v);
        }
        if let Some(v) = var(DISABLE_ANCHORING_VAR) {
            let v = v.trim();
            if !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false") {
                self.anchoring_enabled = false;
            }
        }
        self.validate()?;
        Ok(self)
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{}={}: {}", name, value, e)))
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
