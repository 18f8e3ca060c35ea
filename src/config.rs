use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

/// Longest accepted retention time, roughly a thousand years.
const MAX_EXPIRY_SECS: u64 = 1000 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub port: u16,
    pub default_lexer: String,
    /// Restricts the lexer catalog; the built-in list is used when absent.
    pub lexers: Option<Vec<String>>,
    /// Expiry class name to retention time in seconds.
    pub expiries: BTreeMap<String, u64>,
    pub database: Database,
    pub limits: Limits,
    pub slugs: Slugs,
    pub ratelimit: Ratelimit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum HTTP request body size in bytes.
    pub max_upload_size: usize,
    /// Maximum summed formatted size of all files in a paste, in bytes.
    pub paste_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Slugs {
    pub length: usize,
    pub long_length: usize,
    pub escalate_after: u32,
    pub max_attempts: u32,
    pub creation_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Ratelimit {
    pub enabled: bool,
    /// How often idle clients are dropped from the limiter, in seconds.
    pub cleanup_interval_secs: u64,
    pub read: AreaLimit,
    pub create: AreaLimit,
    pub delete: AreaLimit,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AreaLimit {
    pub per_minute: u32,
    pub burst: u32,
}

impl Config {
    /// Read the configuration from a TOML file, falling back to the defaults
    /// when the file does not exist.
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        let config = match tokio::fs::read_to_string(path).await {
            Ok(contents) => toml::from_str::<Config>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(error) => {
                return Err(error).with_context(|| format!("failed to read {}", path.display()))
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.expiries.is_empty() {
            bail!("at least one expiry must be configured");
        }
        if let Some((name, _)) = self.expiries.iter().find(|(_, secs)| **secs == 0) {
            bail!("expiry '{name}' must be longer than zero seconds");
        }
        if let Some((name, _)) = self.expiries.iter().find(|(_, secs)| **secs > MAX_EXPIRY_SECS) {
            bail!("expiry '{name}' is too long");
        }
        if self.limits.paste_size == 0 {
            bail!("limits.paste_size must be greater than zero");
        }
        if self.slugs.length == 0 || self.slugs.long_length < self.slugs.length {
            bail!("slugs.length must be non-zero and not exceed slugs.long_length");
        }
        Ok(())
    }

    /// Expiry class names, sorted.
    pub fn expiry_names(&self) -> Vec<String> {
        self.expiries.keys().cloned().collect()
    }

    /// Build an absolute URL from a path on this service.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_url: "http://localhost:8000".to_owned(),
            port: 8000,
            default_lexer: "text".to_owned(),
            lexers: None,
            expiries: BTreeMap::from([
                ("1hour".to_owned(), 60 * 60),
                ("1day".to_owned(), 60 * 60 * 24),
                ("1week".to_owned(), 60 * 60 * 24 * 7),
            ]),
            database: Database::default(),
            limits: Limits::default(),
            slugs: Slugs::default(),
            ratelimit: Ratelimit::default(),
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Database {
            url: "sqlite://pinbin.db?mode=rwc".to_owned(),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_upload_size: 2 * 1024 * 1024,
            paste_size: 256 * 1024,
        }
    }
}

impl Default for Slugs {
    fn default() -> Self {
        Slugs {
            length: 4,
            long_length: 26,
            escalate_after: 3,
            max_attempts: 32,
            creation_attempts: 3,
        }
    }
}

impl Default for Ratelimit {
    fn default() -> Self {
        Ratelimit {
            enabled: true,
            cleanup_interval_secs: 60,
            read: AreaLimit {
                per_minute: 600,
                burst: 60,
            },
            create: AreaLimit {
                per_minute: 30,
                burst: 10,
            },
            delete: AreaLimit {
                per_minute: 30,
                burst: 10,
            },
        }
    }
}

impl Ratelimit {
    /// Period of the idle client cleanup, `None` when rate limiting is off.
    pub fn cleanup_interval(&self) -> Option<Duration> {
        self.enabled
            .then(|| Duration::from_secs(self.cleanup_interval_secs.max(1)))
    }
}
