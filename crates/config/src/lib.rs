//! Layered configuration for the `apod` command.
//!
//! Sources are merged in increasing order of precedence:
//!
//! 1. built-in defaults,
//! 2. `apod.toml`, `apod.yaml` and `apod.json` in the platform config
//!    directory,
//! 3. an explicit config file (`--config`),
//! 4. `APOD_`-prefixed environment variables, with `__` separating nested
//!    keys (`APOD_API__KEY=...`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "APOD_";
const FILE_STEM: &str = "apod";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    /// Cache root used when none is given on the command line.
    pub cache_root: Option<PathBuf>,
    /// Whether `fetch` sets the downloaded image as the desktop background.
    pub wallpaper: bool,
}

/// Where and how to look up the picture of the day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub url: String,
    pub key: String,
    pub timeout_secs: u64,
    /// Download the high resolution image when one is published.
    pub prefer_hd: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self { api: ApiConfig::default(), cache_root: None, wallpaper: true }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: "https://api.nasa.gov/planetary/apod".into(),
            key: "DEMO_KEY".into(),
            timeout_secs: 30,
            prefer_hd: false,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load the configuration from every source, including the environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let dirs = ProjectDirs::from("gov", "nasa", FILE_STEM);
        let figment = Self::files(dirs.as_ref().map(ProjectDirs::config_dir), explicit)?
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    /// Defaults layered with the config files only.
    ///
    /// Missing files in `config_dir` are skipped; a missing `explicit` file
    /// is an error.
    pub fn files(config_dir: Option<&Path>, explicit: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(dir) = config_dir {
            tracing::debug!(dir = %dir.display(), "looking for config files");
            figment = figment
                .merge(Toml::file(dir.join(format!("{FILE_STEM}.toml"))))
                .merge(Yaml::file(dir.join(format!("{FILE_STEM}.yaml"))))
                .merge(Json::file(dir.join(format!("{FILE_STEM}.json"))));
        }
        if let Some(path) = explicit {
            if !path.is_file() {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
            }
            figment = match path.extension().and_then(OsStr::to_str) {
                Some("toml") => figment.merge(Toml::file(path)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => exn::bail!(ErrorKind::Invalid(format!("unsupported config format: {}", path.display()))),
            };
        }
        Ok(figment)
    }

    /// Extract and validate a configuration from any figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.api.url.starts_with("https://") && !self.api.url.starts_with("http://") {
            exn::bail!(ErrorKind::Invalid(format!("api.url must be an http(s) URL, got {:?}", self.api.url)));
        }
        if self.api.key.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("api.key must not be empty".into()));
        }
        if self.api.timeout_secs == 0 {
            exn::bail!(ErrorKind::Invalid("api.timeout_secs must be greater than zero".into()));
        }
        Ok(())
    }
}
