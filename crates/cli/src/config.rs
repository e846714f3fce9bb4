//! `config.json` lookup and defaults.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const CONFIG_FILE: &str = "config.json";
const APP_DIR: &str = "cronned";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding descriptions and flows.
    #[serde(rename = "Dir")]
    pub dir: PathBuf,
    /// Log to `<LogDir>/cronned.log` instead of stderr.
    #[serde(rename = "LogDir")]
    pub log_dir: Option<PathBuf>,
    #[serde(rename = "LogLevel")]
    pub log_level: String,
    /// Address of the control surface; none disables it.
    #[serde(rename = "Bind")]
    pub bind: Option<String>,
    /// Variable the job secret is injected as.
    #[serde(rename = "SecretEnv")]
    pub secret_env: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: dirs::config_dir()
                .map(|d| d.join(APP_DIR))
                .unwrap_or_else(|| PathBuf::from(".")),
            log_dir: None,
            log_level: "info".to_string(),
            bind: None,
            secret_env: nodes::job::DEFAULT_SECRET_ENV.to_string(),
        }
    }
}

impl Config {
    /// Directories searched for `config.json`, most specific first.
    pub fn search_path(explicit: Option<&Path>) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(dir) = explicit {
            dirs.push(dir.to_path_buf());
        }
        dirs.push(PathBuf::from("/etc").join(APP_DIR));
        if let Some(home) = dirs::home_dir() {
            dirs.push(home.join(".config").join(APP_DIR));
        }
        dirs
    }

    /// Read the first `config.json` found in `search`, or the defaults if
    /// there is none. A file that exists but does not parse is an error.
    pub fn load(search: &[PathBuf]) -> anyhow::Result<Self> {
        let Some(path) = search
            .iter()
            .map(|dir| dir.join(CONFIG_FILE))
            .find(|p| p.is_file())
        else {
            return Ok(Self::default());
        };

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Command-line flags win over the file.
    pub fn with_overrides(mut self, dir: Option<PathBuf>, bind: Option<String>) -> Self {
        if let Some(dir) = dir {
            self.dir = dir;
        }
        if bind.is_some() {
            self.bind = bind;
        }
        self
    }
}
