// src/config.rs
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "mozvpn";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Prepended to every command that changes tunnel state.
    pub privilege_prefix: Vec<String>,
    pub wg_quick_program: String,
    pub wg_program: String,
    /// Run `wg show interfaces` through `privilege_prefix` as well.
    pub elevate_show: bool,
    /// Shell command printing the active interface, replacing `wg show interfaces`.
    pub interfaces_query: Option<String>,
    pub ipinfo_url: String,
    pub command_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub locations_file: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            privilege_prefix: vec!["sudo".to_string(), "-n".to_string()],
            wg_quick_program: "wg-quick".to_string(),
            wg_program: "wg".to_string(),
            elevate_show: false,
            interfaces_query: None,
            ipinfo_url: "https://ipinfo.io".to_string(),
            command_timeout_secs: 10,
            http_timeout_secs: 10,
            poll_interval_ms: 1000,
            locations_file: app_dir()
                .map(|dir| dir.join("locations.csv"))
                .unwrap_or_else(|| PathBuf::from("locations.csv")),
        }
    }
}

fn app_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR))
}

impl AppConfig {
    pub fn default_path() -> anyhow::Result<PathBuf> {
        Ok(app_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find config directory"))?
            .join("config.json"))
    }

    pub fn load_from(config_file: &Path) -> anyhow::Result<Self> {
        if config_file.exists() {
            let content = std::fs::read_to_string(config_file)
                .with_context(|| format!("reading {}", config_file.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", config_file.display()))
        } else {
            log::debug!("{} not found, using defaults", config_file.display());
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, config_file: &Path) -> anyhow::Result<()> {
        if let Some(dir) = config_file.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_file, content)?;
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
