use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const CONFIG_FILE_NAME: &str = "warranty-keeper.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the hosted backend
    pub api_url: String,
    /// Public (anon) key sent with every request
    pub anon_key: String,
    pub snapshot_ttl_secs: u64,
    /// Ask the server to confirm a gated action before mutating
    pub server_verification: bool,
    /// Days before expiry at which reminders fire
    pub reminder_offsets_days: Vec<u32>,
    pub reminder_poll_secs: u64,
    pub show_notifications: bool,
    pub database_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            snapshot_ttl_secs: 30,
            server_verification: false,
            reminder_offsets_days: vec![30, 7, 1],
            reminder_poll_secs: 60,
            show_notifications: true,
            database_path: None,
        }
    }
}

impl AppConfig {
    /// Config file, then `.env`, then process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).or_else(default_config_path);

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) => {
                debug!("No config file at {:?}, using defaults", path);
                Self::default()
            }
            None => Self::default(),
        };

        dotenv::dotenv().ok();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str(&text)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("WARRANTY_API_URL") {
            self.api_url = url;
        }
        if let Ok(key) = env::var("WARRANTY_ANON_KEY") {
            self.anon_key = key;
        }
        if let Some(ttl) = parse_var("WARRANTY_SNAPSHOT_TTL_SECS")? {
            self.snapshot_ttl_secs = ttl;
        }
        if let Some(verify) = parse_var("WARRANTY_SERVER_VERIFICATION")? {
            self.server_verification = verify;
        }
        if let Ok(path) = env::var("WARRANTY_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::Missing("api_url"));
        }
        if self.reminder_poll_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "reminder_poll_secs".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }

    pub fn reminder_poll_interval(&self) -> Duration {
        Duration::from_secs(self.reminder_poll_secs)
    }

    /// Configured database path or the platform data directory
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("com", "warrantykeeper", "warranty-keeper")
                .map(|dirs| dirs.data_dir().join("warranty-keeper.db"))
                .unwrap_or_else(|| PathBuf::from(".warranty-keeper/warranty-keeper.db"))
        })
    }
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "warrantykeeper", "warranty-keeper")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key: key.to_string(), value }),
        Err(_) => Ok(None),
    }
}
