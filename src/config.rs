use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_yaml;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "lesezeichen")]
#[command(about = "Runs the lesezeichen bookmarks sync service", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lesezeichen")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

#[derive(Debug, Deserialize, Clone)]
pub struct App {
    database: String,
    port: u16,
    #[serde(default)]
    pub turso_url: Option<String>,
    #[serde(default)]
    pub turso_auth_token: Option<String>,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_seconds: u64,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_sync_interval() -> u64 {
    60
}

fn default_busy_timeout() -> u64 {
    5000
}

impl App {
    pub fn get_db(&self) -> &str {
        &self.database
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Turso URL and token, when both are set to something non-empty.
    pub fn replica(&self) -> Option<(&str, &str)> {
        match (self.turso_url.as_deref(), self.turso_auth_token.as_deref()) {
            (Some(url), Some(token)) if !url.is_empty() && !token.is_empty() => Some((url, token)),
            _ => None,
        }
    }
}

/// Static service description served on `/info`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_max_sync_size", alias = "max_sync_size")]
    pub max_sync_size: u64,
    #[serde(default = "default_message")]
    pub message: String,
    #[serde(default = "default_status")]
    pub status: i32,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_location() -> String {
    "DE".to_owned()
}

fn default_max_sync_size() -> u64 {
    1_048_576
}

fn default_message() -> String {
    "Hello World".to_owned()
}

fn default_status() -> i32 {
    1
}

fn default_version() -> String {
    "1.1.12".to_owned()
}

impl Default for Info {
    fn default() -> Self {
        Info {
            location: default_location(),
            max_sync_size: default_max_sync_size(),
            message: default_message(),
            status: default_status(),
            version: default_version(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub info: Info,
}

impl Config {
    pub fn new(path: &str) -> Result<Self> {
        let cfg = Config::load_config(path)?;
        Ok(cfg)
    }

    fn load_config(path: &str) -> Result<Config> {
        let yaml_str = fs::read_to_string(path)?;
        Config::from_yaml(&yaml_str)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Config> {
        let yaml_with_env = Config::substitute_env_vars(yaml_str)?;
        let config: Config = serde_yaml::from_str(&yaml_with_env)?;
        Ok(config)
    }

    fn substitute_env_vars(yaml_str: &str) -> Result<String> {
        let mut result = yaml_str.to_string();
        let mut offset = 0;

        while let Some(start) = result[offset..].find("${") {
            let actual_start = offset + start;
            if let Some(end) = result[actual_start..].find("}") {
                let var_name = &result[actual_start + 2..actual_start + end];

                // ${VAR:-default}
                let env_value = if let Some(default_start) = var_name.find(":-") {
                    let actual_var = &var_name[..default_start];
                    let default_val = &var_name[default_start + 2..];
                    env::var(actual_var).unwrap_or_else(|_| default_val.to_string())
                } else {
                    env::var(var_name).unwrap_or_else(|_| {
                        tracing::warn!(var = var_name, "environment variable not found");
                        String::new()
                    })
                };

                result.replace_range(actual_start..actual_start + end + 1, &env_value);
                offset = actual_start + env_value.len();
            } else {
                break;
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_info_defaults() {
        let cfg = Config::from_yaml("app:\n  database: bookmarks.db\n  port: 8080\n").unwrap();
        assert_eq!(cfg.app.get_db(), "bookmarks.db");
        assert_eq!(cfg.app.get_port(), 8080);
        assert_eq!(cfg.app.sync_interval_seconds, 60);
        assert_eq!(cfg.app.busy_timeout(), Duration::from_millis(5000));
        assert!(cfg.app.replica().is_none());
        assert_eq!(cfg.info, Info::default());
    }

    #[test]
    fn test_env_default_substitution() {
        let yaml = r#"
app:
  database: ${LESEZEICHEN_TEST_UNSET_DB:-fallback.db}
  port: 9000
  turso_url: ${LESEZEICHEN_TEST_UNSET_URL:-}
  turso_auth_token: token
info:
  location: NL
  max_sync_size: 2048
"#;
        let cfg = Config::from_yaml(yaml).unwrap();
        assert_eq!(cfg.app.get_db(), "fallback.db");
        assert!(cfg.app.replica().is_none());
        assert_eq!(cfg.info.location, "NL");
        assert_eq!(cfg.info.max_sync_size, 2048);
        assert_eq!(cfg.info.version, "1.1.12");
    }

    #[test]
    fn test_info_serializes_camel_case() {
        let json = serde_json::to_value(Info::default()).unwrap();
        assert_eq!(json["maxSyncSize"], 1_048_576);
        assert_eq!(json["location"], "DE");
        assert_eq!(json["status"], 1);
    }
}
