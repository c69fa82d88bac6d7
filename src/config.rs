use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::messages;
use crate::mail::DEFAULT_LOGO_URL;

/// Main configuration structure for quati
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sheets: SheetsConfig,
    pub warehouse: WarehouseConfig,
    pub mail: MailConfig,
    pub browser: BrowserConfig,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsConfig {
    pub sheets_api_url: String,
    pub drive_api_url: String,
    /// Bearer token for the Google APIs; usually injected from the environment
    #[serde(default)]
    pub access_token: Option<String>,
    /// Service-account JSON key, used when no access token is given
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub api_url: String,
    pub project: String,
    #[serde(default)]
    pub location: Option<String>,
    /// Milliseconds each `jobs.query` call may block server-side
    pub query_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub logo_url: String,
    pub sender: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub default_recipients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub start_url: String,
    #[serde(default)]
    pub binary: Option<PathBuf>,
    pub headless: bool,
    pub muted: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_seconds: u64,
}

/// Retry configuration per remote operation kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    pub open_resource: RetryConfig,
    pub fetch_rows: RetryConfig,
    pub next_row: RetryConfig,
    pub write_rows: RetryConfig,
}

impl Config {
    /// Read `.env`, then `QUATI_CONFIG_PATH` (default `quati.yaml`), then
    /// environment overrides. Unreadable files fall back to defaults.
    pub fn load() -> Self {
        let env_paths = ["../.env", ".env"];

        let mut env_loaded = false;
        for path in &env_paths {
            if dotenvy::from_path(path).is_ok() {
                tracing::info!("Loaded .env from: {}", path);
                env_loaded = true;
                break;
            }
        }

        if !env_loaded {
            tracing::debug!("No .env file found - continuing with env vars only");
        }

        let config_path =
            env::var("QUATI_CONFIG_PATH").unwrap_or_else(|_| "quati.yaml".to_string());

        let mut config = Self::from_file(&config_path);
        config.apply_env_overrides();

        if let Err(e) = config.validate() {
            tracing::warn!("{}: {} - continuing anyway", messages::ETL_CONFIG, e);
        }

        config
    }

    fn from_file(config_path: &str) -> Self {
        if !Path::new(config_path).exists() {
            tracing::debug!("Config file not found at {} - using defaults", config_path);
            return Self::default();
        }

        match fs::read_to_string(config_path) {
            Ok(contents) => match serde_yaml::from_str::<Config>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", config_path);
                    config
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to parse config file {}: {} - using defaults",
                        config_path,
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                tracing::error!(
                    "Failed to read config file {}: {} - using defaults",
                    config_path,
                    e
                );
                Self::default()
            }
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(token) = env::var("GOOGLE_ACCESS_TOKEN") {
            self.sheets.access_token = Some(token);
        }
        if let Ok(path) = env::var("GOOGLE_APPLICATION_CREDENTIALS") {
            self.sheets.credentials_file = Some(PathBuf::from(path));
        }

        // Warehouse overrides
        if let Ok(project) = env::var("QUATI_GCP_PROJECT") {
            self.warehouse.project = project;
        }
        if let Ok(location) = env::var("QUATI_BQ_LOCATION") {
            self.warehouse.location = Some(location);
        }

        // Mail overrides
        if let Ok(host) = env::var("QUATI_SMTP_HOST") {
            self.mail.smtp_host = host;
        }
        if let Ok(port) = env::var("QUATI_SMTP_PORT") {
            if let Ok(port_num) = port.parse() {
                self.mail.smtp_port = port_num;
            }
        }
        if let Ok(sender) = env::var("QUATI_MAIL_SENDER") {
            self.mail.sender = sender;
        }
        if let Ok(secret) = env::var("QUATI_MAIL_SECRET") {
            self.mail.secret = Some(secret);
        }
        if let Ok(recipients) = env::var("QUATI_MAIL_RECIPIENTS") {
            self.mail.default_recipients = recipients
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from)
                .collect();
        }

        // Browser overrides
        if let Ok(binary) = env::var("QUATI_BROWSER_BINARY") {
            self.browser.binary = Some(PathBuf::from(binary));
        }
        if let Ok(headless) = env::var("QUATI_BROWSER_HEADLESS") {
            if let Ok(flag) = headless.parse() {
                self.browser.headless = flag;
            }
        }

        // Retry overrides apply to every operation kind
        if let Ok(delay) = env::var("QUATI_RETRY_DELAY_SECONDS") {
            if let Ok(secs) = delay.parse::<u64>() {
                for cfg in self.retry.all_mut() {
                    cfg.delay_seconds = secs;
                }
            }
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        for (name, cfg) in self.retry.named() {
            if cfg.max_attempts == 0 {
                return Err(format!("retry.{name}.max_attempts cannot be 0").into());
            }
        }

        if self.mail.smtp_port == 0 {
            return Err("SMTP port cannot be 0".into());
        }

        if self.warehouse.project.is_empty() {
            return Err("warehouse.project is empty (set QUATI_GCP_PROJECT)".into());
        }

        if self.sheets.access_token.as_deref().is_none_or(str::is_empty)
            && self.sheets.credentials_file.is_none()
        {
            return Err("set GOOGLE_ACCESS_TOKEN or GOOGLE_APPLICATION_CREDENTIALS".into());
        }

        Ok(())
    }
}

impl RetrySettings {
    fn named(&self) -> [(&'static str, RetryConfig); 4] {
        [
            ("open_resource", self.open_resource),
            ("fetch_rows", self.fetch_rows),
            ("next_row", self.next_row),
            ("write_rows", self.write_rows),
        ]
    }

    fn all_mut(&mut self) -> [&mut RetryConfig; 4] {
        [
            &mut self.open_resource,
            &mut self.fetch_rows,
            &mut self.next_row,
            &mut self.write_rows,
        ]
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sheets: SheetsConfig {
                sheets_api_url: "https://sheets.googleapis.com/v4".to_string(),
                drive_api_url: "https://www.googleapis.com/drive/v3".to_string(),
                access_token: None,
                credentials_file: None,
            },
            warehouse: WarehouseConfig {
                api_url: "https://bigquery.googleapis.com/bigquery/v2".to_string(),
                project: String::new(),
                location: None,
                query_timeout_ms: 10_000,
            },
            mail: MailConfig {
                smtp_host: "smtp.mailing.com".to_string(),
                smtp_port: 587,
                logo_url: DEFAULT_LOGO_URL.to_string(),
                sender: String::new(),
                secret: None,
                default_recipients: Vec::new(),
            },
            browser: BrowserConfig {
                start_url: "https://google.com.br".to_string(),
                binary: None,
                headless: false,
                muted: true,
            },
            retry: RetrySettings {
                open_resource: RetryConfig {
                    max_attempts: 5,
                    delay_seconds: 60,
                },
                fetch_rows: RetryConfig {
                    max_attempts: 5,
                    delay_seconds: 60,
                },
                next_row: RetryConfig {
                    max_attempts: 4,
                    delay_seconds: 60,
                },
                write_rows: RetryConfig {
                    max_attempts: 5,
                    delay_seconds: 60,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;

    #[test]
    fn test_defaults_match_retry_presets() {
        let cfg = Config::default();
        let next_row = RetryPolicy::try_from(&cfg.retry.next_row).expect("valid policy");
        assert_eq!(next_row, RetryPolicy::NEXT_ROW);
        let open = RetryPolicy::try_from(&cfg.retry.open_resource).expect("valid policy");
        assert_eq!(open, RetryPolicy::OPEN_RESOURCE);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut cfg = Config::default();
        cfg.warehouse.project = "marketing".to_string();
        cfg.sheets.access_token = Some("token".to_string());
        assert!(cfg.validate().is_ok());

        cfg.retry.fetch_rows.max_attempts = 0;
        let err = cfg.validate().expect_err("zero attempts is invalid");
        assert!(err.to_string().contains("fetch_rows"));
    }

    #[test]
    fn test_validate_accepts_credentials_file_instead_of_token() {
        let mut cfg = Config::default();
        cfg.warehouse.project = "marketing".to_string();
        assert!(cfg.validate().is_err());

        cfg.sheets.credentials_file = Some(PathBuf::from("/etc/quati/sa.json"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_yaml_round_trip_keeps_sections() {
        let yaml = r#"
sheets:
  sheets_api_url: "http://localhost:9000/v4"
  drive_api_url: "http://localhost:9000/drive/v3"
warehouse:
  api_url: "http://localhost:9000/bq"
  project: "mkt-data"
  query_timeout_ms: 500
mail:
  smtp_host: "smtp.example.com"
  smtp_port: 2525
  logo_url: "http://localhost/logo.png"
  sender: "sys@service.com"
  default_recipients: ["admin@service.com"]
browser:
  start_url: "https://example.com"
  headless: true
  muted: true
retry:
  open_resource: { max_attempts: 2, delay_seconds: 1 }
  fetch_rows: { max_attempts: 2, delay_seconds: 1 }
  next_row: { max_attempts: 2, delay_seconds: 1 }
  write_rows: { max_attempts: 3, delay_seconds: 0 }
"#;
        let cfg: Config = serde_yaml::from_str(yaml).expect("valid yaml");
        assert_eq!(cfg.warehouse.project, "mkt-data");
        assert_eq!(cfg.mail.smtp_port, 2525);
        assert!(cfg.browser.binary.is_none());
        assert_eq!(cfg.retry.write_rows.max_attempts, 3);
    }
}
