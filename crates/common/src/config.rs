use crate::{DomainError, SendableRange};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tor control protocol constants
pub mod control {
    /// Default control port address
    pub const DEFAULT_ADDRESS: &str = "127.0.0.1:9051";

    /// Port the onion address exposes to visitors
    pub const DEFAULT_ONION_PORT: u16 = 80;

    /// Timeout for establishing the control connection
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;

    /// Timeout for a single command reply
    pub const REPLY_TIMEOUT_SECS: u64 = 30;

    /// Longest reply line accepted from the daemon
    pub const MAX_LINE_LEN: usize = 64 * 1024;

    /// Success status code
    pub const STATUS_OK: u16 = 250;
}

/// Onion provisioning constants
pub mod provisioning {
    /// Registry polls before a detached registration counts as missing
    pub const VERIFY_ATTEMPTS: u32 = 6;

    /// First wait before polling the detached registry
    pub const VERIFY_INITIAL_INTERVAL_MS: u64 = 250;

    /// Upper bound on the wait between registry polls
    pub const VERIFY_MAX_INTERVAL_MS: u64 = 2_000;
}

/// LNURL-pay constants
pub mod lnurl {
    pub const DEFAULT_USERNAME: &str = "btc";

    pub const MIN_SENDABLE_MSAT: u64 = 1_000;

    pub const MAX_SENDABLE_MSAT: u64 = 250_000_000;

    pub const COMMENTS_ALLOWED: usize = 160;

    pub const SUCCESS_MESSAGE: &str = "Thank You!";

    /// Local web server the onion service forwards to
    pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0";

    pub const DEFAULT_LISTEN_PORT: u16 = 7890;
}

/// Tor control connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Control port address (host:port)
    pub address: String,

    /// Port exposed on the .onion address
    pub onion_port: u16,

    pub connect_timeout_secs: u64,

    pub reply_timeout_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            address: control::DEFAULT_ADDRESS.to_string(),
            onion_port: control::DEFAULT_ONION_PORT,
            connect_timeout_secs: control::CONNECT_TIMEOUT_SECS,
            reply_timeout_secs: control::REPLY_TIMEOUT_SECS,
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,

    pub listen_port: u16,

    /// User part of the lightning address
    pub username: String,

    /// Text shown to payers in the wallet
    pub text_message: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: lnurl::DEFAULT_LISTEN_ADDR.to_string(),
            listen_port: lnurl::DEFAULT_LISTEN_PORT,
            username: lnurl::DEFAULT_USERNAME.to_string(),
            text_message: None,
        }
    }
}

impl ServerConfig {
    /// `host:port` the onion service forwards to
    pub fn forward_target(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }

    pub fn text_message(&self) -> String {
        self.text_message
            .clone()
            .unwrap_or_else(|| format!("Send sats. {}", self.username))
    }
}

/// Pay request limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LnurlConfig {
    pub min_sendable: u64,

    pub max_sendable: u64,

    pub comments_allowed: usize,

    pub success_message: String,
}

impl Default for LnurlConfig {
    fn default() -> Self {
        Self {
            min_sendable: lnurl::MIN_SENDABLE_MSAT,
            max_sendable: lnurl::MAX_SENDABLE_MSAT,
            comments_allowed: lnurl::COMMENTS_ALLOWED,
            success_message: lnurl::SUCCESS_MESSAGE.to_string(),
        }
    }
}

impl LnurlConfig {
    pub fn sendable_range(&self) -> Result<SendableRange, DomainError> {
        SendableRange::new(self.min_sendable, self.max_sendable)
    }
}

/// How the onion service is registered and verified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Register a detached service that outlives the control connection
    pub detach: bool,

    pub verify_attempts: u32,

    pub verify_initial_interval_ms: u64,

    pub verify_max_interval_ms: u64,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            detach: false,
            verify_attempts: provisioning::VERIFY_ATTEMPTS,
            verify_initial_interval_ms: provisioning::VERIFY_INITIAL_INTERVAL_MS,
            verify_max_interval_ms: provisioning::VERIFY_MAX_INTERVAL_MS,
        }
    }
}

/// Lightning node (LND REST) settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightningConfig {
    pub rest_url: String,

    pub macaroon_path: String,

    /// PEM certificate to trust for the REST endpoint
    pub tls_cert_path: Option<String>,

    pub invoice_expiry_secs: u64,
}

impl Default for LightningConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://127.0.0.1:8080".to_string(),
            macaroon_path: "./data/invoice.macaroon".to_string(),
            tls_cert_path: Some("./data/tls.cert".to_string()),
            invoice_expiry_secs: 3600,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// JSON file holding the control password and onion key
    pub settings_path: Option<String>,

    pub control: ControlConfig,

    pub server: ServerConfig,

    pub lnurl: LnurlConfig,

    pub provisioning: ProvisioningConfig,

    pub lightning: LightningConfig,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_control_address(mut self, address: impl Into<String>) -> Self {
        self.control.address = address.into();
        self
    }

    pub fn with_detach(mut self, detach: bool) -> Self {
        self.provisioning.detach = detach;
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.server.username = username.into();
        self
    }

    pub fn settings_path(&self) -> PathBuf {
        PathBuf::from(self.settings_path.as_deref().unwrap_or("./settings.json"))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.control.connect_timeout_secs)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.control.reply_timeout_secs)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &PathBuf) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lnurl
            .sendable_range()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.server.username.is_empty() || self.server.username.contains('@') {
            return Err(ConfigError::Invalid(format!(
                "username {:?} must be non-empty and contain no '@'",
                self.server.username
            )));
        }
        if self.provisioning.verify_attempts == 0 {
            return Err(ConfigError::Invalid(
                "provisioning.verify_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config file: {0}")]
    WriteError(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
