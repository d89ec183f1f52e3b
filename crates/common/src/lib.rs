pub mod config;
pub mod settings;

pub use config::{AppConfig, ConfigError};
pub use settings::{Settings, SettingsError};

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Length of a v3 onion service id in base32 characters.
pub const V3_SERVICE_ID_LEN: usize = 56;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("service id is empty")]
    EmptyServiceId,
    #[error("invalid service id character {0:?}")]
    InvalidServiceIdChar(char),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("amount {amount} msat outside sendable range {min}..={max}")]
    AmountOutOfRange { amount: u64, min: u64, max: u64 },
    #[error("invalid sendable range: min {min} > max {max}")]
    InvalidRange { min: u64, max: u64 },
}

/// Public identifier of an onion service, without the `.onion` suffix.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        let id = id.trim().to_ascii_lowercase();
        let id = id.trim_end_matches(".onion");

        if id.is_empty() {
            return Err(DomainError::EmptyServiceId);
        }
        if let Some(c) = id.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(DomainError::InvalidServiceIdChar(c));
        }

        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hostname reachable over Tor, e.g. `abc...xyz.onion`
    pub fn onion_host(&self) -> String {
        format!("{}.onion", self.0)
    }

    /// Onion address version byte, if the id decodes as a v3 address
    pub fn version(&self) -> Option<u8> {
        if self.0.len() != V3_SERVICE_ID_LEN {
            return None;
        }

        // pubkey (32) || checksum (2) || version (1)
        let bytes = data_encoding::BASE32_NOPAD
            .decode(self.0.to_ascii_uppercase().as_bytes())
            .ok()?;
        if bytes.len() != 35 {
            return None;
        }
        Some(bytes[34])
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceId({})", self.0)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServiceId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ServiceId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ServiceId> for String {
    fn from(value: ServiceId) -> Self {
        value.0
    }
}

/// Amount in millisatoshis
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MilliSats(u64);

impl MilliSats {
    pub const fn new(amount: u64) -> Self {
        Self(amount)
    }

    pub fn amount(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MilliSats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} msat", self.0)
    }
}

impl FromStr for MilliSats {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| DomainError::InvalidAmount(s.to_string()))
    }
}

/// Inclusive bounds a payer may send in one payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendableRange {
    min: MilliSats,
    max: MilliSats,
}

impl SendableRange {
    pub fn new(min: u64, max: u64) -> Result<Self, DomainError> {
        if min > max {
            return Err(DomainError::InvalidRange { min, max });
        }
        Ok(Self {
            min: MilliSats(min),
            max: MilliSats(max),
        })
    }

    pub fn min(&self) -> MilliSats {
        self.min
    }

    pub fn max(&self) -> MilliSats {
        self.max
    }

    pub fn check(&self, amount: MilliSats) -> Result<MilliSats, DomainError> {
        if amount < self.min || amount > self.max {
            return Err(DomainError::AmountOutOfRange {
                amount: amount.0,
                min: self.min.0,
                max: self.max.0,
            });
        }
        Ok(amount)
    }
}
