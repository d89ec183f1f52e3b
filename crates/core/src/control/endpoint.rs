use onionpay_common::config::control::{CONNECT_TIMEOUT_SECS, REPLY_TIMEOUT_SECS};
use std::fmt;
use std::time::Duration;

/// Address and password of a Tor control port
#[derive(Clone, PartialEq, Eq)]
pub struct ControlEndpoint {
    host: String,
    port: u16,
    secret: String,
}

impl ControlEndpoint {
    pub fn new(host: impl Into<String>, port: u16, secret: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            secret: secret.into(),
        }
    }

    /// Parse `host:port` (IPv6 hosts in brackets)
    pub fn parse(address: &str, secret: impl Into<String>) -> Result<Self, EndpointError> {
        let invalid = || EndpointError::InvalidAddress(address.to_string());

        let (host, port) = address.trim().rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self::new(host, port, secret))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Display for ControlEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Debug for ControlEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secret", &"********")
            .finish()
    }
}

/// Timeouts applied to the control connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub reply: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            reply: Duration::from_secs(REPLY_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("Invalid control address: {0:?} (expected host:port)")]
    InvalidAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let endpoint = ControlEndpoint::parse("10.21.21.11:29051", "pw").unwrap();
        assert_eq!(endpoint.host(), "10.21.21.11");
        assert_eq!(endpoint.port(), 29051);
        assert_eq!(endpoint.to_string(), "10.21.21.11:29051");
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let endpoint = ControlEndpoint::parse("[::1]:9051", "pw").unwrap();
        assert_eq!(endpoint.host(), "::1");
        assert_eq!(endpoint.to_string(), "[::1]:9051");
    }

    #[test]
    fn rejects_missing_port() {
        assert!(ControlEndpoint::parse("localhost", "pw").is_err());
        assert!(ControlEndpoint::parse("localhost:notaport", "pw").is_err());
        assert!(ControlEndpoint::parse(":9051", "pw").is_err());
    }

    #[test]
    fn debug_hides_secret() {
        let endpoint = ControlEndpoint::new("127.0.0.1", 9051, "hunter2");
        assert!(!format!("{:?}", endpoint).contains("hunter2"));
    }
}
