use std::fmt;
use std::str::FromStr;

/// Onion service key algorithm as named by the control protocol
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Let the daemon pick the best available algorithm
    Best,
    Ed25519V3,
    Rsa1024,
    Other(String),
}

impl KeyType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Best => "BEST",
            Self::Ed25519V3 => "ED25519-V3",
            Self::Rsa1024 => "RSA1024",
            Self::Other(name) => name,
        }
    }
}

impl Default for KeyType {
    fn default() -> Self {
        Self::Best
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err(KeyError::EmptyKeyType),
            "BEST" => Ok(Self::Best),
            "ED25519-V3" => Ok(Self::Ed25519V3),
            "RSA1024" => Ok(Self::Rsa1024),
            other if other.contains([':', ' ', '=']) => {
                Err(KeyError::InvalidKeyType(other.to_string()))
            }
            other => Ok(Self::Other(other.to_string())),
        }
    }
}

/// Key material of an existing onion service, `<keyType>:<material>`
#[derive(Clone, PartialEq, Eq)]
pub struct OnionKey {
    key_type: KeyType,
    material: String,
}

impl OnionKey {
    pub fn new(key_type: KeyType, material: impl Into<String>) -> Result<Self, KeyError> {
        let material = material.into();
        if material.is_empty() || material.contains(char::is_whitespace) {
            return Err(KeyError::InvalidMaterial);
        }
        if matches!(key_type, KeyType::Best) {
            return Err(KeyError::InvalidKeyType(key_type.to_string()));
        }
        Ok(Self { key_type, material })
    }

    /// Parse the composite `<keyType>:<material>` form
    pub fn parse(composite: &str) -> Result<Self, KeyError> {
        let (key_type, material) = composite
            .trim()
            .split_once(':')
            .ok_or(KeyError::MissingSeparator)?;

        if key_type == "NEW" {
            return Err(KeyError::InvalidKeyType(key_type.to_string()));
        }
        Self::new(key_type.parse()?, material)
    }

    pub fn key_type(&self) -> &KeyType {
        &self.key_type
    }

    pub fn material(&self) -> &str {
        &self.material
    }

    pub fn composite(&self) -> String {
        format!("{}:{}", self.key_type, self.material)
    }
}

impl fmt::Debug for OnionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnionKey({}:********)", self.key_type)
    }
}

impl FromStr for OnionKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Which key ADD_ONION should use
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRequest {
    /// Have the daemon mint a fresh key
    New(KeyType),
    /// Restore an identity from saved key material
    Existing(OnionKey),
}

impl KeyRequest {
    /// The key argument as sent on the wire
    pub fn argument(&self) -> String {
        match self {
            Self::New(key_type) => format!("NEW:{}", key_type),
            Self::Existing(key) => key.composite(),
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::New(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("onion key must look like <keyType>:<material>")]
    MissingSeparator,

    #[error("empty key type")]
    EmptyKeyType,

    #[error("invalid key type {0:?}")]
    InvalidKeyType(String),

    #[error("invalid key material")]
    InvalidMaterial,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_composite_key() {
        let key = OnionKey::parse("ED25519-V3:AAAA==").unwrap();
        assert_eq!(key.key_type(), &KeyType::Ed25519V3);
        assert_eq!(key.material(), "AAAA==");
        assert_eq!(key.composite(), "ED25519-V3:AAAA==");
    }

    #[test]
    fn material_may_contain_colons() {
        let key = OnionKey::parse("X25519:a:b").unwrap();
        assert_eq!(key.key_type(), &KeyType::Other("X25519".into()));
        assert_eq!(key.material(), "a:b");
    }

    #[test]
    fn rejects_new_directive_as_existing_key() {
        assert!(OnionKey::parse("NEW:BEST").is_err());
        assert!(OnionKey::parse("BEST:abc").is_err());
        assert_eq!(OnionKey::parse("AAAA=="), Err(KeyError::MissingSeparator));
        assert_eq!(OnionKey::parse("ED25519-V3:"), Err(KeyError::InvalidMaterial));
    }

    #[test]
    fn restore_request_never_mints() {
        let key = OnionKey::parse("ED25519-V3:AAAA==").unwrap();
        let request = KeyRequest::Existing(key);
        assert_eq!(request.argument(), "ED25519-V3:AAAA==");
        assert!(!request.is_new());

        assert_eq!(KeyRequest::New(KeyType::Best).argument(), "NEW:BEST");
    }

    #[test]
    fn debug_hides_material() {
        let key = OnionKey::parse("ED25519-V3:c2VjcmV0").unwrap();
        assert!(!format!("{:?}", key).contains("c2VjcmV0"));
    }
}
