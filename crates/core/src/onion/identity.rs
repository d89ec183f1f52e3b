use super::key::{KeyRequest, KeyType, OnionKey};
use super::ProvisionError;
use crate::control::Reply;
use onionpay_common::ServiceId;
use std::fmt;

/// The onion identity produced by a provisioning run.
///
/// Replaying `composite_key` as an existing key on a later run restores the
/// same `service_id`.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceIdentityRecord {
    service_id: ServiceId,
    key: OnionKey,
    composite_key: String,
}

impl ServiceIdentityRecord {
    pub fn new(service_id: ServiceId, key: &OnionKey) -> Self {
        Self {
            service_id,
            key: key.clone(),
            composite_key: key.composite(),
        }
    }

    /// Build the record from an ADD_ONION reply.
    ///
    /// The reply always names the service id; the private key line only
    /// appears when the daemon minted a new key.
    pub fn from_add_onion(reply: &Reply, request: &KeyRequest) -> Result<Self, ProvisionError> {
        let service_id = reply
            .value("ServiceID")
            .ok_or_else(|| ProvisionError::MissingServiceId(reply.raw().to_string()))?;
        let service_id = ServiceId::new(service_id).map_err(ProvisionError::InvalidServiceId)?;

        let key = match (reply.value("PrivateKey"), request) {
            (Some(composite), _) => OnionKey::parse(composite)?,
            (None, KeyRequest::Existing(key)) => key.clone(),
            (None, KeyRequest::New(_)) => return Err(ProvisionError::MissingPrivateKey),
        };

        Ok(Self::new(service_id, &key))
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    pub fn key_type(&self) -> &KeyType {
        self.key.key_type()
    }

    pub fn private_key(&self) -> &str {
        self.key.material()
    }

    /// `<keyType>:<privateKey>`, the form persisted between runs
    pub fn composite_key(&self) -> &str {
        &self.composite_key
    }

    pub fn onion_key(&self) -> &OnionKey {
        &self.key
    }

    /// `<serviceId>.onion`
    pub fn onion_host(&self) -> String {
        self.service_id.onion_host()
    }
}

impl fmt::Debug for ServiceIdentityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceIdentityRecord")
            .field("service_id", &self.service_id)
            .field("key_type", self.key.key_type())
            .field("private_key", &"********")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::decode;
    use crate::onion::{AddOnion, PortMapping};

    #[test]
    fn new_key_reply_becomes_record() {
        let add = AddOnion::new(
            KeyRequest::New(KeyType::Ed25519V3),
            PortMapping::new(80, "0.0.0.0:7890"),
        );
        assert_eq!(
            add.to_command().encode().unwrap(),
            "ADD_ONION NEW:ED25519-V3 Port=80,0.0.0.0:7890\n"
        );

        let reply =
            decode("250-ServiceID=abc123\r\n250-PrivateKey=ED25519-V3:AAAA==\r\n250 OK\r\n")
                .unwrap();
        let record = ServiceIdentityRecord::from_add_onion(&reply, add.key()).unwrap();

        assert_eq!(record.service_id().as_str(), "abc123");
        assert_eq!(record.key_type(), &KeyType::Ed25519V3);
        assert_eq!(record.private_key(), "AAAA==");
        assert_eq!(record.composite_key(), "ED25519-V3:AAAA==");
    }

    #[test]
    fn restored_key_fills_missing_private_key_line() {
        let key = OnionKey::parse("ED25519-V3:AAAA==").unwrap();
        let reply = decode("250-ServiceID=abc123\r\n250 OK\r\n").unwrap();

        let record =
            ServiceIdentityRecord::from_add_onion(&reply, &KeyRequest::Existing(key.clone()))
                .unwrap();
        assert_eq!(record.composite_key(), "ED25519-V3:AAAA==");
        assert_eq!(record.onion_key(), &key);
    }

    #[test]
    fn fresh_key_without_private_key_line_fails() {
        let reply = decode("250-ServiceID=abc123\r\n250 OK\r\n").unwrap();
        let err =
            ServiceIdentityRecord::from_add_onion(&reply, &KeyRequest::New(KeyType::Best))
                .unwrap_err();
        assert!(matches!(err, ProvisionError::MissingPrivateKey));
    }

    #[test]
    fn reply_without_service_id_fails() {
        let reply = decode("250 OK\r\n").unwrap();
        let err =
            ServiceIdentityRecord::from_add_onion(&reply, &KeyRequest::New(KeyType::Best))
                .unwrap_err();
        assert!(matches!(err, ProvisionError::MissingServiceId(_)));
    }

    #[test]
    fn debug_hides_private_key() {
        let key = OnionKey::parse("ED25519-V3:c2VjcmV0").unwrap();
        let record = ServiceIdentityRecord::new(ServiceId::new("abc123").unwrap(), &key);
        let printed = format!("{:?}", record);
        assert!(printed.contains("abc123"));
        assert!(!printed.contains("c2VjcmV0"));
    }
}
