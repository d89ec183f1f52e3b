/// Onion service provisioning on top of the control session
///
/// - `AddOnion` builds the ADD_ONION command for a new or restored key
/// - `ServiceIdentityRecord` is the identity handed to the rest of the app
/// - `Provisioner` runs the attached or detached registration sequence

mod command;
mod identity;
mod key;
mod provisioner;
mod registry;

pub use command::{AddOnion, PortMapping};
pub use identity::ServiceIdentityRecord;
pub use key::{KeyError, KeyRequest, KeyType, OnionKey};
pub use provisioner::{ProvisionRequest, Provisioned, Provisioner};
pub use registry::{DetachedRegistry, VerifyPolicy};

use crate::control::ControlError;
use onionpay_common::{DomainError, ServiceId};

/// Provisioning errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("Detached onion {service_id} was not registered by the daemon; restart the tor service")]
    NotRegistered { service_id: ServiceId },

    #[error("ADD_ONION reply has no ServiceID: {0}")]
    MissingServiceId(String),

    #[error("ADD_ONION reply has no PrivateKey for a newly generated key")]
    MissingPrivateKey,

    #[error("Invalid service id in reply: {0}")]
    InvalidServiceId(DomainError),

    #[error("Invalid onion key: {0}")]
    InvalidKey(#[from] KeyError),

    #[error("Another provisioning run is in progress")]
    InProgress,

    /// The daemon accepted ADD_ONION but a later step failed
    #[error("Onion {service_id} was added but could not be confirmed: {source}")]
    Unverified {
        service_id: ServiceId,
        source: Box<ProvisionError>,
    },
}

impl ProvisionError {
    /// Service id the daemon may still hold although the run failed.
    /// It should be persisted so the next run can delete it.
    pub fn unverified_service_id(&self) -> Option<&ServiceId> {
        match self {
            Self::NotRegistered { service_id } | Self::Unverified { service_id, .. } => {
                Some(service_id)
            }
            _ => None,
        }
    }
}
