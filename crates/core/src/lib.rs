/// Onion service provisioning over the Tor control protocol
///
/// `control` speaks the line protocol (codec, transport, authenticated
/// session); `onion` builds on it to register, restore, verify and
/// clean up onion services.

pub mod control;
pub mod onion;

pub use control::{
    Command, ControlEndpoint, ControlError, EndpointError, Reply, Session, Timeouts, Transport,
    TransportError,
};

pub use onion::{
    AddOnion, DetachedRegistry, KeyError, KeyRequest, KeyType, OnionKey, PortMapping,
    ProvisionError, ProvisionRequest, Provisioned, Provisioner, ServiceIdentityRecord,
    VerifyPolicy,
};
