use super::key::KeyRequest;
use crate::control::Command;
use std::fmt;

/// `Port=` argument: onion-side port forwarded to a local target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    virtual_port: u16,
    target: String,
}

impl PortMapping {
    pub fn new(virtual_port: u16, target: impl Into<String>) -> Self {
        Self {
            virtual_port,
            target: target.into(),
        }
    }

    pub fn virtual_port(&self) -> u16 {
        self.virtual_port
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.virtual_port, self.target)
    }
}

/// An ADD_ONION request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOnion {
    key: KeyRequest,
    detach: bool,
    port: PortMapping,
}

impl AddOnion {
    pub fn new(key: KeyRequest, port: PortMapping) -> Self {
        Self {
            key,
            detach: false,
            port,
        }
    }

    /// Keep the service registered after the control connection closes
    pub fn detached(mut self, detach: bool) -> Self {
        self.detach = detach;
        self
    }

    pub fn key(&self) -> &KeyRequest {
        &self.key
    }

    pub fn is_detached(&self) -> bool {
        self.detach
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new("ADD_ONION");
        command = match &self.key {
            KeyRequest::New(_) => command.arg(self.key.argument()),
            KeyRequest::Existing(_) => command.secret_arg(self.key.argument()),
        };
        if self.detach {
            command = command.arg("Flags=Detach");
        }
        command.arg(format!("Port={}", self.port))
    }
}
