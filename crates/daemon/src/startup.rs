/// Glue between the configuration files and a provisioning run

use onionpay_common::{AppConfig, Settings};
use onionpay_core::{
    ControlEndpoint, EndpointError, KeyError, OnionKey, ProvisionError, ProvisionRequest,
    Provisioned, Provisioner, Timeouts, VerifyPolicy,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Invalid control address: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("Saved onion key is unusable: {0}")]
    SavedKey(#[from] KeyError),
}

/// Describe the run: restore the saved identity if there is one
pub fn provision_request(
    config: &AppConfig,
    settings: &Settings,
) -> Result<ProvisionRequest, StartupError> {
    let endpoint = ControlEndpoint::parse(&config.control.address, settings.control_password.clone())?;

    let existing_key = settings
        .hs_private_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .map(OnionKey::parse)
        .transpose()?;

    Ok(ProvisionRequest::new(
        endpoint,
        config.control.onion_port,
        config.server.forward_target(),
    )
    .with_existing_key(existing_key)
    .with_existing_service_id(settings.service_id.clone())
    .detached(config.provisioning.detach))
}

pub fn provisioner(config: &AppConfig) -> Provisioner {
    Provisioner::new(
        Timeouts {
            connect: config.connect_timeout(),
            reply: config.reply_timeout(),
        },
        VerifyPolicy {
            attempts: config.provisioning.verify_attempts,
            initial_interval: Duration::from_millis(config.provisioning.verify_initial_interval_ms),
            max_interval: Duration::from_millis(config.provisioning.verify_max_interval_ms),
        },
    )
}

/// Fold a run's outcome into the settings.
///
/// Returns whether anything changed and the file needs rewriting.
pub fn record_outcome(
    settings: &mut Settings,
    outcome: &Result<Provisioned, ProvisionError>,
) -> bool {
    let before = settings.clone();

    match outcome {
        Ok(provisioned) => {
            let record = provisioned.record();
            settings.remember_identity(record.service_id(), record.composite_key());
        }
        Err(e) => match e.unverified_service_id() {
            Some(service_id) => {
                warn!("Remembering unverified onion {} for cleanup", service_id);
                settings.remember_stale_service(service_id);
            }
            None => return false,
        },
    }

    let changed = *settings != before;
    if changed {
        info!("Onion identity changed, settings need saving");
    }
    changed
}
