//! Durable restart state.
//!
//! `settings.json` carries the control password together with the onion
//! key and service id from the last run, so the next start can restore the
//! same address and remove a stale detached registration.

use crate::ServiceId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Password for the Tor control port
    #[serde(default)]
    pub control_password: String,

    /// `<keyType>:<privateKey>` of the onion service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hs_private_key: Option<String>,

    /// Service id last registered with the daemon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<ServiceId>,
}

impl Settings {
    pub fn new(control_password: impl Into<String>) -> Self {
        Self {
            control_password: control_password.into(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(|e| SettingsError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        serde_json::from_str(&contents).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    /// Write atomically: temp file in the same directory, then rename
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| SettingsError::Serialize(e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        // A leftover temp file would keep its old permissions
        match fs::remove_file(&tmp) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(write_error(&tmp, e)),
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        // Holds key material
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&tmp).map_err(|e| write_error(&tmp, e))?;
        file.write_all(contents.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| write_error(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, path).map_err(|e| write_error(path, e))?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Remember a successfully provisioned identity
    pub fn remember_identity(&mut self, service_id: &ServiceId, composite_key: &str) {
        self.service_id = Some(service_id.clone());
        self.hs_private_key = Some(composite_key.to_string());
    }

    /// Remember a service id whose registration could not be verified,
    /// so the next run can delete it
    pub fn remember_stale_service(&mut self, service_id: &ServiceId) {
        self.service_id = Some(service_id.clone());
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("control_password", &"********")
            .field(
                "hs_private_key",
                &self.hs_private_key.as_ref().map(|_| "********"),
            )
            .field("service_id", &self.service_id)
            .finish()
    }
}

fn write_error(path: &Path, e: std::io::Error) -> SettingsError {
    SettingsError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read settings {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse settings: {0}")]
    Parse(String),

    #[error("Failed to serialize settings: {0}")]
    Serialize(String),

    #[error("Failed to write settings {path}: {reason}")]
    Write { path: String, reason: String },
}
