/// LNURL-pay response bodies

use serde::{Deserialize, Serialize};

pub const STATUS_OK: &str = "OK";
pub const STATUS_ERROR: &str = "ERROR";

/// First-step reply describing what the payer may send
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayRequestResponse {
    pub status: String,
    pub callback: String,
    pub tag: String,
    pub max_sendable: u64,
    pub min_sendable: u64,
    /// JSON-encoded metadata array, hashed into every invoice
    pub metadata: String,
    pub comments_allowed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessAction {
    pub tag: String,
    pub message: String,
}

/// Callback reply carrying the invoice
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceResponse {
    pub status: String,
    pub pr: String,
    pub routes: Vec<serde_json::Value>,
    pub success_action: SuccessAction,
    pub disposable: bool,
}

/// `{"status": "ERROR", "reason": ...}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub reason: String,
}

impl ErrorResponse {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR.to_string(),
            reason: reason.into(),
        }
    }
}
