/// LND REST invoice client

use super::{Invoice, InvoiceRequest, LightningClient, LightningError};
use async_trait::async_trait;
use base64::Engine;
use onionpay_common::config::LightningConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Body of `POST /v1/invoices`. LND encodes 64-bit integers as strings.
#[derive(Debug, Serialize)]
struct AddInvoiceBody {
    value_msat: String,
    description_hash: String,
    expiry: String,
}

#[derive(Debug, Deserialize)]
struct AddInvoiceResponse {
    payment_request: String,
}

pub struct LndRestClient {
    http: reqwest::Client,
    base_url: String,
    macaroon_hex: String,
    expiry_secs: u64,
    config: Option<LightningConfig>,
}

impl LndRestClient {
    /// Read the macaroon (and optional TLS certificate) named by `config`
    pub fn from_config(config: &LightningConfig) -> Result<Self, LightningError> {
        let macaroon = std::fs::read(&config.macaroon_path).map_err(|e| {
            LightningError::Credentials(format!("{}: {}", config.macaroon_path, e))
        })?;

        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS));
        if let Some(cert_path) = &config.tls_cert_path {
            let pem = std::fs::read(cert_path)
                .map_err(|e| LightningError::Credentials(format!("{}: {}", cert_path, e)))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| LightningError::Credentials(format!("{}: {}", cert_path, e)))?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| LightningError::Credentials(e.to_string()))?;

        debug!("Loaded lightning credentials for {}", config.rest_url);

        Ok(Self {
            http,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            macaroon_hex: hex::encode(macaroon),
            expiry_secs: config.invoice_expiry_secs,
            config: Some(config.clone()),
        })
    }

    /// Client with an in-memory macaroon; `reinitialize` returns a copy
    pub fn with_macaroon(
        base_url: impl Into<String>,
        macaroon_hex: impl Into<String>,
        expiry_secs: u64,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            macaroon_hex: macaroon_hex.into(),
            expiry_secs,
            config: None,
        }
    }
}

#[async_trait]
impl LightningClient for LndRestClient {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, LightningError> {
        let body = AddInvoiceBody {
            value_msat: request.amount.amount().to_string(),
            description_hash: base64::engine::general_purpose::STANDARD
                .encode(request.description_hash),
            expiry: self.expiry_secs.to_string(),
        };

        let response = self
            .http
            .post(format!("{}/v1/invoices", self.base_url))
            .header(MACAROON_HEADER, &self.macaroon_hex)
            .json(&body)
            .send()
            .await
            .map_err(|e| LightningError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LightningError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: AddInvoiceResponse = response
            .json()
            .await
            .map_err(|e| LightningError::InvalidResponse(e.to_string()))?;

        debug!("Created invoice for {}", request.amount);
        Ok(Invoice {
            payment_request: parsed.payment_request,
        })
    }

    async fn reinitialize(&self) -> Result<Box<dyn LightningClient>, LightningError> {
        let fresh = match &self.config {
            Some(config) => Self::from_config(config)?,
            None => Self::with_macaroon(&self.base_url, &self.macaroon_hex, self.expiry_secs),
        };
        Ok(Box::new(fresh))
    }
}
