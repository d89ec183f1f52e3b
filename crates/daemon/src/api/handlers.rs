/// LNURL-pay request handlers

use super::responses::*;
use crate::lightning::{InvoiceRequest, LightningError, LightningHandle};
use crate::lnurl::{self, WELL_KNOWN_PREFIX};
use axum::{
    extract::{Host, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use onionpay_common::config::{LnurlConfig, ServerConfig};
use onionpay_common::{DomainError, MilliSats, SendableRange};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// What one pay endpoint offers
#[derive(Debug, Clone)]
pub struct PayEndpoint {
    pub username: String,
    pub text_message: String,
    pub range: SendableRange,
    pub comments_allowed: usize,
    pub success_message: String,
}

impl PayEndpoint {
    pub fn from_config(server: &ServerConfig, lnurl: &LnurlConfig) -> Result<Self, DomainError> {
        Ok(Self {
            username: server.username.clone(),
            text_message: server.text_message(),
            range: lnurl.sendable_range()?,
            comments_allowed: lnurl.comments_allowed,
            success_message: lnurl.success_message.clone(),
        })
    }

    /// `btc` and `btc@<anything>` both address the configured user
    fn accepts(&self, requested: &str) -> bool {
        match requested.split_once('@') {
            Some((user, _)) => user == self.username,
            None => requested == self.username,
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pay: Arc<PayEndpoint>,
    pub lightning: Arc<LightningHandle>,
    pub info_html: Arc<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PayQuery {
    pub amount: Option<String>,
    pub comment: Option<String>,
}

/// Handler for GET /.well-known/lnurlp/:username
///
/// Without `amount` this describes the pay request; with it, an invoice is
/// minted against the metadata hash.
pub async fn pay_request(
    State(state): State<AppState>,
    Host(host): Host,
    Path(username): Path<String>,
    Query(query): Query<PayQuery>,
) -> Result<Response, LnurlError> {
    debug!("API: GET lnurlp/{}", username);

    let pay = &state.pay;
    if !pay.accepts(&username) {
        return Err(LnurlError::UnknownUser(username));
    }

    let identifier = format!("{}@{}", pay.username, hostname(&host));
    let metadata = lnurl::metadata(&identifier, &pay.text_message);

    let amount = match query.amount.as_deref().filter(|a| !a.is_empty()) {
        Some(amount) => amount,
        None => {
            return Ok(Json(PayRequestResponse {
                status: STATUS_OK.to_string(),
                callback: format!("http://{}{}/{}", host, WELL_KNOWN_PREFIX, pay.username),
                tag: "payRequest".to_string(),
                max_sendable: pay.range.max().amount(),
                min_sendable: pay.range.min().amount(),
                metadata,
                comments_allowed: pay.comments_allowed,
            })
            .into_response());
        }
    };

    let amount: MilliSats = amount.parse().map_err(LnurlError::Amount)?;
    let amount = pay.range.check(amount).map_err(LnurlError::Amount)?;

    if let Some(comment) = &query.comment {
        let length = comment.chars().count();
        if length > pay.comments_allowed {
            return Err(LnurlError::CommentTooLong {
                length,
                max: pay.comments_allowed,
            });
        }
    }

    let invoice = state
        .lightning
        .create_invoice(&InvoiceRequest {
            amount,
            description_hash: lnurl::description_hash(&metadata),
        })
        .await?;

    info!("Issued invoice for {}", amount);

    Ok(Json(InvoiceResponse {
        status: STATUS_OK.to_string(),
        pr: invoice.payment_request,
        routes: Vec::new(),
        success_action: SuccessAction {
            tag: "message".to_string(),
            message: pay.success_message.clone(),
        },
        disposable: false,
    })
    .into_response())
}

/// Handler for GET /
pub async fn info_page(State(state): State<AppState>) -> Html<String> {
    debug!("API: GET /");
    Html(state.info_html.as_ref().clone())
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    debug!("API: GET /health");
    (StatusCode::OK, "OK")
}

/// Host header without its port
fn hostname(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port))
            if !name.is_empty()
                && !port.is_empty()
                && port.chars().all(|c| c.is_ascii_digit())
                && !name.ends_with(':') =>
        {
            name
        }
        _ => host,
    }
}

/// Failures reported to the wallet as `{"status": "ERROR"}`
#[derive(Debug, Error)]
pub enum LnurlError {
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("{0}")]
    Amount(DomainError),

    #[error("Comment too long: {length} characters, at most {max} allowed")]
    CommentTooLong { length: usize, max: usize },

    #[error("Failed to create invoice: {0}")]
    Invoice(#[from] LightningError),
}

impl LnurlError {
    fn status_code(&self) -> StatusCode {
        match self {
            LnurlError::UnknownUser(_) => StatusCode::NOT_FOUND,
            LnurlError::Amount(_) | LnurlError::CommentTooLong { .. } => StatusCode::BAD_REQUEST,
            LnurlError::Invoice(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for LnurlError {
    fn into_response(self) -> Response {
        error!("API Error: {}", self);
        (self.status_code(), Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}
