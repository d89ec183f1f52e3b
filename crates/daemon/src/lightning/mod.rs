/// Lightning backend used to mint invoices for LNURL-pay callbacks
///
/// The responder only talks to [`LightningHandle`], which wraps whatever
/// [`LightningClient`] is configured and swaps in a freshly initialized
/// client after an invoice call fails.

pub mod lnd;

pub use lnd::LndRestClient;

use async_trait::async_trait;
use onionpay_common::MilliSats;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Invoice parameters for one payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceRequest {
    pub amount: MilliSats,
    pub description_hash: [u8; 32],
}

/// BOLT11 payment request returned by the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    pub payment_request: String,
}

#[async_trait]
pub trait LightningClient: Send + Sync {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, LightningError>;

    /// Build a replacement client from the same configuration, re-reading
    /// credentials from disk
    async fn reinitialize(&self) -> Result<Box<dyn LightningClient>, LightningError>;
}

/// Shared, swappable lightning client
pub struct LightningHandle {
    client: RwLock<Arc<dyn LightningClient>>,
}

impl LightningHandle {
    pub fn new(client: Box<dyn LightningClient>) -> Self {
        Self {
            client: RwLock::new(Arc::from(client)),
        }
    }

    /// Create an invoice; on failure the client is reinitialized before the
    /// error is returned so the next payer gets a fresh connection
    pub async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, LightningError> {
        let client = self.client.read().await.clone();

        match client.create_invoice(request).await {
            Ok(invoice) => Ok(invoice),
            Err(e) => {
                warn!("Invoice creation failed: {}", e);
                self.replace(&client).await;
                Err(e)
            }
        }
    }

    async fn replace(&self, failed: &Arc<dyn LightningClient>) {
        let fresh = match failed.reinitialize().await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!("Failed to reinitialize lightning client: {}", e);
                return;
            }
        };

        let mut current = self.client.write().await;
        // Another request may already have swapped the client
        if Arc::ptr_eq(&*current, failed) {
            *current = Arc::from(fresh);
            info!("Lightning client reinitialized");
        }
    }
}

#[derive(Debug, Error)]
pub enum LightningError {
    #[error("Failed to load lightning credentials: {0}")]
    Credentials(String),

    #[error("Failed to reach lightning node: {0}")]
    Request(String),

    #[error("Lightning node returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response from lightning node: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted client that counts invoice and reinitialize calls
    #[derive(Clone, Default)]
    pub struct MockLightning {
        pub invoices: Arc<AtomicUsize>,
        pub reinits: Arc<AtomicUsize>,
        pub fail: bool,
        pub last_request: Arc<std::sync::Mutex<Option<InvoiceRequest>>>,
    }

    impl MockLightning {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn invoice_calls(&self) -> usize {
            self.invoices.load(Ordering::SeqCst)
        }

        pub fn reinit_calls(&self) -> usize {
            self.reinits.load(Ordering::SeqCst)
        }

        pub fn last_request(&self) -> Option<InvoiceRequest> {
            self.last_request.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LightningClient for MockLightning {
        async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, LightningError> {
            self.invoices.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            if self.fail {
                return Err(LightningError::Request("connection refused".to_string()));
            }
            Ok(Invoice {
                payment_request: format!("lnbc{}n1mock", request.amount.amount()),
            })
        }

        async fn reinitialize(&self) -> Result<Box<dyn LightningClient>, LightningError> {
            self.reinits.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(self.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockLightning;
    use super::*;

    fn request() -> InvoiceRequest {
        InvoiceRequest {
            amount: MilliSats::new(5_000),
            description_hash: [7u8; 32],
        }
    }

    #[tokio::test]
    async fn passes_invoice_through() {
        let mock = MockLightning::default();
        let handle = LightningHandle::new(Box::new(mock.clone()));

        let invoice = handle.create_invoice(&request()).await.unwrap();
        assert_eq!(invoice.payment_request, "lnbc5000n1mock");
        assert_eq!(mock.invoice_calls(), 1);
        assert_eq!(mock.reinit_calls(), 0);
    }

    #[tokio::test]
    async fn failure_reinitializes_client() {
        let mock = MockLightning::failing();
        let handle = LightningHandle::new(Box::new(mock.clone()));

        assert!(handle.create_invoice(&request()).await.is_err());
        assert_eq!(mock.reinit_calls(), 1);

        // The replacement shares counters with the first mock
        assert!(handle.create_invoice(&request()).await.is_err());
        assert_eq!(mock.invoice_calls(), 2);
        assert_eq!(mock.reinit_calls(), 2);
    }
}
