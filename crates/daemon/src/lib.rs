/// onionpay daemon library
///
/// Provisions the onion service, then answers LNURL-pay requests for it
/// by minting invoices on the configured lightning node.

pub mod api;
pub mod lightning;
pub mod lnurl;
pub mod qr;
pub mod startup;

pub use api::ApiServer;
pub use lightning::{LightningClient, LightningHandle, LndRestClient};
