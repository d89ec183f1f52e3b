/// HTTP surface served behind the onion service
///
/// Answers LNURL-pay requests (LUD-06 and LUD-16 lightning addresses)
/// for the configured user and exposes an info page and health check.

pub mod handlers;
pub mod responses;
pub mod server;

pub use handlers::{AppState, LnurlError, PayEndpoint};
pub use server::ApiServer;
