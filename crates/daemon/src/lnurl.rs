/// LNURL-pay presentation for an onion service
///
/// Builds the strings a payer needs: the pay URL, its bech32 `lnurl`
/// encoding, the lightning address, and the metadata whose hash commits
/// each invoice to this pay request.

use bech32::{Bech32, Hrp};
use sha2::{Digest, Sha256};

pub const WELL_KNOWN_PREFIX: &str = "/.well-known/lnurlp";

/// Pay link published for one user on one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayLink {
    username: String,
    host: String,
}

impl PayLink {
    pub fn new(username: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            host: host.into(),
        }
    }

    /// `http://<host>/.well-known/lnurlp/<user>`
    pub fn url(&self) -> String {
        format!("http://{}{}/{}", self.host, WELL_KNOWN_PREFIX, self.username)
    }

    pub fn lightning_address(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }

    /// Bech32 `lnurl1...` encoding of the pay URL
    pub fn lnurl(&self) -> Result<String, LnurlEncodeError> {
        encode_lnurl(&self.url())
    }

    /// Landing page served at `/`
    pub fn info_html(&self) -> Result<String, LnurlEncodeError> {
        Ok(format!(
            "resources available at: <br><br>\n\
             url: {url} add ?amount=123 to charge specific amount <br><br>\n\
             lnurlp: {lnurl} <br><br>\n\
             lightningAddress: {address} <br><br>\n",
            url = self.url(),
            lnurl = self.lnurl()?,
            address = self.lightning_address(),
        ))
    }
}

pub fn encode_lnurl(url: &str) -> Result<String, LnurlEncodeError> {
    let hrp = Hrp::parse("lnurl").map_err(|e| LnurlEncodeError(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, url.as_bytes()).map_err(|e| LnurlEncodeError(e.to_string()))
}

/// LUD-06 metadata: `[["text/identifier", ...], ["text/plain", ...]]` as a
/// JSON string
pub fn metadata(identifier: &str, text: &str) -> String {
    serde_json::json!([["text/identifier", identifier], ["text/plain", text]]).to_string()
}

/// SHA-256 of the metadata string, committed to by every invoice
pub fn description_hash(metadata: &str) -> [u8; 32] {
    Sha256::digest(metadata.as_bytes()).into()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to encode lnurl: {0}")]
pub struct LnurlEncodeError(String);
