//! Development wallet signer for local brokers.
//!
//! Real deployments inject a wallet-backed [`WalletSigner`]; this one
//! derives deterministic signatures from a configured secret so the full
//! connect/create/submit/settle flow can be driven against a broker that
//! accepts dev credentials.

use async_trait::async_trait;
use channel_session::signer::hex_0x;
use channel_session::{ClientError, WalletSigner};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Signer backed by a locally held secret.
pub struct DevWalletSigner {
    address: String,
    secret: Vec<u8>,
}

impl DevWalletSigner {
    /// Create a signer for `address` from a secret string.
    pub fn new(address: &str, secret: &str) -> Self {
        Self {
            address: address.to_string(),
            secret: secret.as_bytes().to_vec(),
        }
    }
}

#[async_trait]
impl WalletSigner for DevWalletSigner {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn sign_challenge(
        &self,
        application: &str,
        payload: &Value,
    ) -> Result<String, ClientError> {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(application.as_bytes());
        hasher.update(payload.to_string().as_bytes());
        Ok(hex_0x(&hasher.finalize()))
    }
}
