//! Signing capabilities for the control channel.
//!
//! Two distinct capabilities are kept separate on purpose: the ephemeral
//! [`SessionKey`] is generated locally for one connection and authenticates
//! ordinary request envelopes, while the [`WalletSigner`] is an externally
//! supplied capability proving control of the principal address during the
//! authentication handshake.

use async_trait::async_trait;
use rand::RngCore;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fmt::Write as _;

use crate::error::ClientError;

/// Hex-encode bytes with a `0x` prefix.
pub fn hex_0x(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Ephemeral signing identity for one connection.
///
/// Generated at the start of `connect` and discarded on disconnect. The
/// derived address declares the connection's signing identity to the
/// broker; request envelope signatures are digests keyed by the secret.
pub struct SessionKey {
    secret: [u8; 32],
    address: String,
}

impl SessionKey {
    /// Generate a fresh key from the system RNG.
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let digest = Sha256::digest(secret);
        // 20-byte address form, derived from the tail of the digest
        let address = hex_0x(&digest[12..]);
        Self { secret, address }
    }

    /// The derived address identifying this key.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sign an envelope body.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret);
        hasher.update(payload);
        hex_0x(&hasher.finalize())
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the secret never appears in logs
        f.debug_struct("SessionKey")
            .field("address", &self.address)
            .finish()
    }
}

/// Externally supplied wallet capability for the principal address.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// The principal address this wallet operates for.
    fn address(&self) -> String;

    /// Sign the authentication challenge payload under the
    /// application-scoped domain.
    async fn sign_challenge(
        &self,
        application: &str,
        payload: &Value,
    ) -> Result<String, ClientError>;
}
