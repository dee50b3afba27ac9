//! One-way API key hashing.
//!
//! Keys are never stored in plaintext: the environment table holds the
//! HMAC-SHA256 of the key under a server-side secret, hex encoded.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct ApiKeyHasher {
    secret: Vec<u8>,
}

impl ApiKeyHasher {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn one_way_hash(&self, plaintext: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(plaintext.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}
