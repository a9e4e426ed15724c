//! src/domain/webhook_secret.rs

use rand::{thread_rng, Rng};
use subtle::ConstantTimeEq;

const SECRET_BYTES: usize = 16;

/// Shared secret embedded in the provider's callback URL.
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookSecret(String);

impl WebhookSecret {
    /// 16 random bytes, lower-case hex: always 32 characters.
    pub fn generate() -> Self {
        let bytes: [u8; SECRET_BYTES] = thread_rng().gen();
        Self(hex::encode(bytes))
    }

    pub fn parse(s: String) -> Result<WebhookSecret, String> {
        if s.len() == SECRET_BYTES * 2 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(s))
        } else {
            Err("A webhook secret must be 32 hexadecimal characters.".into())
        }
    }

    /// Compares without short-circuiting on the first differing byte.
    pub fn matches(&self, candidate: &str) -> bool {
        self.0.as_bytes().ct_eq(candidate.as_bytes()).into()
    }
}

impl AsRef<str> for WebhookSecret {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WebhookSecret([REDACTED])")
    }
}
