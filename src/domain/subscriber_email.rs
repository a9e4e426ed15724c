//! src/domain/subscriber_email.rs

use md5::{Digest, Md5};
use validator::validate_email;

#[derive(Debug, Clone)]
pub struct SubscriberEmail(String);

impl SubscriberEmail {
    pub fn parse(s: String) -> Result<SubscriberEmail, String> {
        if validate_email(&s) {
            Ok(Self(s))
        } else {
            Err(format!("{} is not a valid subscriber email.", s))
        }
    }

    /// Provider-side member key: MD5 of the lower-cased address, hex encoded.
    pub fn fingerprint(&self) -> String {
        hex::encode(Md5::digest(self.0.to_lowercase().as_bytes()))
    }
}

impl AsRef<str> for SubscriberEmail {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
