//! src/domain/server_prefix.rs

/// The regional sub-domain of the provider API, e.g. `us14`.
///
/// It ends up in the host part of outbound URLs, so anything but ASCII
/// letters and digits is refused. An empty prefix means "not set".
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(try_from = "String")]
pub struct ServerPrefix(String);

impl ServerPrefix {
    pub fn parse(s: String) -> Result<ServerPrefix, String> {
        let trimmed = s.trim();
        if trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(format!(
                "{} is not a valid server prefix: only alphanumeric characters are allowed.",
                s
            ))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<String> for ServerPrefix {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl AsRef<str> for ServerPrefix {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
