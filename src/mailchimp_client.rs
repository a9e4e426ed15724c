//! src/mailchimp_client.rs

use crate::configurations::MailchimpSettings;
use reqwest::{Client, Method, StatusCode, Url};
use secrecy::{ExposeSecret, Secret};

/// Status and raw body of a provider response.
#[derive(Debug)]
pub struct ProviderResponse {
    pub status: StatusCode,
    pub body: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("Failed to reach the mailing-list provider")]
    Transport(#[from] reqwest::Error),
    #[error("The mailing-list provider answered {status}: {body}")]
    RequestFailed { status: StatusCode, body: String },
}

impl ProviderResponse {
    pub fn error_for_status(self) -> Result<Self, ProviderError> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(ProviderError::RequestFailed {
                status: self.status,
                body: self.body,
            })
        }
    }
}

#[derive(Clone)]
pub struct MailchimpClient {
    http_client: Client,
    base_url: Url,
    api_key: Secret<String>,
}

impl MailchimpClient {
    pub fn new(base_url: Url, api_key: Secret<String>, timeout: std::time::Duration) -> Self {
        let http_client = Client::builder().timeout(timeout).build().unwrap();
        Self {
            http_client,
            base_url,
            api_key,
        }
    }

    /// `None` until every required setting is present.
    pub fn from_settings(settings: &MailchimpSettings) -> Result<Option<Self>, anyhow::Error> {
        if !settings.is_configured() {
            return Ok(None);
        }
        Ok(Some(Self::new(
            settings.api_base_url()?,
            settings.api_key.clone(),
            settings.timeout(),
        )))
    }

    /// Sends an authenticated JSON request to `path`, relative to the API origin.
    ///
    /// Non-2xx answers are returned as-is; callers decide what counts as failure.
    #[tracing::instrument(name = "Calling the Mailchimp API", skip(self, body))]
    pub async fn request<B: serde::Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}{}", self.base_url, path.trim_start_matches('/'));
        let mut builder = self
            .http_client
            .request(method, &url)
            .basic_auth("newsletter-sync", Some(self.api_key.expose_secret()))
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(ProviderResponse { status, body })
    }
}
