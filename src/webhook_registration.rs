//! src/webhook_registration.rs
//!
//! Keeps exactly one provider-side webhook pointing at this service, keyed by
//! a freshly rotated secret.

use crate::configurations::MailchimpSettings;
use crate::domain::WebhookSecret;
use crate::integration_settings::{
    get_webhook_secret, set_registered_config, set_webhook_secret,
};
use crate::mailchimp_client::{MailchimpClient, ProviderError};
use anyhow::Context;
use reqwest::{Method, StatusCode};
use sqlx::PgPool;

#[derive(thiserror::Error, Debug)]
pub enum WebhookSetupError {
    #[error("Couldn't create the Mailchimp webhook. Response code {status}. Body: {body:?}")]
    WebhookCreationFailed { status: StatusCode, body: String },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

#[derive(serde::Deserialize)]
struct WebhookList {
    webhooks: Vec<RegisteredWebhook>,
}

#[derive(serde::Deserialize)]
struct RegisteredWebhook {
    id: String,
    url: String,
}

#[derive(serde::Serialize)]
struct CreateWebhookRequest<'a> {
    url: &'a str,
    events: WebhookEvents,
    sources: WebhookSources,
}

#[derive(serde::Serialize)]
struct WebhookEvents {
    subscribe: bool,
    unsubscribe: bool,
    profile: bool,
    cleaned: bool,
    upemail: bool,
    campaign: bool,
}

#[derive(serde::Serialize)]
struct WebhookSources {
    user: bool,
    admin: bool,
    api: bool,
}

pub fn webhook_callback_url(base_url: &str, secret: &WebhookSecret) -> String {
    format!(
        "{}/webhooks/mailchimp/{}",
        base_url.trim_end_matches('/'),
        secret.as_ref()
    )
}

/// Replaces the registered webhook with one using a new secret.
///
/// If creating the new webhook fails, the stored secret is cleared so the
/// service never claims a secret the provider doesn't know about, and the
/// settings are no longer considered registered.
#[tracing::instrument(name = "Setting up Mailchimp webhook", skip_all)]
pub async fn setup_webhook(
    pool: &PgPool,
    settings: &MailchimpSettings,
    base_url: &str,
) -> Result<(), WebhookSetupError> {
    let Some(client) = MailchimpClient::from_settings(settings)? else {
        return Ok(());
    };
    let list_id = settings.list_id.as_str();

    if let Some(current_secret) = get_webhook_secret(pool).await? {
        let current_url = webhook_callback_url(base_url, &current_secret);
        if let Some(webhook) = find_webhook(&client, list_id, &current_url).await? {
            delete_webhook(&client, list_id, &webhook.id).await?;
        }
    }

    let new_secret = WebhookSecret::generate();
    set_webhook_secret(pool, Some(&new_secret)).await?;

    let new_url = webhook_callback_url(base_url, &new_secret);
    if let Err(e) = create_webhook(&client, list_id, &new_url).await {
        tracing::warn!(
            error.cause_chain = ?e,
            "Webhook creation failed, clearing the webhook secret"
        );
        set_webhook_secret(pool, None).await?;
        set_registered_config(pool, None).await?;
        return Err(e);
    }
    set_registered_config(pool, Some(settings)).await?;
    Ok(())
}

async fn find_webhook(
    client: &MailchimpClient,
    list_id: &str,
    url: &str,
) -> Result<Option<RegisteredWebhook>, WebhookSetupError> {
    let response = client
        .request::<()>(Method::GET, &format!("3.0/lists/{}/webhooks", list_id), None)
        .await?
        .error_for_status()?;
    let list: WebhookList = serde_json::from_str(&response.body)
        .context("Failed to parse the list of registered webhooks")?;
    Ok(list.webhooks.into_iter().find(|webhook| webhook.url == url))
}

async fn delete_webhook(
    client: &MailchimpClient,
    list_id: &str,
    webhook_id: &str,
) -> Result<(), WebhookSetupError> {
    let response = client
        .request::<()>(
            Method::DELETE,
            &format!("3.0/lists/{}/webhooks/{}", list_id, webhook_id),
            None,
        )
        .await?;
    // Already gone is as good as deleted.
    if response.status != StatusCode::NOT_FOUND {
        response.error_for_status()?;
    }
    Ok(())
}

async fn create_webhook(
    client: &MailchimpClient,
    list_id: &str,
    url: &str,
) -> Result<(), WebhookSetupError> {
    let body = CreateWebhookRequest {
        url,
        events: WebhookEvents {
            subscribe: true,
            unsubscribe: true,
            profile: false,
            cleaned: false,
            upemail: false,
            campaign: false,
        },
        sources: WebhookSources {
            user: true,
            admin: true,
            api: true,
        },
    };
    let response = client
        .request(Method::POST, &format!("3.0/lists/{}/webhooks", list_id), Some(&body))
        .await?;
    if response.status != StatusCode::OK {
        return Err(WebhookSetupError::WebhookCreationFailed {
            status: response.status,
            body: response.body,
        });
    }
    Ok(())
}
