//! src/routes/webhooks/mailchimp.rs
//!
//! Callbacks Mailchimp sends when a member changes their subscription on the
//! Mailchimp side. The provider is authoritative for these events, so the
//! local row is overwritten directly and no sync task is queued: queuing one
//! would push the same change straight back to the provider.

use crate::configurations::MailchimpSettings;
use crate::domain::{ListId, WebhookSecret};
use crate::integration_settings::get_webhook_secret;
use crate::subscription_store::set_subscription_active;
use crate::users::find_user_id_by_email;
use crate::utils::error_chain_fmt;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use anyhow::Context;
use sqlx::PgPool;

#[derive(thiserror::Error)]
pub enum WebhookError {
    #[error("The webhook secret is missing or does not match")]
    BadSecret,
    #[error("Unknown Mailchimp webhook event type {0:?}")]
    UnrecognizedEventType(String),
    #[error("The webhook payload is malformed")]
    MalformedPayload(#[source] serde_urlencoded::de::Error),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for WebhookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for WebhookError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadSecret => StatusCode::NOT_FOUND,
            Self::UnrecognizedEventType(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            Self::UnexpectedError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).body("not ok")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventType {
    Subscribe,
    Unsubscribe,
}

impl WebhookEventType {
    pub fn parse(s: &str) -> Result<Self, WebhookError> {
        match s {
            "subscribe" => Ok(Self::Subscribe),
            "unsubscribe" => Ok(Self::Unsubscribe),
            other => Err(WebhookError::UnrecognizedEventType(other.to_string())),
        }
    }

    fn desired_active_state(&self) -> bool {
        matches!(self, Self::Subscribe)
    }
}

/// The fields of a Mailchimp webhook we act on; the rest is ignored.
#[derive(serde::Deserialize)]
pub struct WebhookPayload {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(rename = "data[email]")]
    email: String,
}

async fn verify_shared_secret(
    pool: &PgPool,
    settings: &MailchimpSettings,
    request_secret: &str,
) -> Result<(), WebhookError> {
    if !settings.enabled {
        return Err(WebhookError::BadSecret);
    }
    if WebhookSecret::parse(request_secret.to_string()).is_err() {
        return Err(WebhookError::BadSecret);
    }
    let actual_secret = get_webhook_secret(pool)
        .await?
        .ok_or(WebhookError::BadSecret)?;
    if !actual_secret.matches(request_secret) {
        return Err(WebhookError::BadSecret);
    }
    Ok(())
}

/// Mailchimp checks the callback URL with a GET before accepting a webhook.
#[tracing::instrument(name = "Verifying Mailchimp webhook", skip_all)]
pub async fn verify_mailchimp_webhook(
    secret: web::Path<String>,
    pool: web::Data<PgPool>,
    settings: web::Data<MailchimpSettings>,
) -> Result<HttpResponse, WebhookError> {
    verify_shared_secret(&pool, &settings, &secret).await?;
    Ok(HttpResponse::Ok().body("ok"))
}

#[tracing::instrument(
    name = "Applying Mailchimp webhook event",
    skip_all,
    fields(event_type = tracing::field::Empty, user_id = tracing::field::Empty)
)]
pub async fn sync_mailchimp_webhook(
    secret: web::Path<String>,
    body: web::Bytes,
    pool: web::Data<PgPool>,
    settings: web::Data<MailchimpSettings>,
) -> Result<HttpResponse, WebhookError> {
    verify_shared_secret(&pool, &settings, &secret).await?;

    let payload: WebhookPayload =
        serde_urlencoded::from_bytes(&body).map_err(WebhookError::MalformedPayload)?;
    tracing::Span::current().record("event_type", tracing::field::display(&payload.event_type));
    let event_type = WebhookEventType::parse(&payload.event_type).map_err(|e| {
        tracing::warn!("Mailchimp webhook: unknown event type {:?}", payload.event_type);
        e
    })?;

    let user_id = find_user_id_by_email(&**pool, &payload.email)
        .await
        .context("Failed to look up the user by email")?;
    // Events can reference addresses this service has never seen.
    if let Some(user_id) = user_id {
        tracing::Span::current().record("user_id", tracing::field::display(&user_id));
        set_subscription_active(
            &**pool,
            user_id,
            ListId::GLOBAL,
            event_type.desired_active_state(),
        )
        .await
        .context("Failed to store the subscription state from the webhook")?;
    }
    Ok(HttpResponse::Ok().body("ok"))
}
