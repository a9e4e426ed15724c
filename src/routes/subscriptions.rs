//! src/routes/subscriptions.rs

use crate::authentication::UserId;
use crate::configurations::MailchimpSettings;
use crate::domain::ListId;
use crate::rate_limiter::RateLimited;
use crate::subscription_state::{SubscriptionStateError, SubscriptionStateMachine};
use crate::subscription_store::find_subscription;
use crate::utils::error_chain_fmt;
use actix_web::http::header::RETRY_AFTER;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use anyhow::Context;
use sqlx::PgPool;

#[derive(thiserror::Error)]
pub enum SubscriptionError {
    #[error("The requested URL or resource could not be found.")]
    NotConfigured,
    #[error("{}", .0.message())]
    RateLimited(RateLimited),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for SubscriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl From<SubscriptionStateError> for SubscriptionError {
    fn from(e: SubscriptionStateError) -> Self {
        match e {
            SubscriptionStateError::RateLimited(limited) => Self::RateLimited(limited),
            SubscriptionStateError::UnexpectedError(e) => Self::UnexpectedError(e),
        }
    }
}

impl ResponseError for SubscriptionError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotConfigured => StatusCode::NOT_FOUND,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::UnexpectedError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            Self::NotConfigured => HttpResponse::NotFound().json(serde_json::json!({
                "errors": [self.to_string()],
                "error_type": "not_found",
            })),
            Self::RateLimited(limited) => HttpResponse::TooManyRequests()
                .insert_header((RETRY_AFTER, limited.wait_seconds().to_string()))
                .json(serde_json::json!({
                    "errors": [limited.message()],
                    "error_type": "rate_limit",
                    "extras": {
                        "wait_seconds": limited.wait_seconds(),
                        "time_left": limited.time_left(),
                    },
                })),
            Self::UnexpectedError(_) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "errors": ["Something went wrong."],
                }))
            }
        }
    }
}

pub fn ensure_configured(settings: &MailchimpSettings) -> Result<(), SubscriptionError> {
    if settings.is_configured() {
        Ok(())
    } else {
        Err(SubscriptionError::NotConfigured)
    }
}

pub fn success_json() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "success": "OK" }))
}

#[tracing::instrument(
    name = "Subscribing to the newsletter",
    skip(user_id, pool, settings, state_machine),
    fields(user_id = %*user_id)
)]
pub async fn subscribe(
    user_id: web::ReqData<UserId>,
    pool: web::Data<PgPool>,
    settings: web::Data<MailchimpSettings>,
    state_machine: web::Data<SubscriptionStateMachine>,
) -> Result<HttpResponse, SubscriptionError> {
    ensure_configured(&settings)?;
    let user_id = user_id.into_inner();
    state_machine
        .subscribe(&pool, *user_id, ListId::GLOBAL)
        .await?;
    Ok(success_json())
}

#[tracing::instrument(
    name = "Unsubscribing from the newsletter",
    skip(user_id, pool, settings, state_machine),
    fields(user_id = %*user_id)
)]
pub async fn unsubscribe(
    user_id: web::ReqData<UserId>,
    pool: web::Data<PgPool>,
    settings: web::Data<MailchimpSettings>,
    state_machine: web::Data<SubscriptionStateMachine>,
) -> Result<HttpResponse, SubscriptionError> {
    ensure_configured(&settings)?;
    let user_id = user_id.into_inner();
    state_machine
        .unsubscribe(&pool, *user_id, ListId::GLOBAL)
        .await?;
    Ok(success_json())
}

#[derive(serde::Serialize)]
pub struct SubscriptionStatus {
    plugin_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    subscribe_global_newsletter: Option<bool>,
    /// Only true while the user has never answered either way.
    #[serde(skip_serializing_if = "Option::is_none")]
    show_subscription_banner: Option<bool>,
}

#[tracing::instrument(
    name = "Reading newsletter subscription status",
    skip(user_id, pool, settings),
    fields(user_id = %*user_id)
)]
pub async fn subscription_status(
    user_id: web::ReqData<UserId>,
    pool: web::Data<PgPool>,
    settings: web::Data<MailchimpSettings>,
) -> Result<HttpResponse, SubscriptionError> {
    if !settings.is_configured() {
        return Ok(HttpResponse::Ok().json(SubscriptionStatus {
            plugin_configured: false,
            subscribe_global_newsletter: None,
            show_subscription_banner: None,
        }));
    }
    let user_id = user_id.into_inner();
    let subscription = find_subscription(&**pool, *user_id, ListId::GLOBAL)
        .await
        .context("Failed to read the subscription")?;
    Ok(HttpResponse::Ok().json(SubscriptionStatus {
        plugin_configured: true,
        subscribe_global_newsletter: Some(
            subscription.as_ref().map(|s| s.active).unwrap_or(false),
        ),
        show_subscription_banner: Some(subscription.is_none()),
    }))
}
