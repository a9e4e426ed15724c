//! src/integration_settings.rs
//!
//! Runtime state of the integration that cannot live in the static
//! configuration files: the current webhook secret and a fingerprint of the
//! provider settings it was registered with. The fingerprint is only written
//! once a registration succeeded.

use crate::configurations::MailchimpSettings;
use crate::domain::WebhookSecret;
use crate::task_queue::{enqueue_task, SyncTask};
use anyhow::Context;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use sqlx::{PgExecutor, PgPool};

const WEBHOOK_SECRET: &str = "mailchimp_webhook_secret";
const CONFIG_FINGERPRINT: &str = "mailchimp_config_fingerprint";

async fn get_setting(
    executor: impl PgExecutor<'_>,
    name: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>("SELECT value FROM integration_settings WHERE name = $1")
        .bind(name)
        .fetch_optional(executor)
        .await
}

async fn set_setting(
    executor: impl PgExecutor<'_>,
    name: &str,
    value: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO integration_settings (name, value)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
        "#,
    )
    .bind(name)
    .bind(value)
    .execute(executor)
    .await?;
    Ok(())
}

/// The secret webhook callbacks must present. `None` when unset or blank.
#[tracing::instrument(name = "Get webhook secret", skip(executor))]
pub async fn get_webhook_secret(
    executor: impl PgExecutor<'_>,
) -> Result<Option<WebhookSecret>, anyhow::Error> {
    let stored = get_setting(executor, WEBHOOK_SECRET)
        .await
        .context("Failed to read the webhook secret")?;
    Ok(stored
        .filter(|value| !value.is_empty())
        .and_then(|value| WebhookSecret::parse(value).ok()))
}

#[tracing::instrument(name = "Store webhook secret", skip(executor, secret))]
pub async fn set_webhook_secret(
    executor: impl PgExecutor<'_>,
    secret: Option<&WebhookSecret>,
) -> Result<(), anyhow::Error> {
    let value = secret.map(|secret| secret.as_ref()).unwrap_or("");
    set_setting(executor, WEBHOOK_SECRET, value)
        .await
        .context("Failed to store the webhook secret")
}

/// Hash of the settings a webhook registration depends on.
fn config_fingerprint(settings: &MailchimpSettings) -> String {
    let mut hasher = Sha256::new();
    for part in [
        settings.api_key.expose_secret().as_str(),
        settings.list_id.as_str(),
        settings.server_prefix.as_ref(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Remembers the settings a webhook was successfully registered with, or
/// forgets them so the next startup registers again.
#[tracing::instrument(name = "Store registered provider settings", skip_all)]
pub async fn set_registered_config(
    executor: impl PgExecutor<'_>,
    settings: Option<&MailchimpSettings>,
) -> Result<(), anyhow::Error> {
    let value = settings.map(config_fingerprint).unwrap_or_default();
    set_setting(executor, CONFIG_FINGERPRINT, &value)
        .await
        .context("Failed to store the registered provider settings")
}

/// Queues a webhook (re-)registration unless the current provider settings
/// are the ones the live webhook was registered with, or a registration is
/// already waiting in the queue. Returns whether a task was queued.
#[tracing::instrument(name = "Checking provider settings for changes", skip_all)]
pub async fn schedule_webhook_setup_if_config_changed(
    pool: &PgPool,
    settings: &MailchimpSettings,
) -> Result<bool, anyhow::Error> {
    if !settings.is_configured() {
        return Ok(false);
    }
    let fingerprint = config_fingerprint(settings);

    let mut transaction = pool
        .begin()
        .await
        .context("Failed to acquire a Postgres connection from the pool")?;
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(CONFIG_FINGERPRINT)
        .execute(&mut *transaction)
        .await?;
    let registered = get_setting(&mut *transaction, CONFIG_FINGERPRINT).await?;
    if registered.as_deref() == Some(fingerprint.as_str()) {
        return Ok(false);
    }
    let already_queued = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM sync_tasks WHERE kind = $1)",
    )
    .bind(SyncTask::WebhookSetup.kind())
    .fetch_one(&mut *transaction)
    .await?;
    if already_queued {
        return Ok(false);
    }
    enqueue_task(&mut transaction, &SyncTask::WebhookSetup)
        .await
        .context("Failed to enqueue the webhook setup task")?;
    transaction.commit().await?;
    tracing::info!("Provider settings not registered yet, webhook setup queued");
    Ok(true)
}
