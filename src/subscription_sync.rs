//! src/subscription_sync.rs
//!
//! Reconciliation: push the authoritative local state of one subscription to
//! the provider. Every run re-reads the row, so runs are idempotent and may
//! happen out of order.

use crate::domain::ListId;
use crate::providers::{ListMember, ListProvider};
use crate::subscription_store::find_subscription;
use crate::users::find_user_by_id;
use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    NotConfigured,
    UserNotFound,
    Subscribed,
    Unsubscribed,
}

/// Provider failures are returned as-is; retrying is the caller's business.
#[tracing::instrument(name = "Syncing subscription to provider", skip(pool, provider))]
pub async fn sync_subscription(
    pool: &PgPool,
    provider: Option<&ListProvider>,
    user_id: Uuid,
    list_id: ListId,
) -> Result<SyncOutcome, anyhow::Error> {
    let Some(provider) = provider else {
        return Ok(SyncOutcome::NotConfigured);
    };
    let Some(user) = find_user_by_id(pool, user_id)
        .await
        .context("Failed to look up the user")?
    else {
        tracing::info!("User no longer exists, nothing to sync");
        return Ok(SyncOutcome::UserNotFound);
    };
    let member = ListMember::try_from(&user).map_err(anyhow::Error::msg)?;

    let active = find_subscription(pool, user_id, list_id)
        .await
        .context("Failed to read the subscription")?
        .map(|subscription| subscription.active)
        .unwrap_or(false);

    if active {
        provider
            .subscribe(&member)
            .await
            .context("Failed to subscribe the member on the provider")?;
        Ok(SyncOutcome::Subscribed)
    } else {
        provider
            .unsubscribe(&member)
            .await
            .context("Failed to unsubscribe the member on the provider")?;
        Ok(SyncOutcome::Unsubscribed)
    }
}
