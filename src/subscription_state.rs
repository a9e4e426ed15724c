//! src/subscription_state.rs
//!
//! The only place local subscription changes are decided. A change that
//! actually flips `active` on an existing row is rate limited and followed by
//! exactly one reconciliation task; creating a row in its default inactive
//! state is initialisation, not a change.

use crate::domain::ListId;
use crate::rate_limiter::{RateLimitError, RateLimited, RateLimiter};
use crate::subscription_store::{create_subscription_if_missing, flip_subscription};
use crate::task_queue::{enqueue_task, SyncTask};
use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A missing row was created, inactive.
    Initialized,
    /// The row already had the requested value.
    Unchanged,
    /// `active` was flipped and a sync task was queued.
    Flipped,
}

#[derive(thiserror::Error)]
pub enum SubscriptionStateError {
    #[error("{}", .0.message())]
    RateLimited(RateLimited),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for SubscriptionStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::utils::error_chain_fmt(self, f)
    }
}

impl From<RateLimitError> for SubscriptionStateError {
    fn from(e: RateLimitError) -> Self {
        match e {
            RateLimitError::LimitExceeded(limited) => Self::RateLimited(limited),
            RateLimitError::Database(_) => Self::UnexpectedError(
                anyhow::Error::new(e).context("Failed to apply the subscription change limit"),
            ),
        }
    }
}

pub struct SubscriptionStateMachine {
    change_limiter: RateLimiter,
}

impl SubscriptionStateMachine {
    pub fn new(change_limiter: RateLimiter) -> Self {
        Self { change_limiter }
    }

    pub async fn subscribe(
        &self,
        pool: &PgPool,
        user_id: Uuid,
        list_id: ListId,
    ) -> Result<Transition, SubscriptionStateError> {
        self.ensure_state(pool, user_id, list_id, true).await
    }

    pub async fn unsubscribe(
        &self,
        pool: &PgPool,
        user_id: Uuid,
        list_id: ListId,
    ) -> Result<Transition, SubscriptionStateError> {
        self.ensure_state(pool, user_id, list_id, false).await
    }

    #[tracing::instrument(name = "Changing subscription state", skip(self, pool))]
    async fn ensure_state(
        &self,
        pool: &PgPool,
        user_id: Uuid,
        list_id: ListId,
        active: bool,
    ) -> Result<Transition, SubscriptionStateError> {
        let mut transaction = pool
            .begin()
            .await
            .context("Failed to acquire a Postgres connection from the pool")?;

        let created = create_subscription_if_missing(&mut transaction, user_id, list_id)
            .await
            .context("Failed to create the missing subscription")?;

        let transition = if created && !active {
            Transition::Initialized
        } else {
            let flipped = flip_subscription(&mut transaction, user_id, list_id, active)
                .await
                .context("Failed to update the subscription")?;
            if flipped {
                // Dropping the transaction on rejection rolls the flip back.
                self.change_limiter.performed(&mut transaction, user_id).await?;
                enqueue_task(
                    &mut transaction,
                    &SyncTask::SubscriptionSync { user_id, list_id },
                )
                .await
                .context("Failed to enqueue the subscription sync task")?;
                Transition::Flipped
            } else {
                Transition::Unchanged
            }
        };

        transaction
            .commit()
            .await
            .context("Failed to commit the subscription change")?;
        tracing::info!(?transition, "Subscription state settled");
        Ok(transition)
    }
}
