//! src/rate_limiter.rs
//!
//! Rolling-window limiter backed by `rate_limit_events`. Checks run inside the
//! caller's transaction, so a rejected or rolled back action leaves no trace.

use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, Postgres, Transaction};
use uuid::Uuid;

const SUBSCRIPTION_CHANGE_ACTION: &str = "subscription-change";

#[derive(Debug, Clone)]
pub struct RateLimiter {
    action: &'static str,
    max: u32,
    window: chrono::Duration,
}

/// The caller has used up its budget for the current window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimited {
    pub retry_after: std::time::Duration,
}

#[derive(thiserror::Error, Debug)]
pub enum RateLimitError {
    #[error("{}", .0.message())]
    LimitExceeded(RateLimited),
    #[error("Failed to record the rate-limited action")]
    Database(#[from] sqlx::Error),
}

impl RateLimiter {
    pub fn new(action: &'static str, max: u32, window: chrono::Duration) -> Self {
        Self {
            action,
            max,
            window,
        }
    }

    /// How often a user may flip their own newsletter subscription.
    pub fn subscription_changes(max_per_hour: u32) -> Self {
        Self::new(
            SUBSCRIPTION_CHANGE_ACTION,
            max_per_hour,
            chrono::Duration::hours(1),
        )
    }

    fn key(&self, user_id: Uuid) -> String {
        format!("{}:{}", self.action, user_id)
    }

    /// Records one occurrence of the action for `user_id`, or refuses it.
    #[tracing::instrument(
        name = "Checking rate limit",
        skip(self, transaction),
        fields(action = %self.action, max = %self.max)
    )]
    pub async fn performed(
        &self,
        transaction: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<(), RateLimitError> {
        let key = self.key(user_id);
        let now = Utc::now();

        // Serializes checks for the same key across connections.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(&key)
            .execute(&mut **transaction)
            .await?;

        sqlx::query("DELETE FROM rate_limit_events WHERE key = $1 AND performed_at <= $2")
            .bind(&key)
            .bind(now - self.window)
            .execute(&mut **transaction)
            .await?;

        let performed_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            SELECT performed_at
            FROM rate_limit_events
            WHERE key = $1
            ORDER BY performed_at ASC
            "#,
        )
        .bind(&key)
        .fetch_all(&mut **transaction)
        .await?;

        if performed_at.len() >= self.max as usize {
            let retry_after = self.retry_after(performed_at.first().copied(), now);
            tracing::info!(
                wait_seconds = retry_after.as_secs(),
                "Rate limit reached"
            );
            return Err(RateLimitError::LimitExceeded(RateLimited { retry_after }));
        }

        sqlx::query("INSERT INTO rate_limit_events (key, performed_at) VALUES ($1, $2)")
            .bind(&key)
            .bind(now)
            .execute(&mut **transaction)
            .await?;
        Ok(())
    }

    /// Deletes occurrences of this action that fell out of the window, for
    /// every key. Returns how many were removed.
    #[tracing::instrument(
        name = "Pruning rate limit events",
        skip_all,
        fields(action = %self.action)
    )]
    pub async fn prune_expired(&self, executor: impl PgExecutor<'_>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM rate_limit_events
            WHERE starts_with(key, $1) AND performed_at <= $2
            "#,
        )
        .bind(format!("{}:", self.action))
        .bind(Utc::now() - self.window)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Time until the oldest recorded occurrence leaves the window.
    fn retry_after(&self, oldest: Option<DateTime<Utc>>, now: DateTime<Utc>) -> std::time::Duration {
        let remaining = match oldest {
            Some(oldest) => self.window - (now - oldest),
            None => self.window,
        };
        remaining.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}

impl RateLimited {
    /// Whole seconds to wait, rounded up.
    pub fn wait_seconds(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    pub fn time_left(&self) -> String {
        let wait_seconds = self.wait_seconds();
        if wait_seconds <= 60 {
            pluralize(wait_seconds, "second")
        } else if wait_seconds <= 3600 {
            pluralize(wait_seconds.div_ceil(60), "minute")
        } else {
            pluralize(wait_seconds.div_ceil(3600), "hour")
        }
    }

    pub fn message(&self) -> String {
        format!(
            "You've changed your newsletter subscription too many times. Please wait {} before trying again.",
            self.time_left()
        )
    }
}

fn pluralize(count: u64, unit: &str) -> String {
    if count == 1 {
        format!("{} {}", count, unit)
    } else {
        format!("{} {}s", count, unit)
    }
}
