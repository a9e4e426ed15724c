//! src/subscription_store.rs
//!
//! Persistence for `list_subscriptions`. At most one row exists per
//! `(user_id, list_id)`; the unique index enforces it.

use crate::domain::ListId;
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Subscription {
    pub user_id: Uuid,
    pub list_id: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[tracing::instrument(name = "Get subscription", skip(executor))]
pub async fn find_subscription(
    executor: impl PgExecutor<'_>,
    user_id: Uuid,
    list_id: ListId,
) -> Result<Option<Subscription>, sqlx::Error> {
    sqlx::query_as::<_, Subscription>(
        r#"
        SELECT user_id, list_id, active, created_at, updated_at
        FROM list_subscriptions
        WHERE user_id = $1 AND list_id = $2
        "#,
    )
    .bind(user_id)
    .bind(list_id.as_i32())
    .fetch_optional(executor)
    .await
}

/// Inserts an inactive row unless one exists. Returns whether it was created.
///
/// A concurrent insert of the same key blocks until the other transaction
/// ends, so only one caller ever sees `true`.
#[tracing::instrument(name = "Create subscription if missing", skip(transaction))]
pub async fn create_subscription_if_missing(
    transaction: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    list_id: ListId,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO list_subscriptions (user_id, list_id, active)
        VALUES ($1, $2, FALSE)
        ON CONFLICT (user_id, list_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(list_id.as_i32())
    .execute(&mut **transaction)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Sets `active` only if it currently holds the opposite value and reports
/// whether a flip happened. Concurrent callers block on the row lock and
/// re-check the predicate, so exactly one of them observes the flip.
#[tracing::instrument(name = "Flip subscription", skip(transaction))]
pub async fn flip_subscription(
    transaction: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    list_id: ListId,
    active: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE list_subscriptions
        SET active = $3, updated_at = now()
        WHERE user_id = $1 AND list_id = $2 AND active <> $3
        "#,
    )
    .bind(user_id)
    .bind(list_id.as_i32())
    .bind(active)
    .execute(&mut **transaction)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Writes `active` unconditionally, creating the row when missing.
#[tracing::instrument(name = "Overwrite subscription state", skip(executor))]
pub async fn set_subscription_active(
    executor: impl PgExecutor<'_>,
    user_id: Uuid,
    list_id: ListId,
    active: bool,
) -> Result<Subscription, sqlx::Error> {
    sqlx::query_as::<_, Subscription>(
        r#"
        INSERT INTO list_subscriptions (user_id, list_id, active)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, list_id)
        DO UPDATE SET active = EXCLUDED.active, updated_at = now()
        RETURNING user_id, list_id, active, created_at, updated_at
        "#,
    )
    .bind(user_id)
    .bind(list_id.as_i32())
    .bind(active)
    .fetch_one(executor)
    .await
}
