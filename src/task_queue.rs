//! src/task_queue.rs
//!
//! Postgres-backed outbox for background work. Tasks are inserted in the same
//! transaction as the change they follow up on, so a worker can never pick a
//! task up before that change is visible.

use crate::domain::ListId;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncTask {
    /// Push the current local state of one subscription to the provider.
    SubscriptionSync { user_id: Uuid, list_id: ListId },
    /// Rotate the webhook secret and (re-)register the provider callback.
    WebhookSetup,
}

impl SyncTask {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncTask::SubscriptionSync { .. } => "subscription_sync",
            SyncTask::WebhookSetup => "webhook_setup",
        }
    }
}

#[derive(Debug)]
pub struct QueuedTask {
    pub task_id: Uuid,
    pub task: SyncTask,
    pub n_retries: i32,
}

#[derive(sqlx::FromRow)]
struct QueuedTaskRow {
    task_id: Uuid,
    payload: Json<serde_json::Value>,
    n_retries: i32,
}

pub type PgTransaction = Transaction<'static, Postgres>;

#[tracing::instrument(name = "Enqueue sync task", skip(transaction), fields(kind = %task.kind()))]
pub async fn enqueue_task(
    transaction: &mut Transaction<'_, Postgres>,
    task: &SyncTask,
) -> Result<Uuid, sqlx::Error> {
    let task_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO sync_tasks (task_id, kind, payload)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(task_id)
    .bind(task.kind())
    .bind(Json(task))
    .execute(&mut **transaction)
    .await?;
    Ok(task_id)
}

/// Claims the next due task. The row stays locked until the returned
/// transaction ends; other workers skip it meanwhile.
///
/// Rows whose payload no longer decodes into a `SyncTask` are deleted so they
/// can't hold up the rest of the queue.
#[tracing::instrument(skip_all)]
pub async fn dequeue_task(
    pool: &PgPool,
) -> Result<Option<(PgTransaction, QueuedTask)>, anyhow::Error> {
    loop {
        let mut transaction = pool.begin().await?;
        let Some(row) = sqlx::query_as::<_, QueuedTaskRow>(
            r#"
            SELECT task_id, payload, n_retries
            FROM sync_tasks
            WHERE execute_after <= now()
            ORDER BY execute_after, created_at
            FOR UPDATE
            SKIP LOCKED
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *transaction)
        .await?
        else {
            return Ok(None);
        };

        match serde_json::from_value::<SyncTask>(row.payload.0) {
            Ok(task) => {
                return Ok(Some((
                    transaction,
                    QueuedTask {
                        task_id: row.task_id,
                        task,
                        n_retries: row.n_retries,
                    },
                )));
            }
            Err(e) => {
                tracing::error!(
                    error.cause_chain = ?e,
                    error.message = %e,
                    task_id = %row.task_id,
                    "Discarding a sync task with an undecodable payload",
                );
                delete_task(transaction, row.task_id).await?;
            }
        }
    }
}

#[tracing::instrument(skip(transaction))]
pub async fn delete_task(
    mut transaction: PgTransaction,
    task_id: Uuid,
) -> Result<(), anyhow::Error> {
    sqlx::query("DELETE FROM sync_tasks WHERE task_id = $1")
        .bind(task_id)
        .execute(&mut *transaction)
        .await?;
    transaction.commit().await?;
    Ok(())
}

#[tracing::instrument(skip(transaction))]
pub async fn reschedule_task(
    mut transaction: PgTransaction,
    task_id: Uuid,
    n_retries: i32,
    execute_after: DateTime<Utc>,
) -> Result<(), anyhow::Error> {
    sqlx::query(
        r#"
        UPDATE sync_tasks
        SET n_retries = $2, execute_after = $3
        WHERE task_id = $1
        "#,
    )
    .bind(task_id)
    .bind(n_retries)
    .bind(execute_after)
    .execute(&mut *transaction)
    .await?;
    transaction.commit().await?;
    Ok(())
}
