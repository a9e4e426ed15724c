//! src/sync_worker.rs

use crate::configurations::{MailchimpSettings, RateLimitSettings, Settings, WorkerSettings};
use crate::integration_settings::schedule_webhook_setup_if_config_changed;
use crate::providers::ListProvider;
use crate::rate_limiter::RateLimiter;
use crate::startup::get_connection_pool;
use crate::subscription_sync::sync_subscription;
use crate::task_queue::{delete_task, dequeue_task, reschedule_task, QueuedTask, SyncTask};
use crate::webhook_registration::setup_webhook;
use anyhow::Context;
use chrono::Utc;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{field::display, Span};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(10 * 60);

pub struct WorkerContext {
    pub pool: PgPool,
    pub provider: Option<ListProvider>,
    pub mailchimp: MailchimpSettings,
    pub base_url: String,
    pub change_limiter: RateLimiter,
    pub max_retries: i32,
    pub retry_backoff: chrono::Duration,
}

impl WorkerContext {
    pub fn build(
        pool: PgPool,
        mailchimp: MailchimpSettings,
        worker: &WorkerSettings,
        rate_limits: &RateLimitSettings,
        base_url: String,
    ) -> Result<Self, anyhow::Error> {
        Ok(Self {
            pool,
            provider: ListProvider::from_settings(&mailchimp)?,
            mailchimp,
            base_url,
            change_limiter: RateLimiter::subscription_changes(
                rate_limits.subscription_changes_per_hour,
            ),
            max_retries: worker.max_retries,
            retry_backoff: chrono::Duration::seconds(worker.retry_backoff_seconds),
        })
    }
}

pub async fn run_worker_until_stopped(configuration: Settings) -> Result<(), anyhow::Error> {
    let connection_pool = get_connection_pool(&configuration.database);
    let context = WorkerContext::build(
        connection_pool,
        configuration.mailchimp,
        &configuration.worker,
        &configuration.rate_limits,
        configuration.application.base_url,
    )?;
    worker_loop(context, configuration.worker.poll_interval()).await
}

async fn worker_loop(context: WorkerContext, poll_interval: Duration) -> Result<(), anyhow::Error> {
    let mut last_maintenance: Option<Instant> = None;
    loop {
        if last_maintenance.map_or(true, |at| at.elapsed() >= MAINTENANCE_INTERVAL) {
            // Failures are logged by `run_maintenance` and retried next interval.
            let _ = run_maintenance(&context).await;
            last_maintenance = Some(Instant::now());
        }
        match try_execute_task(&context).await {
            Ok(ExecutionOutcome::EmptyQueue) => {
                tokio::time::sleep(poll_interval).await;
            }
            Err(_) => {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Ok(ExecutionOutcome::TaskCompleted) => {}
        }
    }
}

/// Housekeeping that no single task owns: dropping rate limit events that
/// left their window, and re-queueing a webhook registration that was given
/// up on.
#[tracing::instrument(skip_all, err)]
pub async fn run_maintenance(context: &WorkerContext) -> Result<(), anyhow::Error> {
    let pruned = context
        .change_limiter
        .prune_expired(&context.pool)
        .await
        .context("Failed to prune expired rate limit events")?;
    if pruned > 0 {
        tracing::info!(pruned, "Pruned expired rate limit events");
    }
    schedule_webhook_setup_if_config_changed(&context.pool, &context.mailchimp).await?;
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    TaskCompleted,
    EmptyQueue,
}

#[tracing::instrument(
    skip_all,
    fields(task_id = tracing::field::Empty, kind = tracing::field::Empty),
    err
)]
pub async fn try_execute_task(context: &WorkerContext) -> Result<ExecutionOutcome, anyhow::Error> {
    let Some((transaction, queued)) = dequeue_task(&context.pool).await? else {
        return Ok(ExecutionOutcome::EmptyQueue);
    };
    Span::current()
        .record("task_id", display(queued.task_id))
        .record("kind", display(queued.task.kind()));

    match execute(context, &queued.task).await {
        Ok(()) => {
            delete_task(transaction, queued.task_id).await?;
        }
        Err(e) => handle_failure(context, transaction, &queued, e).await?,
    }
    Ok(ExecutionOutcome::TaskCompleted)
}

async fn execute(context: &WorkerContext, task: &SyncTask) -> Result<(), anyhow::Error> {
    match task {
        SyncTask::SubscriptionSync { user_id, list_id } => {
            let outcome =
                sync_subscription(&context.pool, context.provider.as_ref(), *user_id, *list_id)
                    .await?;
            tracing::info!(?outcome, "Subscription sync finished");
        }
        SyncTask::WebhookSetup => {
            setup_webhook(&context.pool, &context.mailchimp, &context.base_url).await?;
        }
    }
    Ok(())
}

async fn handle_failure(
    context: &WorkerContext,
    transaction: crate::task_queue::PgTransaction,
    queued: &QueuedTask,
    e: anyhow::Error,
) -> Result<(), anyhow::Error> {
    let n_retries = queued.n_retries + 1;
    if n_retries >= context.max_retries {
        tracing::error!(
            error.cause_chain = ?e,
            error.message = %e,
            n_retries,
            "Giving up on sync task after too many failed attempts",
        );
        delete_task(transaction, queued.task_id).await
    } else {
        let backoff = context.retry_backoff * n_retries;
        tracing::warn!(
            error.cause_chain = ?e,
            error.message = %e,
            n_retries,
            retry_in_seconds = backoff.num_seconds(),
            "Sync task failed, retrying later",
        );
        reschedule_task(transaction, queued.task_id, n_retries, Utc::now() + backoff).await
    }
}
