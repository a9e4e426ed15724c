//! tests/api/subscriptions.rs

use crate::helpers::{spawn_app, spawn_app_with};
use newsletter_sync::domain::ListId;
use newsletter_sync::rate_limiter::RateLimiter;
use newsletter_sync::subscription_state::{SubscriptionStateMachine, Transition};
use newsletter_sync::task_queue::SyncTask;
use secrecy::Secret;
use std::sync::Arc;

#[tokio::test]
async fn subscribe_is_rejected_for_anonymous_users() {
    let app = spawn_app().await;

    let response = app.post_subscriptions().await;

    assert_eq!(response.status().as_u16(), 403);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error_type"], "invalid_access");
    assert_eq!(app.subscription_count().await, 0);
}

#[tokio::test]
async fn unsubscribe_is_rejected_for_anonymous_users() {
    let app = spawn_app().await;

    let response = app.delete_subscriptions().await;

    assert_eq!(response.status().as_u16(), 403);
    assert_eq!(app.subscription_count().await, 0);
}

#[tokio::test]
async fn subscribe_returns_404_when_the_integration_is_not_configured() {
    let app = spawn_app_with(|c| c.mailchimp.api_key = Secret::new(String::new())).await;
    app.login_test_user().await;

    let response = app.post_subscriptions().await;

    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(app.subscription_count().await, 0);
    assert!(app.queued_sync_tasks(app.test_user.user_id).await.is_empty());
}

#[tokio::test]
async fn unsubscribe_returns_404_when_the_integration_is_disabled() {
    let app = spawn_app_with(|c| c.mailchimp.enabled = false).await;
    app.login_test_user().await;

    let response = app.delete_subscriptions().await;

    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(app.subscription_count().await, 0);
}

#[tokio::test]
async fn subscribe_creates_an_active_subscription_and_queues_a_sync() {
    let app = spawn_app().await;
    app.login_test_user().await;
    let user_id = app.test_user.user_id;

    let response = app.post_subscriptions().await;

    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "success": "OK" }));
    assert_eq!(app.subscription_state(user_id).await, Some(true));
    assert_eq!(
        app.queued_sync_tasks(user_id).await,
        vec![SyncTask::SubscriptionSync {
            user_id,
            list_id: ListId::GLOBAL
        }]
    );
}

#[tokio::test]
async fn subscribe_activates_an_inactive_subscription() {
    let app = spawn_app().await;
    let user_id = app.test_user.user_id;
    app.insert_subscription(user_id, false).await;
    app.login_test_user().await;

    let response = app.post_subscriptions().await;

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(app.subscription_state(user_id).await, Some(true));
    assert_eq!(app.queued_sync_tasks(user_id).await.len(), 1);
}

#[tokio::test]
async fn subscribe_on_an_active_subscription_changes_nothing() {
    let app = spawn_app().await;
    let user_id = app.test_user.user_id;
    app.insert_subscription(user_id, true).await;
    app.login_test_user().await;

    let response = app.post_subscriptions().await;

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(app.subscription_state(user_id).await, Some(true));
    assert!(app.queued_sync_tasks(user_id).await.is_empty());
}

#[tokio::test]
async fn subscribing_twice_queues_a_single_sync() {
    let app = spawn_app().await;
    let user_id = app.test_user.user_id;
    app.login_test_user().await;

    assert_eq!(app.post_subscriptions().await.status().as_u16(), 200);
    assert_eq!(app.post_subscriptions().await.status().as_u16(), 200);

    assert_eq!(app.subscription_state(user_id).await, Some(true));
    assert_eq!(app.queued_sync_tasks(user_id).await.len(), 1);
}

#[tokio::test]
async fn subscribe_then_unsubscribe_queues_two_syncs() {
    let app = spawn_app().await;
    let user_id = app.test_user.user_id;
    app.login_test_user().await;

    assert_eq!(app.post_subscriptions().await.status().as_u16(), 200);
    assert_eq!(app.delete_subscriptions().await.status().as_u16(), 200);

    assert_eq!(app.subscription_state(user_id).await, Some(false));
    assert_eq!(app.queued_sync_tasks(user_id).await.len(), 2);
}

#[tokio::test]
async fn unsubscribe_without_a_record_stores_an_inactive_one_without_syncing() {
    let app = spawn_app().await;
    let user_id = app.test_user.user_id;
    app.login_test_user().await;

    let response = app.delete_subscriptions().await;

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(app.subscription_state(user_id).await, Some(false));
    assert!(app.queued_sync_tasks(user_id).await.is_empty());
}

#[tokio::test]
async fn unsubscribe_deactivates_an_active_subscription() {
    let app = spawn_app().await;
    let user_id = app.test_user.user_id;
    app.insert_subscription(user_id, true).await;
    app.login_test_user().await;

    let response = app.delete_subscriptions().await;

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(app.subscription_state(user_id).await, Some(false));
    assert_eq!(app.queued_sync_tasks(user_id).await.len(), 1);
}

#[tokio::test]
async fn unsubscribe_on_an_inactive_subscription_changes_nothing() {
    let app = spawn_app().await;
    let user_id = app.test_user.user_id;
    app.insert_subscription(user_id, false).await;
    app.login_test_user().await;

    let response = app.delete_subscriptions().await;

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(app.subscription_state(user_id).await, Some(false));
    assert!(app.queued_sync_tasks(user_id).await.is_empty());
}

#[tokio::test]
async fn subscribe_past_the_hourly_limit_is_rejected_with_429() {
    let app = spawn_app_with(|c| c.rate_limits.subscription_changes_per_hour = 1).await;
    let user_id = app.test_user.user_id;
    app.insert_subscription(user_id, false).await;
    app.login_test_user().await;

    assert_eq!(app.post_subscriptions().await.status().as_u16(), 200);
    // Flip the row back behind the limiter's back so the next call is a real change.
    app.overwrite_subscription(user_id, false).await;

    let response = app.post_subscriptions().await;

    assert_eq!(response.status().as_u16(), 429);
    let retry_after: i64 = response
        .headers()
        .get("Retry-After")
        .expect("Retry-After header is missing")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((3599..=3600).contains(&retry_after), "{}", retry_after);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error_type"], "rate_limit");
    assert_eq!(body["extras"]["wait_seconds"], retry_after);
    assert_eq!(body["extras"]["time_left"], "60 minutes");
    assert!(body["errors"][0].as_str().unwrap().contains("60 minutes"));

    assert_eq!(app.subscription_state(user_id).await, Some(false));
    assert_eq!(app.queued_sync_tasks(user_id).await.len(), 1);
}

#[tokio::test]
async fn unsubscribe_past_the_hourly_limit_is_rejected_with_429() {
    let app = spawn_app_with(|c| c.rate_limits.subscription_changes_per_hour = 1).await;
    let user_id = app.test_user.user_id;
    app.insert_subscription(user_id, true).await;
    app.login_test_user().await;

    assert_eq!(app.delete_subscriptions().await.status().as_u16(), 200);
    app.overwrite_subscription(user_id, true).await;

    let response = app.delete_subscriptions().await;

    assert_eq!(response.status().as_u16(), 429);
    assert!(response.headers().get("Retry-After").is_some());
    assert_eq!(app.subscription_state(user_id).await, Some(true));
}

#[tokio::test]
async fn no_op_requests_do_not_count_against_the_limit() {
    let app = spawn_app_with(|c| c.rate_limits.subscription_changes_per_hour = 1).await;
    let user_id = app.test_user.user_id;
    app.insert_subscription(user_id, false).await;
    app.login_test_user().await;

    for _ in 0..3 {
        assert_eq!(app.delete_subscriptions().await.status().as_u16(), 200);
    }
    assert_eq!(app.post_subscriptions().await.status().as_u16(), 200);

    assert_eq!(app.subscription_state(user_id).await, Some(true));
}

#[tokio::test]
async fn status_reports_an_unconfigured_integration() {
    let app = spawn_app_with(|c| c.mailchimp.enabled = false).await;
    app.login_test_user().await;

    let response = app.get_subscriptions().await;

    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "plugin_configured": false }));
}

#[tokio::test]
async fn status_shows_the_banner_until_the_user_has_decided() {
    let app = spawn_app().await;
    let user_id = app.test_user.user_id;
    app.login_test_user().await;

    let body: serde_json::Value = app.get_subscriptions().await.json().await.unwrap();
    assert_eq!(
        body,
        serde_json::json!({
            "plugin_configured": true,
            "subscribe_global_newsletter": false,
            "show_subscription_banner": true,
        })
    );

    app.delete_subscriptions().await;
    let body: serde_json::Value = app.get_subscriptions().await.json().await.unwrap();
    assert_eq!(body["subscribe_global_newsletter"], false);
    assert_eq!(body["show_subscription_banner"], false);

    app.post_subscriptions().await;
    let body: serde_json::Value = app.get_subscriptions().await.json().await.unwrap();
    assert_eq!(body["subscribe_global_newsletter"], true);
    assert_eq!(body["show_subscription_banner"], false);
    assert_eq!(app.subscription_state(user_id).await, Some(true));
}

#[tokio::test]
async fn status_is_rejected_for_anonymous_users() {
    let app = spawn_app().await;

    let response = app.get_subscriptions().await;

    assert_eq!(response.status().as_u16(), 403);
}

fn state_machine() -> Arc<SubscriptionStateMachine> {
    Arc::new(SubscriptionStateMachine::new(
        RateLimiter::subscription_changes(5),
    ))
}

#[tokio::test]
async fn concurrent_subscribes_flip_the_subscription_exactly_once() {
    let app = spawn_app().await;
    let user_id = app.test_user.user_id;
    let machine = state_machine();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let machine = Arc::clone(&machine);
            let pool = app.db_pool.clone();
            tokio::spawn(async move { machine.subscribe(&pool, user_id, ListId::GLOBAL).await })
        })
        .collect();
    let mut transitions = Vec::new();
    for handle in handles {
        transitions.push(handle.await.unwrap().unwrap());
    }

    let flips = transitions
        .iter()
        .filter(|t| **t == Transition::Flipped)
        .count();
    assert_eq!(flips, 1);
    assert!(transitions
        .iter()
        .all(|t| matches!(t, Transition::Flipped | Transition::Unchanged)));
    assert_eq!(app.subscription_state(user_id).await, Some(true));
    assert_eq!(app.subscription_count().await, 1);
    assert_eq!(app.queued_sync_tasks(user_id).await.len(), 1);
    assert_eq!(app.rate_limit_event_count().await, 1);
}

#[tokio::test]
async fn first_unsubscribe_racing_a_subscribe_queues_one_task_per_flip() {
    let app = spawn_app().await;
    let user_id = app.test_user.user_id;
    let machine = state_machine();

    let unsubscribe = {
        let machine = Arc::clone(&machine);
        let pool = app.db_pool.clone();
        tokio::spawn(async move { machine.unsubscribe(&pool, user_id, ListId::GLOBAL).await })
    };
    let subscribe = {
        let machine = Arc::clone(&machine);
        let pool = app.db_pool.clone();
        tokio::spawn(async move { machine.subscribe(&pool, user_id, ListId::GLOBAL).await })
    };
    let unsubscribed = unsubscribe.await.unwrap().unwrap();
    let subscribed = subscribe.await.unwrap().unwrap();

    // Subscribing always starts from a row that is inactive or missing.
    assert_eq!(subscribed, Transition::Flipped);
    let flips = [unsubscribed, subscribed]
        .iter()
        .filter(|t| **t == Transition::Flipped)
        .count();
    let tasks = app.queued_sync_tasks(user_id).await;
    assert_eq!(tasks.len(), flips);
    assert_eq!(app.rate_limit_event_count().await, flips as i64);
    match unsubscribed {
        // The unsubscribe created the row, the subscribe then activated it.
        Transition::Initialized => {
            assert_eq!(app.subscription_state(user_id).await, Some(true))
        }
        // The subscribe landed first, the unsubscribe undid it.
        Transition::Flipped => {
            assert_eq!(app.subscription_state(user_id).await, Some(false))
        }
        Transition::Unchanged => panic!("The unsubscribe should have had an effect"),
    }
    assert_eq!(app.subscription_count().await, 1);
}
