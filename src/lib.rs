//! src/lib.rs

pub mod authentication;
pub mod configurations;
pub mod domain;
pub mod integration_settings;
pub mod mailchimp_client;
pub mod providers;
pub mod rate_limiter;
pub mod routes;
pub mod session_state;
pub mod startup;
pub mod subscription_state;
pub mod subscription_store;
pub mod subscription_sync;
pub mod sync_worker;
pub mod task_queue;
pub mod telemetry;
pub mod users;
pub mod utils;
pub mod webhook_registration;
