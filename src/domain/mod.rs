//! src/domain/mod.rs

mod list_id;
mod server_prefix;
mod subscriber_email;
mod webhook_secret;

pub use list_id::ListId;
pub use server_prefix::ServerPrefix;
pub use subscriber_email::SubscriberEmail;
pub use webhook_secret::WebhookSecret;
