//! src/routes/webhooks/mod.rs

mod mailchimp;

pub use mailchimp::*;
