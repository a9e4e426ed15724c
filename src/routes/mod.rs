//! src/routes/mod.rs

mod health_check;
mod login;
mod preferences;
mod subscriptions;
mod webhooks;

pub use health_check::*;
pub use login::*;
pub use preferences::*;
pub use subscriptions::*;
pub use webhooks::*;
