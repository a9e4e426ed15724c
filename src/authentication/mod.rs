//! src/authentication/mod.rs

mod middleware;
mod password;

pub use middleware::{reject_anonymous_users, UserId};
pub use password::{validate_credentials, AuthError, Credentials};
