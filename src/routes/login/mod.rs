//! src/routes/login/mod.rs

mod post;

pub use post::login;
