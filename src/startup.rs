//! src/startup.rs

use crate::authentication::reject_anonymous_users;
use crate::configurations::{DatabaseSettings, MailchimpSettings, Settings};
use crate::rate_limiter::RateLimiter;
use crate::routes::{
    health_check, login, subscribe, subscription_status, sync_mailchimp_webhook, unsubscribe,
    update_preferences, verify_mailchimp_webhook,
};
use crate::subscription_state::SubscriptionStateMachine;
use actix_session::storage::CookieSessionStore;
use actix_session::SessionMiddleware;
use actix_web::cookie::Key;
use actix_web::dev::Server;
use actix_web::middleware::from_fn;
use actix_web::{web, App, HttpServer};
use secrecy::{ExposeSecret, Secret};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::net::TcpListener;
use tracing_actix_web::TracingLogger;

pub struct Application {
    port: u16,
    server: Server,
}

impl Application {
    pub async fn build(configuration: Settings) -> Result<Self, anyhow::Error> {
        let connection_pool = get_connection_pool(&configuration.database);
        let state_machine = SubscriptionStateMachine::new(RateLimiter::subscription_changes(
            configuration.rate_limits.subscription_changes_per_hour,
        ));

        let address = format!(
            "{}:{}",
            configuration.application.host, configuration.application.port
        );
        let listener = TcpListener::bind(address)?;
        let port = listener.local_addr()?.port();
        let server = run(
            listener,
            connection_pool,
            configuration.mailchimp,
            state_machine,
            configuration.application.hmac_secret,
            configuration.application.cookie_secure,
        )?;

        Ok(Self { port, server })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        self.server.await
    }
}

pub fn get_connection_pool(configuration: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(configuration.with_db())
}

pub fn run(
    listener: TcpListener,
    db_pool: PgPool,
    mailchimp: MailchimpSettings,
    state_machine: SubscriptionStateMachine,
    hmac_secret: Secret<String>,
    cookie_secure: bool,
) -> Result<Server, anyhow::Error> {
    let db_pool = web::Data::new(db_pool);
    let mailchimp = web::Data::new(mailchimp);
    let state_machine = web::Data::new(state_machine);
    let secret_key = Key::from(hmac_secret.expose_secret().as_bytes());
    let server = HttpServer::new(move || {
        App::new()
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), secret_key.clone())
                    .cookie_secure(cookie_secure)
                    .build(),
            )
            .wrap(TracingLogger::default())
            .route("/health_check", web::get().to(health_check))
            .route("/login", web::post().to(login))
            .service(
                web::resource("/subscriptions")
                    .route(web::get().to(subscription_status))
                    .route(web::post().to(subscribe))
                    .route(web::delete().to(unsubscribe))
                    .wrap(from_fn(reject_anonymous_users)),
            )
            .service(
                web::resource("/preferences")
                    .route(web::put().to(update_preferences))
                    .wrap(from_fn(reject_anonymous_users)),
            )
            .service(
                web::resource("/webhooks/mailchimp/{secret}")
                    .route(web::get().to(verify_mailchimp_webhook))
                    .route(web::post().to(sync_mailchimp_webhook)),
            )
            .app_data(db_pool.clone())
            .app_data(mailchimp.clone())
            .app_data(state_machine.clone())
    })
    .listen(listener)?
    .run();
    Ok(server)
}
