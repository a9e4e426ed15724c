//! tests/api/helpers.rs

use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHasher, Version};
use newsletter_sync::configurations::{
    get_configuration, DatabaseSettings, MailchimpSettings, Settings,
};
use newsletter_sync::domain::{ListId, ServerPrefix, SubscriberEmail, WebhookSecret};
use newsletter_sync::integration_settings::{get_webhook_secret, set_webhook_secret};
use newsletter_sync::startup::{get_connection_pool, Application};
use newsletter_sync::sync_worker::{try_execute_task, ExecutionOutcome, WorkerContext};
use newsletter_sync::task_queue::{enqueue_task, SyncTask};
use newsletter_sync::telemetry::{get_subscriber, init_subscriber};
use once_cell::sync::Lazy;
use secrecy::Secret;
use sqlx::types::Json;
use sqlx::{Connection, Executor, PgConnection, PgPool};
use uuid::Uuid;
use wiremock::MockServer;

static TRACING: Lazy<()> = Lazy::new(|| {
    let default_filter_level = "info".to_string();
    let subscriber_name = "test".to_string();
    if std::env::var("TEST_LOG").is_ok() {
        let subscriber = get_subscriber(subscriber_name, default_filter_level, std::io::stdout);
        init_subscriber(subscriber);
    } else {
        let subscriber = get_subscriber(subscriber_name, default_filter_level, std::io::sink);
        init_subscriber(subscriber);
    };
});

pub const TEST_BASE_URL: &str = "http://test.localhost";
pub const TEST_LIST_ID: &str = "mailchimplistid";

pub struct TestUser {
    pub user_id: Uuid,
    pub username: String,
    pub name: Option<String>,
    pub email: String,
    pub password: String,
}

impl TestUser {
    pub fn generate() -> Self {
        let user_id = Uuid::new_v4();
        Self {
            user_id,
            username: Uuid::new_v4().to_string(),
            name: Some("Ursula Le Guin".to_string()),
            email: format!("ursula-{}@example.com", user_id.simple()),
            password: Uuid::new_v4().to_string(),
        }
    }

    pub async fn store(&self, pool: &PgPool) {
        let salt = SaltString::generate(&mut rand::thread_rng());
        let password_hash = Argon2::new(
            Algorithm::Argon2id,
            Version::V0x13,
            Params::new(15000, 2, 1, None).unwrap(),
        )
        .hash_password(self.password.as_bytes(), &salt)
        .unwrap()
        .to_string();
        sqlx::query(
            "INSERT INTO users (user_id, username, name, email, password_hash)
            VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(self.user_id)
        .bind(&self.username)
        .bind(&self.name)
        .bind(&self.email)
        .bind(password_hash)
        .execute(pool)
        .await
        .expect("Failed to store test user.");
    }

    pub fn email_fingerprint(&self) -> String {
        SubscriberEmail::parse(self.email.clone())
            .unwrap()
            .fingerprint()
    }
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub db_pool: PgPool,
    pub provider_server: MockServer,
    pub test_user: TestUser,
    pub api_client: reqwest::Client,
    pub configuration: Settings,
}

impl TestApp {
    pub async fn post_login(&self, username: &str, password: &str) -> reqwest::Response {
        self.api_client
            .post(&format!("{}/login", &self.address))
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn login_test_user(&self) {
        let response = self
            .post_login(&self.test_user.username, &self.test_user.password)
            .await;
        assert_eq!(response.status().as_u16(), 200);
    }

    pub async fn post_subscriptions(&self) -> reqwest::Response {
        self.api_client
            .post(&format!("{}/subscriptions", &self.address))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn delete_subscriptions(&self) -> reqwest::Response {
        self.api_client
            .delete(&format!("{}/subscriptions", &self.address))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get_subscriptions(&self) -> reqwest::Response {
        self.api_client
            .get(&format!("{}/subscriptions", &self.address))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn put_preferences(&self, subscribe_global_newsletter: &str) -> reqwest::Response {
        self.put_preferences_form(&[("subscribe_global_newsletter", subscribe_global_newsletter)])
            .await
    }

    pub async fn put_preferences_form(&self, form: &[(&str, &str)]) -> reqwest::Response {
        self.api_client
            .put(&format!("{}/preferences", &self.address))
            .form(form)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get_mailchimp_webhook(&self, secret: &str) -> reqwest::Response {
        self.api_client
            .get(&format!("{}/webhooks/mailchimp/{}", &self.address, secret))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn post_mailchimp_webhook(&self, secret: &str, body: String) -> reqwest::Response {
        self.api_client
            .post(&format!("{}/webhooks/mailchimp/{}", &self.address, secret))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// Stores a fresh webhook secret, as a completed webhook setup would.
    pub async fn install_webhook_secret(&self) -> WebhookSecret {
        let secret = WebhookSecret::generate();
        set_webhook_secret(&self.db_pool, Some(&secret))
            .await
            .unwrap();
        secret
    }

    pub async fn webhook_secret(&self) -> Option<WebhookSecret> {
        get_webhook_secret(&self.db_pool).await.unwrap()
    }

    pub async fn insert_subscription(&self, user_id: Uuid, active: bool) {
        sqlx::query("INSERT INTO list_subscriptions (user_id, list_id, active) VALUES ($1, $2, $3)")
            .bind(user_id)
            .bind(ListId::GLOBAL.as_i32())
            .bind(active)
            .execute(&self.db_pool)
            .await
            .expect("Failed to insert subscription.");
    }

    pub async fn overwrite_subscription(&self, user_id: Uuid, active: bool) {
        sqlx::query("UPDATE list_subscriptions SET active = $3 WHERE user_id = $1 AND list_id = $2")
            .bind(user_id)
            .bind(ListId::GLOBAL.as_i32())
            .bind(active)
            .execute(&self.db_pool)
            .await
            .expect("Failed to update subscription.");
    }

    /// `active` of the global-list row, `None` when there is no row.
    pub async fn subscription_state(&self, user_id: Uuid) -> Option<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT active FROM list_subscriptions WHERE user_id = $1 AND list_id = $2",
        )
        .bind(user_id)
        .bind(ListId::GLOBAL.as_i32())
        .fetch_optional(&self.db_pool)
        .await
        .expect("Failed to fetch subscription.")
    }

    pub async fn subscription_count(&self) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT count(*) FROM list_subscriptions")
            .fetch_one(&self.db_pool)
            .await
            .expect("Failed to count subscriptions.")
    }

    /// Subscription sync tasks waiting in the queue for `user_id`.
    pub async fn queued_sync_tasks(&self, user_id: Uuid) -> Vec<SyncTask> {
        sqlx::query_scalar::<_, Json<SyncTask>>(
            "SELECT payload FROM sync_tasks
            WHERE kind = 'subscription_sync' AND payload->>'user_id' = $1
            ORDER BY created_at",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.db_pool)
        .await
        .expect("Failed to fetch queued tasks.")
        .into_iter()
        .map(|payload| payload.0)
        .collect()
    }

    pub async fn queued_task_count(&self, kind: &str) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT count(*) FROM sync_tasks WHERE kind = $1")
            .bind(kind)
            .fetch_one(&self.db_pool)
            .await
            .expect("Failed to count queued tasks.")
    }

    pub async fn rate_limit_event_count(&self) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT count(*) FROM rate_limit_events")
            .fetch_one(&self.db_pool)
            .await
            .expect("Failed to count rate limit events.")
    }

    pub async fn enqueue(&self, task: SyncTask) {
        let mut transaction = self.db_pool.begin().await.unwrap();
        enqueue_task(&mut transaction, &task).await.unwrap();
        transaction.commit().await.unwrap();
    }

    pub fn worker_context(&self) -> WorkerContext {
        WorkerContext::build(
            self.db_pool.clone(),
            self.configuration.mailchimp.clone(),
            &self.configuration.worker,
            &self.configuration.rate_limits,
            self.configuration.application.base_url.clone(),
        )
        .unwrap()
    }

    /// Runs every due task once; failed tasks are pushed into the future.
    pub async fn dispatch_all_pending_tasks(&self) {
        let context = self.worker_context();
        dispatch_all_pending_tasks_with(&context).await;
    }
}

pub async fn dispatch_all_pending_tasks_with(context: &WorkerContext) {
    loop {
        if let ExecutionOutcome::EmptyQueue = try_execute_task(context).await.unwrap() {
            break;
        }
    }
}

pub fn configured_mailchimp_settings(provider_uri: String) -> MailchimpSettings {
    MailchimpSettings {
        enabled: true,
        api_key: Secret::new("somemailchimpapikey".to_string()),
        list_id: TEST_LIST_ID.to_string(),
        server_prefix: ServerPrefix::parse("us14".to_string()).unwrap(),
        api_base_url: Some(provider_uri),
        timeout_milliseconds: 2000,
    }
}

pub fn webhook_event(event_type: &str, email: &str) -> String {
    serde_urlencoded::to_string([("type", event_type), ("data[email]", email)]).unwrap()
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(customize: impl FnOnce(&mut Settings)) -> TestApp {
    Lazy::force(&TRACING);

    let provider_server = MockServer::start().await;

    let configuration = {
        let mut c = get_configuration().expect("Failed to read configuration.");
        c.database.database_name = Uuid::new_v4().to_string();
        c.application.port = 0;
        c.application.base_url = TEST_BASE_URL.to_string();
        c.mailchimp = configured_mailchimp_settings(provider_server.uri());
        customize(&mut c);
        c
    };

    configure_database(&configuration.database).await;

    let application = Application::build(configuration.clone())
        .await
        .expect("Failed to build application.");
    let application_port = application.port();
    let _ = tokio::spawn(application.run_until_stopped());

    let api_client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .cookie_store(true)
        .build()
        .unwrap();

    let test_app = TestApp {
        address: format!("http://127.0.0.1:{}", application_port),
        port: application_port,
        db_pool: get_connection_pool(&configuration.database),
        provider_server,
        test_user: TestUser::generate(),
        api_client,
        configuration,
    };
    test_app.test_user.store(&test_app.db_pool).await;
    test_app
}

async fn configure_database(config: &DatabaseSettings) -> PgPool {
    let mut connection = PgConnection::connect_with(&config.without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(format!(r#"CREATE DATABASE "{}";"#, config.database_name).as_str())
        .await
        .expect("Failed to create database.");

    let connection_pool = PgPool::connect_with(config.with_db())
        .await
        .expect("Failed to connect to Postgres.");
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .expect("Failed to migrate the database");
    connection_pool
}
