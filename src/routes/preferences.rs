//! src/routes/preferences.rs
//!
//! The e-mail preferences form carries the newsletter opt-in alongside the
//! host's own fields; only that one field is handled here.

use crate::authentication::UserId;
use crate::configurations::MailchimpSettings;
use crate::domain::ListId;
use crate::routes::{success_json, SubscriptionError};
use crate::subscription_state::SubscriptionStateMachine;
use actix_web::{web, HttpResponse};
use sqlx::PgPool;

#[derive(serde::Deserialize)]
pub struct PreferencesForm {
    subscribe_global_newsletter: Option<String>,
}

/// An absent or empty field leaves the subscription alone; any value other
/// than `"true"` opts out.
fn parse_opt_in(value: Option<&str>) -> Option<bool> {
    match value {
        None | Some("") => None,
        Some(value) => Some(value == "true"),
    }
}

#[tracing::instrument(
    name = "Updating e-mail preferences",
    skip(form, user_id, pool, settings, state_machine),
    fields(user_id = %*user_id)
)]
pub async fn update_preferences(
    form: web::Form<PreferencesForm>,
    user_id: web::ReqData<UserId>,
    pool: web::Data<PgPool>,
    settings: web::Data<MailchimpSettings>,
    state_machine: web::Data<SubscriptionStateMachine>,
) -> Result<HttpResponse, SubscriptionError> {
    if !settings.is_configured() {
        return Ok(success_json());
    }
    let user_id = user_id.into_inner();
    match parse_opt_in(form.0.subscribe_global_newsletter.as_deref()) {
        Some(true) => {
            state_machine
                .subscribe(&pool, *user_id, ListId::GLOBAL)
                .await?;
        }
        Some(false) => {
            state_machine
                .unsubscribe(&pool, *user_id, ListId::GLOBAL)
                .await?;
        }
        None => {}
    }
    Ok(success_json())
}
