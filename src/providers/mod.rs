//! src/providers/mod.rs
//!
//! Mailing-list providers the local subscription state is pushed to. Each
//! provider is one variant; callers only see `subscribe`/`unsubscribe`.

mod mailchimp;

pub use mailchimp::MailchimpSyncer;

use crate::configurations::MailchimpSettings;
use crate::domain::SubscriberEmail;
use crate::mailchimp_client::{MailchimpClient, ProviderError};
use crate::users::User;

/// What a provider needs to know about a local user.
#[derive(Debug, Clone)]
pub struct ListMember {
    pub email: SubscriberEmail,
    pub display_name: String,
}

impl TryFrom<&User> for ListMember {
    type Error = String;

    fn try_from(user: &User) -> Result<Self, Self::Error> {
        Ok(Self {
            email: SubscriberEmail::parse(user.email.clone())?,
            display_name: user.display_name().to_string(),
        })
    }
}

pub enum ListProvider {
    Mailchimp(MailchimpSyncer),
}

impl ListProvider {
    /// `None` when the integration is not fully configured.
    pub fn from_settings(settings: &MailchimpSettings) -> Result<Option<Self>, anyhow::Error> {
        Ok(MailchimpClient::from_settings(settings)?.map(|client| {
            ListProvider::Mailchimp(MailchimpSyncer::new(client, settings.list_id.clone()))
        }))
    }

    pub async fn subscribe(&self, member: &ListMember) -> Result<(), ProviderError> {
        match self {
            ListProvider::Mailchimp(syncer) => syncer.subscribe(member).await,
        }
    }

    pub async fn unsubscribe(&self, member: &ListMember) -> Result<(), ProviderError> {
        match self {
            ListProvider::Mailchimp(syncer) => syncer.unsubscribe(member).await,
        }
    }
}
