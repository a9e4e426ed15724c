//! src/providers/mailchimp.rs

use super::ListMember;
use crate::mailchimp_client::{MailchimpClient, ProviderError};
use reqwest::Method;

pub struct MailchimpSyncer {
    client: MailchimpClient,
    list_id: String,
}

#[derive(serde::Serialize)]
struct ListMemberRequest<'a> {
    status: &'a str,
    email_address: &'a str,
    merge_fields: MergeFields<'a>,
}

#[derive(serde::Serialize)]
struct MergeFields<'a> {
    #[serde(rename = "FNAME")]
    fname: &'a str,
}

impl MailchimpSyncer {
    pub fn new(client: MailchimpClient, list_id: String) -> Self {
        Self { client, list_id }
    }

    pub async fn subscribe(&self, member: &ListMember) -> Result<(), ProviderError> {
        self.add_or_update_list_member(member, "subscribed").await
    }

    pub async fn unsubscribe(&self, member: &ListMember) -> Result<(), ProviderError> {
        self.add_or_update_list_member(member, "unsubscribed").await
    }

    // https://mailchimp.com/developer/marketing/api/list-members/add-or-update-list-member/
    #[tracing::instrument(name = "Add or update Mailchimp list member", skip(self, member))]
    async fn add_or_update_list_member(
        &self,
        member: &ListMember,
        status: &str,
    ) -> Result<(), ProviderError> {
        let path = format!(
            "3.0/lists/{}/members/{}",
            self.list_id,
            member.email.fingerprint()
        );
        let body = ListMemberRequest {
            status,
            email_address: member.email.as_ref(),
            merge_fields: MergeFields {
                fname: &member.display_name,
            },
        };
        self.client
            .request(Method::PUT, &path, Some(&body))
            .await?
            .error_for_status()?;
        Ok(())
    }
}
