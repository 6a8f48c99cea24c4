//! Typed REST surface for the research-group board.

use crate::client::services::api_client::{ApiClient, Result};
use crate::common::models::{ChatMessage, Invitation, MemberRole, ResearchGroup, User};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct GroupCreate<'a> {
    pub name: &'a str,
    pub topic: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
}

/// Partial update; only set fields are sent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Clone)]
pub struct GroupsService {
    api: ApiClient,
}

impl GroupsService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn list(&self) -> Result<Vec<ResearchGroup>> {
        self.api.get("/research-groups/").await
    }

    pub async fn get(&self, group_id: &str) -> Result<ResearchGroup> {
        self.api.get(&format!("/research-groups/{group_id}")).await
    }

    /// Message history in chronological order.
    pub async fn messages(&self, group_id: &str) -> Result<Vec<ChatMessage>> {
        self.api
            .get(&format!("/research-groups/{group_id}/messages"))
            .await
    }

    /// Read receipt for the whole group. Callers treat this as best-effort.
    pub async fn mark_read(&self, group_id: &str) -> Result<()> {
        self.api
            .post_unit(&format!("/research-groups/{group_id}/read"))
            .await
    }

    /// Invite by email; the backend expects the address as a query parameter.
    pub async fn invite(&self, group_id: &str, email: &str) -> Result<Invitation> {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("email", email)
            .finish();
        self.api
            .post_no_body(&format!("/research-groups/{group_id}/invite?{query}"))
            .await
    }

    /// Accept an invitation by its token.
    pub async fn join(&self, invite_token: &str) -> Result<ResearchGroup> {
        self.api
            .post_no_body(&format!("/research-groups/join/{invite_token}"))
            .await
    }

    pub async fn update_member_role(
        &self,
        group_id: &str,
        user_id: &str,
        role: MemberRole,
    ) -> Result<ResearchGroup> {
        self.api
            .put_no_body(&format!(
                "/research-groups/{group_id}/members/{user_id}/role?role={}",
                role.as_str()
            ))
            .await
    }

    pub async fn remove_member(&self, group_id: &str, user_id: &str) -> Result<ResearchGroup> {
        self.api
            .delete(&format!("/research-groups/{group_id}/members/{user_id}"))
            .await
    }

    pub async fn create(&self, group: &GroupCreate<'_>) -> Result<ResearchGroup> {
        self.api.post("/research-groups/", group).await
    }

    pub async fn update(&self, group_id: &str, fields: &GroupUpdate) -> Result<ResearchGroup> {
        self.api
            .put(&format!("/research-groups/{group_id}"), fields)
            .await
    }
}

/// A user may mutate membership/settings iff they created the group or hold
/// the admin member role. The system-wide role carries no weight here.
pub fn is_group_admin(group: &ResearchGroup, user: &User) -> bool {
    if group.created_by == user.id {
        return true;
    }
    group
        .members
        .iter()
        .any(|m| m.user_id == user.id && m.role == MemberRole::Admin)
}
