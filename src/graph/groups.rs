//! Groups and group membership
//!
//! Required permissions:
//! - GroupMember.ReadWrite.All - read and change membership
//! - User.Read.All - resolve members by UPN

use crate::error::{ReportError, Result};
use crate::graph::query::{CollectionQuery, odata_string, path_key};
use crate::graph::{GraphClient, PaginatedResponse};
use crate::report::cache::Resolver;
use serde::{Deserialize, Serialize};
use serde_json::json;

const GROUP_SELECT: &[&str] = &["id", "displayName", "mail"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Group {
    pub id: String,
    pub display_name: Option<String>,
    pub mail: Option<String>,
}

impl Group {
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Member {
    pub id: String,
    pub user_principal_name: Option<String>,
}

/// Directory object ids are GUIDs; anything else is treated as a display name
fn is_object_id(identity: &str) -> bool {
    identity.len() == 36
        && identity
            .chars()
            .enumerate()
            .all(|(i, c)| match i {
                8 | 13 | 18 | 23 => c == '-',
                _ => c.is_ascii_hexdigit(),
            })
}

/// Look up a group by object id or exact display name
///
/// A display name shared by several groups is rejected; pass the id instead.
pub async fn get_group(client: &GraphClient, identity: &str) -> Result<Group> {
    if is_object_id(identity) {
        let endpoint = CollectionQuery::new(format!("groups/{}", path_key(identity)))
            .select(GROUP_SELECT)
            .to_endpoint();
        return match client.get::<Group>(&endpoint).await {
            Ok(group) => Ok(group),
            Err(e) if e.is_not_found() => Err(ReportError::TargetNotFound(format!(
                "group '{}' not found",
                identity
            ))),
            Err(e) => Err(e),
        };
    }

    let query = CollectionQuery::new("groups")
        .filter(format!("displayName eq {}", odata_string(identity)))
        .select(GROUP_SELECT);
    let page: PaginatedResponse<Group> = client.get(&query.to_endpoint()).await?;

    let mut groups = page.value.into_iter();
    match (groups.next(), groups.next()) {
        (Some(group), None) => Ok(group),
        (None, _) => Err(ReportError::TargetNotFound(format!(
            "group '{}' not found",
            identity
        ))),
        (Some(_), Some(_)) => Err(ReportError::InvalidArgument(format!(
            "more than one group is named '{}'; pass its object id",
            identity
        ))),
    }
}

/// Direct members of a group
pub async fn list_members(client: &GraphClient, group_id: &str, page_size: u32) -> Result<Vec<Member>> {
    let query = CollectionQuery::new(format!("groups/{}/members", path_key(group_id)))
        .select(&["id", "userPrincipalName"])
        .page_size(page_size);
    client.get_all_pages(&query).await
}

pub async fn add_member(client: &GraphClient, group_id: &str, user_id: &str) -> Result<()> {
    let body = json!({ "@odata.id": client.directory_object_ref(user_id) });
    client
        .post_no_content(&format!("groups/{}/members/$ref", path_key(group_id)), &body)
        .await
}

pub async fn remove_member(client: &GraphClient, group_id: &str, user_id: &str) -> Result<()> {
    client
        .delete(&format!(
            "groups/{}/members/{}/$ref",
            path_key(group_id),
            path_key(user_id)
        ))
        .await
}

/// A user resolved from its UPN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRef {
    pub id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UserObject {
    id: String,
    display_name: Option<String>,
}

/// UPN → user object id; `None` when the user does not exist
pub struct UserResolver<'a> {
    client: &'a GraphClient,
}

impl<'a> UserResolver<'a> {
    pub fn new(client: &'a GraphClient) -> Self {
        Self { client }
    }
}

impl Resolver for UserResolver<'_> {
    type Value = Option<UserRef>;
    const NAME: &'static str = "user";

    async fn fetch(&self, key: &str) -> Result<Option<UserRef>> {
        let query = CollectionQuery::new("users")
            .filter(format!("userPrincipalName eq {}", odata_string(key)))
            .select(&["id", "displayName"]);
        let page: PaginatedResponse<UserObject> = self.client.get(&query.to_endpoint()).await?;

        Ok(page.value.into_iter().next().map(|user| UserRef {
            id: user.id,
            display_name: user.display_name,
        }))
    }

    fn placeholder(&self, _key: &str) -> Option<UserRef> {
        None
    }

    fn normalize(&self, key: &str) -> String {
        key.trim().to_lowercase()
    }
}
