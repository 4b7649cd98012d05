//! PIM role eligibility for Entra ID directory roles
//!
//! Required permissions:
//! - RoleEligibilitySchedule.Read.Directory
//! - Directory.Read.All (principal and role definition lookups)

use crate::error::Result;
use crate::graph::GraphClient;
use crate::graph::query::{CollectionQuery, path_key};
use crate::report::cache::Resolver;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleEligibilityInstance {
    pub id: String,
    pub principal_id: Option<String>,
    pub role_definition_id: Option<String>,
    pub directory_scope_id: Option<String>,
    pub member_type: Option<String>,
    pub start_date_time: Option<DateTime<Utc>>,
    pub end_date_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DirectoryObject {
    #[serde(rename = "@odata.type")]
    odata_type: Option<String>,
    display_name: Option<String>,
    user_principal_name: Option<String>,
    mail: Option<String>,
    app_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RoleDefinition {
    display_name: Option<String>,
}

pub fn eligibility_query(page_size: u32) -> CollectionQuery {
    CollectionQuery::new("roleManagement/directory/roleEligibilityScheduleInstances")
        .page_size(page_size)
}

pub async fn list_eligibility_instances(
    client: &GraphClient,
    page_size: u32,
) -> Result<Vec<RoleEligibilityInstance>> {
    client.get_all_pages(&eligibility_query(page_size)).await
}

/// A user, group or service principal holding an eligibility
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub display_name: String,
    /// UPN for users, mail for groups, appId for service principals
    pub name: String,
    pub kind: String,
    pub resolved: bool,
}

/// `#microsoft.graph.servicePrincipal` → `servicePrincipal`
fn object_kind(odata_type: Option<&str>) -> String {
    odata_type
        .and_then(|t| t.rsplit('.').next())
        .filter(|t| !t.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

/// Principal object id → display name, sign-in name and object type
pub struct PrincipalResolver<'a> {
    client: &'a GraphClient,
}

impl<'a> PrincipalResolver<'a> {
    pub fn new(client: &'a GraphClient) -> Self {
        Self { client }
    }
}

impl Resolver for PrincipalResolver<'_> {
    type Value = Principal;
    const NAME: &'static str = "principal";

    async fn fetch(&self, key: &str) -> Result<Principal> {
        let object: DirectoryObject = self
            .client
            .get(&format!("directoryObjects/{}", path_key(key)))
            .await?;

        Ok(Principal {
            display_name: object.display_name.clone().unwrap_or_else(|| key.to_string()),
            name: object
                .user_principal_name
                .or(object.mail)
                .or(object.app_id)
                .unwrap_or_default(),
            kind: object_kind(object.odata_type.as_deref()),
            resolved: true,
        })
    }

    fn placeholder(&self, key: &str) -> Principal {
        Principal {
            display_name: key.to_string(),
            name: key.to_string(),
            kind: "unknown".to_string(),
            resolved: false,
        }
    }
}

/// Role definition id → role display name
pub struct RoleNameResolver<'a> {
    client: &'a GraphClient,
}

impl<'a> RoleNameResolver<'a> {
    pub fn new(client: &'a GraphClient) -> Self {
        Self { client }
    }
}

impl Resolver for RoleNameResolver<'_> {
    type Value = String;
    const NAME: &'static str = "role-definition";

    async fn fetch(&self, key: &str) -> Result<String> {
        let definition: RoleDefinition = self
            .client
            .get(&format!("roleManagement/directory/roleDefinitions/{}", path_key(key)))
            .await?;
        Ok(definition.display_name.unwrap_or_else(|| key.to_string()))
    }

    fn placeholder(&self, key: &str) -> String {
        key.to_string()
    }

    fn normalize(&self, key: &str) -> String {
        key.to_lowercase()
    }
}
