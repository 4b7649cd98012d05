//! Authentication method registration (reports/authenticationMethods)
//!
//! Requires AuditLog.Read.All or UserAuthenticationMethod.Read.All.

use crate::error::Result;
use crate::graph::GraphClient;
use crate::graph::query::{CollectionQuery, odata_string};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserRegistrationDetails {
    pub id: String,
    pub user_principal_name: Option<String>,
    pub user_display_name: Option<String>,
    pub is_admin: Option<bool>,
    pub is_mfa_registered: Option<bool>,
    pub is_mfa_capable: Option<bool>,
    pub is_passwordless_capable: Option<bool>,
    pub default_mfa_method: Option<String>,
    pub methods_registered: Vec<String>,
    pub last_updated_date_time: Option<DateTime<Utc>>,
}

pub fn registration_query(page_size: u32, user: Option<&str>) -> CollectionQuery {
    let query = CollectionQuery::new("reports/authenticationMethods/userRegistrationDetails")
        .page_size(page_size);

    match user {
        Some(upn) => query.filter(format!("userPrincipalName eq {}", odata_string(upn))),
        None => query,
    }
}

pub async fn list_registration_details(
    client: &GraphClient,
    query: &CollectionQuery,
    on_page: impl FnMut(usize),
) -> Result<Vec<UserRegistrationDetails>> {
    client.get_all_pages_observed(query, on_page).await
}
