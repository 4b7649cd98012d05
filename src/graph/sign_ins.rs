//! Entra ID sign-in logs (auditLogs/signIns)
//!
//! Requires Entra ID P1/P2 and AuditLog.Read.All + Directory.Read.All.

use crate::error::Result;
use crate::graph::GraphClient;
use crate::graph::query::{CollectionQuery, odata_string};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignInLog {
    pub id: String,
    pub created_date_time: Option<DateTime<Utc>>,
    pub user_display_name: Option<String>,
    pub user_principal_name: Option<String>,
    pub user_id: Option<String>,
    pub app_display_name: Option<String>,
    pub app_id: Option<String>,
    pub ip_address: Option<String>,
    pub client_app_used: Option<String>,
    pub conditional_access_status: Option<String>,
    pub is_interactive: Option<bool>,
    pub risk_level_during_sign_in: Option<String>,
    pub resource_display_name: Option<String>,
    pub status: Option<SignInStatus>,
    pub device_detail: Option<DeviceDetail>,
    pub location: Option<SignInLocation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignInStatus {
    pub error_code: Option<i32>,
    pub failure_reason: Option<String>,
    pub additional_details: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceDetail {
    pub device_id: Option<String>,
    pub display_name: Option<String>,
    pub operating_system: Option<String>,
    pub browser: Option<String>,
    pub is_compliant: Option<bool>,
    pub is_managed: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignInLocation {
    pub city: Option<String>,
    pub state: Option<String>,
    pub country_or_region: Option<String>,
}

/// Server-side narrowing of the sign-in query
#[derive(Debug, Clone)]
pub struct SignInFilter {
    /// Lower bound on createdDateTime
    pub since: DateTime<Utc>,
    /// Exact userPrincipalName
    pub user: Option<String>,
    /// Exact appDisplayName
    pub app: Option<String>,
    pub failures_only: bool,
}

impl SignInFilter {
    pub fn to_query(&self, page_size: u32) -> CollectionQuery {
        let mut query = CollectionQuery::new("auditLogs/signIns").filter(format!(
            "createdDateTime ge {}",
            self.since.format("%Y-%m-%dT%H:%M:%SZ")
        ));

        if let Some(user) = &self.user {
            query = query.filter(format!("userPrincipalName eq {}", odata_string(user)));
        }

        if let Some(app) = &self.app {
            query = query.filter(format!("appDisplayName eq {}", odata_string(app)));
        }

        if self.failures_only {
            query = query.filter("status/errorCode ne 0");
        }

        query.order_by("createdDateTime desc").page_size(page_size)
    }
}

pub async fn get_sign_in_logs(
    client: &GraphClient,
    query: &CollectionQuery,
    on_page: impl FnMut(usize),
) -> Result<Vec<SignInLog>> {
    client.get_all_pages_observed(query, on_page).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn filter() -> SignInFilter {
        SignInFilter {
            since: Utc.with_ymd_and_hms(2026, 10, 15, 8, 0, 0).unwrap(),
            user: None,
            app: None,
            failures_only: false,
        }
    }

    #[test]
    fn test_sign_in_filter_lookback_only() {
        let endpoint = filter().to_query(500).to_endpoint();
        assert_eq!(
            endpoint,
            "auditLogs/signIns?$filter=createdDateTime ge 2026-10-15T08:00:00Z&$orderby=createdDateTime desc&$top=500"
        );
    }

    #[test]
    fn test_sign_in_filter_all_clauses() {
        let f = SignInFilter {
            user: Some("adele@contoso.com".into()),
            app: Some("Office 365 Exchange Online".into()),
            failures_only: true,
            ..filter()
        };
        let endpoint = f.to_query(999).to_endpoint();
        assert!(endpoint.contains("userPrincipalName eq 'adele@contoso.com'"));
        assert!(endpoint.contains("appDisplayName eq 'Office 365 Exchange Online'"));
        assert!(endpoint.contains("status/errorCode ne 0"));
    }

    #[test]
    fn test_sparse_sign_in_deserializes() {
        let log: SignInLog = serde_json::from_str(
            r#"{"id":"s1","createdDateTime":"2026-10-15T09:12:44Z","status":{"errorCode":50126},"location":null}"#,
        )
        .unwrap();
        assert_eq!(log.status.unwrap().error_code, Some(50126));
        assert!(log.location.is_none());
        assert!(log.device_detail.is_none());
    }
}
