//! Mailboxes, inbox rules and calendar delegation
//!
//! Required permissions:
//! - User.Read.All - enumerate mailbox owners
//! - GroupMember.Read.All - resolve distribution and Microsoft 365 group addresses
//! - MailboxSettings.Read - inbox message rules
//! - Calendars.Read - calendar permissions

use crate::error::{ReportError, Result};
use crate::graph::query::{CollectionQuery, odata_string, path_key};
use crate::graph::{GraphClient, PaginatedResponse};
use crate::report::cache::Resolver;
use serde::{Deserialize, Serialize};

const USER_SELECT: &[&str] = &["id", "displayName", "userPrincipalName", "mail", "userType"];
const GROUP_SELECT: &[&str] = &["id", "displayName", "mail"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MailUser {
    pub id: String,
    pub display_name: Option<String>,
    pub user_principal_name: Option<String>,
    pub mail: Option<String>,
    pub user_type: Option<String>,
}

impl MailUser {
    /// Primary SMTP address, falling back to the UPN
    pub fn address(&self) -> String {
        self.mail
            .clone()
            .or_else(|| self.user_principal_name.clone())
            .unwrap_or_else(|| self.id.clone())
    }

    pub fn has_mailbox(&self) -> bool {
        self.mail.as_deref().is_some_and(|m| !m.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailAddress {
    pub name: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Recipient {
    pub email_address: Option<EmailAddress>,
}

impl Recipient {
    pub fn address(&self) -> Option<&str> {
        self.email_address
            .as_ref()
            .and_then(|e| e.address.as_deref())
            .filter(|a| !a.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageRuleActions {
    pub forward_to: Vec<Recipient>,
    pub redirect_to: Vec<Recipient>,
    pub forward_as_attachment_to: Vec<Recipient>,
    pub move_to_folder: Option<String>,
    pub delete: Option<bool>,
    pub permanent_delete: Option<bool>,
    pub stop_processing_rules: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageRule {
    pub id: String,
    pub display_name: Option<String>,
    pub sequence: Option<i32>,
    pub is_enabled: Option<bool>,
    pub has_error: Option<bool>,
    pub actions: Option<MessageRuleActions>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CalendarPermission {
    pub id: String,
    pub email_address: Option<EmailAddress>,
    pub is_removable: Option<bool>,
    pub is_inside_organization: Option<bool>,
    pub role: Option<String>,
    pub allowed_roles: Vec<String>,
}

impl CalendarPermission {
    /// Built-in entries ("My Organization", anonymous) that cannot be removed
    pub fn is_default_entry(&self) -> bool {
        self.is_removable == Some(false)
            || self
                .email_address
                .as_ref()
                .and_then(|e| e.address.as_deref())
                .is_none_or(str::is_empty)
    }
}

/// Every member user that has a mailbox
pub async fn list_mailboxes(client: &GraphClient, page_size: u32) -> Result<Vec<MailUser>> {
    let query = CollectionQuery::new("users")
        .filter("userType eq 'Member'")
        .select(USER_SELECT)
        .page_size(page_size);

    let users: Vec<MailUser> = client.get_all_pages(&query).await?;
    Ok(users.into_iter().filter(MailUser::has_mailbox).collect())
}

/// `$filter` matching an SMTP address against primary mail and proxy addresses
fn address_clause(address: &str) -> String {
    format!(
        "mail eq {} or proxyAddresses/any(p:p eq {})",
        odata_string(address),
        odata_string(&format!("smtp:{}", address))
    )
}

/// The user whose primary address, alias or UPN is `address`
///
/// `users/{key}` only accepts an object id or UPN, so addresses are matched
/// with a `$filter` instead.
pub async fn find_user_by_address(client: &GraphClient, address: &str) -> Result<Option<MailUser>> {
    let query = CollectionQuery::new("users")
        .filter(format!(
            "{} or userPrincipalName eq {}",
            address_clause(address),
            odata_string(address)
        ))
        .select(USER_SELECT);

    let page: PaginatedResponse<MailUser> = client.get(&query.to_endpoint()).await?;
    Ok(page.value.into_iter().next())
}

/// The mail-enabled group whose primary address or alias is `address`
pub async fn find_group_by_address(client: &GraphClient, address: &str) -> Result<Option<MailUser>> {
    let query = CollectionQuery::new("groups")
        .filter(address_clause(address))
        .select(GROUP_SELECT);

    let page: PaginatedResponse<MailUser> = client.get(&query.to_endpoint()).await?;
    Ok(page.value.into_iter().next())
}

/// Look up one mailbox by UPN, SMTP address or object id
pub async fn get_mailbox(client: &GraphClient, identity: &str) -> Result<MailUser> {
    let found = if identity.contains('@') {
        find_user_by_address(client, identity).await
    } else {
        let endpoint = CollectionQuery::new(format!("users/{}", path_key(identity)))
            .select(USER_SELECT)
            .to_endpoint();
        match client.get::<MailUser>(&endpoint).await {
            Ok(user) => Ok(Some(user)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    };

    match found? {
        Some(user) if user.has_mailbox() => Ok(user),
        Some(_) => Err(ReportError::TargetNotFound(format!(
            "'{}' exists but has no mailbox",
            identity
        ))),
        None => Err(ReportError::TargetNotFound(format!(
            "mailbox '{}' not found",
            identity
        ))),
    }
}

pub async fn list_inbox_rules(client: &GraphClient, user_id: &str) -> Result<Vec<MessageRule>> {
    let query = CollectionQuery::new(format!(
        "users/{}/mailFolders/inbox/messageRules",
        path_key(user_id)
    ));
    client.get_all_pages(&query).await
}

pub async fn list_calendar_permissions(
    client: &GraphClient,
    user_id: &str,
) -> Result<Vec<CalendarPermission>> {
    let query = CollectionQuery::new(format!(
        "users/{}/calendar/calendarPermissions",
        path_key(user_id)
    ));
    client.get_all_pages(&query).await
}

/// Display name and primary address of a mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxIdentity {
    pub display_name: String,
    pub primary_smtp: String,
    /// False when the lookup failed and the raw key is echoed
    pub resolved: bool,
}

/// SMTP address → mailbox identity
///
/// Users are matched on primary address, alias or UPN, then mail-enabled
/// groups. Addresses matching neither (external recipients, deleted users)
/// come back as the raw address with `resolved = false`.
pub struct MailboxResolver<'a> {
    client: &'a GraphClient,
}

impl<'a> MailboxResolver<'a> {
    pub fn new(client: &'a GraphClient) -> Self {
        Self { client }
    }
}

impl Resolver for MailboxResolver<'_> {
    type Value = MailboxIdentity;
    const NAME: &'static str = "mailbox";

    async fn fetch(&self, key: &str) -> Result<MailboxIdentity> {
        let found = match find_user_by_address(self.client, key).await? {
            Some(user) => Some(user),
            None => find_group_by_address(self.client, key).await?,
        };

        let Some(recipient) = found else {
            return Err(ReportError::TargetNotFound(format!(
                "'{}' is not a recipient in this tenant",
                key
            )));
        };

        Ok(MailboxIdentity {
            display_name: recipient.display_name.clone().unwrap_or_else(|| key.to_string()),
            primary_smtp: recipient.address(),
            resolved: true,
        })
    }

    fn placeholder(&self, key: &str) -> MailboxIdentity {
        MailboxIdentity {
            display_name: key.to_string(),
            primary_smtp: key.to_string(),
            resolved: false,
        }
    }

    fn normalize(&self, key: &str) -> String {
        key.trim().to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_with_forwarding_deserializes() {
        let rule: MessageRule = serde_json::from_str(
            r#"{
                "id": "r1",
                "displayName": "Forward invoices",
                "sequence": 2,
                "isEnabled": true,
                "actions": {
                    "forwardTo": [{"emailAddress": {"name": "Ext", "address": "ext@fabrikam.com"}}],
                    "stopProcessingRules": true
                }
            }"#,
        )
        .unwrap();
        let actions = rule.actions.unwrap();
        assert_eq!(actions.forward_to[0].address(), Some("ext@fabrikam.com"));
        assert!(actions.redirect_to.is_empty());
        assert_eq!(actions.stop_processing_rules, Some(true));
    }

    #[test]
    fn test_default_calendar_entries() {
        let org: CalendarPermission = serde_json::from_str(
            r#"{"id":"p1","emailAddress":{"name":"My Organization"},"isRemovable":false,"role":"freeBusyRead"}"#,
        )
        .unwrap();
        assert!(org.is_default_entry());

        let delegate: CalendarPermission = serde_json::from_str(
            r#"{"id":"p2","emailAddress":{"name":"Megan","address":"megan@contoso.com"},"isRemovable":true,"role":"write"}"#,
        )
        .unwrap();
        assert!(!delegate.is_default_entry());
    }

    #[test]
    fn test_address_clause_matches_aliases() {
        assert_eq!(
            address_clause("o'neil@contoso.com"),
            "mail eq 'o''neil@contoso.com' or proxyAddresses/any(p:p eq 'smtp:o''neil@contoso.com')"
        );
    }

    #[test]
    fn test_mail_user_address_fallback() {
        let user = MailUser {
            id: "u1".into(),
            user_principal_name: Some("adele@contoso.com".into()),
            ..Default::default()
        };
        assert_eq!(user.address(), "adele@contoso.com");
        assert!(!user.has_mailbox());
    }
}
