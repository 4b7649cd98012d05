use crate::config::{ConfigManager, TenantConfig, TokenCache};
use crate::error::{ReportError, Result};
use colored::Colorize;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, DeviceAuthorizationUrl, EmptyExtraDeviceAuthorizationFields,
    Scope, TokenResponse, TokenUrl, basic::BasicClient, basic::BasicTokenResponse,
    reqwest::async_http_client,
};
use std::time::Duration;

const MICROSOFT_AUTHORITY: &str = "https://login.microsoftonline.com";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Read permissions the app registration needs for every report
pub const REQUIRED_SCOPES: &[&str] = &[
    "DeviceManagementManagedDevices.Read.All",
    "AuditLog.Read.All",
    "MailboxSettings.Read",
    "Calendars.Read",
    "User.Read.All",
    "Directory.Read.All",
    "RoleEligibilitySchedule.Read.Directory",
    "UserAuthenticationMethod.Read.All",
    "GroupMember.ReadWrite.All",
];

pub struct GraphAuth {
    config_manager: ConfigManager,
}

impl GraphAuth {
    pub fn new(config_manager: ConfigManager) -> Self {
        Self { config_manager }
    }

    fn endpoints(tenant_id: &str) -> Result<(AuthUrl, TokenUrl)> {
        let auth_url = AuthUrl::new(format!(
            "{}/{}/oauth2/v2.0/authorize",
            MICROSOFT_AUTHORITY, tenant_id
        ))
        .map_err(|e| ReportError::AuthError(format!("Invalid auth URL: {}", e)))?;

        let token_url = TokenUrl::new(format!(
            "{}/{}/oauth2/v2.0/token",
            MICROSOFT_AUTHORITY, tenant_id
        ))
        .map_err(|e| ReportError::AuthError(format!("Invalid token URL: {}", e)))?;

        Ok((auth_url, token_url))
    }

    /// Authenticate using device code flow (interactive)
    pub async fn login_device_code(&self, tenant_config: &TenantConfig) -> Result<TokenCache> {
        println!(
            "{} Starting device code authentication for tenant '{}'...",
            "→".cyan(),
            tenant_config.name
        );

        let tenant_id = &tenant_config.tenant_id;
        let (auth_url, token_url) = Self::endpoints(tenant_id)?;

        let device_auth_url = DeviceAuthorizationUrl::new(format!(
            "{}/{}/oauth2/v2.0/devicecode",
            MICROSOFT_AUTHORITY, tenant_id
        ))
        .map_err(|e| ReportError::AuthError(format!("Invalid device auth URL: {}", e)))?;

        let client = BasicClient::new(
            ClientId::new(tenant_config.client_id.clone()),
            None,
            auth_url,
            Some(token_url),
        )
        .set_device_authorization_url(device_auth_url);

        let details: oauth2::DeviceAuthorizationResponse<EmptyExtraDeviceAuthorizationFields> =
            client
                .exchange_device_code()
                .map_err(|e| ReportError::AuthError(format!("Device code exchange failed: {}", e)))?
                .add_scope(Scope::new(GRAPH_SCOPE.to_string()))
                .request_async(async_http_client)
                .await
                .map_err(|e| {
                    ReportError::AuthError(format!("Device authorization request failed: {}", e))
                })?;

        println!("\nPlease visit: {}", details.verification_uri().as_str());
        println!("Enter code:   {}\n", details.user_code().secret().bold());

        let token = client
            .exchange_device_access_token(&details)
            .request_async(async_http_client, tokio::time::sleep, None)
            .await
            .map_err(|e| ReportError::AuthError(format!("Token exchange failed: {}", e)))?;

        let token_cache = Self::to_cache(&token, tenant_id, true);
        self.config_manager
            .save_token(&tenant_config.name, &token_cache)?;

        println!("{} Authentication successful", "✓".green());
        tracing::debug!(
            path = %self.config_manager.token_cache_file(&tenant_config.name).display(),
            "token cached"
        );

        Ok(token_cache)
    }

    /// Authenticate using client credentials flow (non-interactive)
    pub async fn login_client_credentials(
        &self,
        tenant_config: &TenantConfig,
    ) -> Result<TokenCache> {
        let client_secret = tenant_config.client_secret.as_ref().ok_or_else(|| {
            ReportError::AuthError("Client secret required for client credentials flow".into())
        })?;

        println!(
            "{} Authenticating with client credentials for tenant '{}'...",
            "→".cyan(),
            tenant_config.name
        );

        let tenant_id = &tenant_config.tenant_id;
        let (auth_url, token_url) = Self::endpoints(tenant_id)?;

        let client = BasicClient::new(
            ClientId::new(tenant_config.client_id.clone()),
            Some(ClientSecret::new(client_secret.clone())),
            auth_url,
            Some(token_url),
        );

        let token = client
            .exchange_client_credentials()
            .add_scope(Scope::new(GRAPH_SCOPE.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| {
                ReportError::AuthError(format!("Client credentials exchange failed: {}", e))
            })?;

        // Client credentials never carry a refresh token
        let token_cache = Self::to_cache(&token, tenant_id, false);
        self.config_manager
            .save_token(&tenant_config.name, &token_cache)?;

        println!("{} Authentication successful", "✓".green());

        Ok(token_cache)
    }

    fn to_cache(token: &BasicTokenResponse, tenant_id: &str, keep_refresh: bool) -> TokenCache {
        let lifetime = token.expires_in().unwrap_or(Duration::from_secs(3600));
        let expires_at = chrono::Utc::now()
            + chrono::Duration::from_std(lifetime).unwrap_or_else(|_| chrono::Duration::hours(1));

        TokenCache {
            access_token: token.access_token().secret().clone(),
            refresh_token: if keep_refresh {
                token.refresh_token().map(|t| t.secret().clone())
            } else {
                None
            },
            expires_at,
            tenant_id: tenant_id.to_string(),
        }
    }

    /// Get a valid access token from the cache
    pub async fn get_access_token(&self, tenant_name: &str) -> Result<String> {
        match self.config_manager.load_token(tenant_name) {
            Ok(token) => Ok(token.access_token),
            Err(ReportError::AuthError(_)) => Err(ReportError::TokenNotFound),
            Err(e) => Err(e),
        }
    }

    /// Logout (delete token cache)
    pub fn logout(&self, tenant_name: &str) -> Result<()> {
        self.config_manager.delete_token(tenant_name)?;
        println!("{} Logged out from tenant '{}'", "✓".green(), tenant_name);
        Ok(())
    }
}
