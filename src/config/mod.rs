use crate::error::{ReportError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment override for the configuration directory
pub const CONFIG_DIR_ENV: &str = "M365REPORT_CONFIG_DIR";

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub current_tenant: Option<String>,

    #[serde(default)]
    pub log_level: String,

    #[serde(default)]
    pub reports: ReportsConfig,
}

/// Defaults applied to every report unless overridden on the command line
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ReportsConfig {
    /// Directory for generated CSV files (relative paths resolve against the working dir)
    pub output_dir: PathBuf,
    pub delimiter: char,
    pub preview_rows: usize,
    /// `$top` requested on every collection query
    pub page_size: u32,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            delimiter: ',',
            preview_rows: 0,
            page_size: 999,
        }
    }
}

/// Tenant-specific configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TenantConfig {
    pub name: String,
    pub tenant_id: String,
    pub client_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(default)]
    pub auth_type: AuthType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    DeviceCode,
    ClientCredentials,
}

/// Token cache structure
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenCache {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub tenant_id: String,
}

/// Configuration manager
#[derive(Clone, Debug)]
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let config_dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => ProjectDirs::from("com", "m365report", "m365report")
                .ok_or_else(|| {
                    ReportError::ConfigError("Failed to determine config directory".into())
                })?
                .config_dir()
                .to_path_buf(),
        };

        Self::with_dir(config_dir)
    }

    /// Use an explicit configuration directory, creating it if needed
    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Result<Self> {
        let config_dir = config_dir.into();
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
        }
        Ok(Self { config_dir })
    }

    pub fn load() -> Result<Self> {
        Self::new()
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn tenants_file(&self) -> PathBuf {
        self.config_dir.join("tenants.toml")
    }

    pub fn token_cache_file(&self, tenant_name: &str) -> PathBuf {
        self.config_dir
            .join("cache")
            .join(format!("{}.token", tenant_name))
    }

    /// Load main config
    pub fn load_config(&self) -> Result<Config> {
        let config_path = self.config_file();

        if !config_path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(config_path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save main config
    pub fn save_config(&self, config: &Config) -> Result<()> {
        let contents = toml::to_string_pretty(config)
            .map_err(|e| ReportError::ConfigError(format!("Failed to serialize config: {}", e)))?;
        fs::write(self.config_file(), contents)?;
        Ok(())
    }

    /// Load all tenants
    pub fn load_tenants(&self) -> Result<Vec<TenantConfig>> {
        let tenants_path = self.tenants_file();

        if !tenants_path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(tenants_path)?;

        #[derive(Deserialize)]
        struct TenantsFile {
            #[serde(default)]
            tenants: Vec<TenantConfig>,
        }

        let file: TenantsFile = toml::from_str(&contents)?;
        Ok(file.tenants)
    }

    /// Save all tenants
    pub fn save_tenants(&self, tenants: &[TenantConfig]) -> Result<()> {
        #[derive(Serialize)]
        struct TenantsFile<'a> {
            tenants: &'a [TenantConfig],
        }

        let contents = toml::to_string_pretty(&TenantsFile { tenants })
            .map_err(|e| ReportError::ConfigError(format!("Failed to serialize tenants: {}", e)))?;
        fs::write(self.tenants_file(), contents)?;
        Ok(())
    }

    /// Add or replace a tenant by name
    pub fn add_tenant(&self, tenant: TenantConfig) -> Result<()> {
        let mut tenants = self.load_tenants()?;
        tenants.retain(|t| t.name != tenant.name);
        tenants.push(tenant);
        self.save_tenants(&tenants)
    }

    /// Get tenant by name
    pub fn get_tenant(&self, name: &str) -> Result<TenantConfig> {
        self.load_tenants()?
            .into_iter()
            .find(|t| t.name == name)
            .ok_or_else(|| ReportError::TenantNotFound(name.to_string()))
    }

    /// Get active tenant
    pub fn get_active_tenant(&self) -> Result<Option<TenantConfig>> {
        match self.load_config()?.current_tenant {
            Some(tenant_name) => Ok(Some(self.get_tenant(&tenant_name)?)),
            None => Ok(None),
        }
    }

    /// Set the active tenant
    pub fn set_active_tenant(&self, tenant_name: &str) -> Result<()> {
        self.get_tenant(tenant_name)?;

        let mut config = self.load_config()?;
        config.current_tenant = Some(tenant_name.to_string());
        self.save_config(&config)
    }

    /// Remove a tenant and its cached token
    pub fn remove_tenant(&self, tenant_name: &str) -> Result<()> {
        let mut tenants = self.load_tenants()?;
        let original_len = tenants.len();
        tenants.retain(|t| t.name != tenant_name);

        if tenants.len() == original_len {
            return Err(ReportError::TenantNotFound(tenant_name.to_string()));
        }

        self.save_tenants(&tenants)?;
        self.delete_token(tenant_name)?;

        let mut config = self.load_config()?;
        if config.current_tenant.as_deref() == Some(tenant_name) {
            config.current_tenant = None;
            self.save_config(&config)?;
        }

        Ok(())
    }

    /// Save token cache
    pub fn save_token(&self, tenant_name: &str, token: &TokenCache) -> Result<()> {
        let cache_dir = self.config_dir.join("cache");
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }

        let contents = serde_json::to_string_pretty(token)?;
        fs::write(self.token_cache_file(tenant_name), contents)?;
        Ok(())
    }

    /// Load token cache, rejecting expired tokens
    pub fn load_token(&self, tenant_name: &str) -> Result<TokenCache> {
        let token_path = self.token_cache_file(tenant_name);

        if !token_path.exists() {
            return Err(ReportError::TokenNotFound);
        }

        let contents = fs::read_to_string(token_path)?;
        let token: TokenCache = serde_json::from_str(&contents)?;

        if token.expires_at < chrono::Utc::now() {
            return Err(ReportError::AuthError("Token expired".into()));
        }

        Ok(token)
    }

    /// Delete token cache
    pub fn delete_token(&self, tenant_name: &str) -> Result<()> {
        let token_path = self.token_cache_file(tenant_name);

        if token_path.exists() {
            fs::remove_file(token_path)?;
        }

        Ok(())
    }

    /// Load a tenant from `{name}.env` (or `.env`) in the config directory
    ///
    /// ```text
    /// TENANT_ID=xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx
    /// CLIENT_ID=xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx
    /// CLIENT_SECRET=your-secret-here
    /// ```
    pub fn load_env_file(&self, name: &str) -> Result<Option<TenantConfig>> {
        let env_path = self.config_dir.join(format!("{}.env", name.to_lowercase()));
        let fallback_path = self.config_dir.join(".env");

        let path = if env_path.exists() {
            env_path
        } else if fallback_path.exists() {
            fallback_path
        } else {
            return Ok(None);
        };

        let contents = fs::read_to_string(&path)?;
        let vars = parse_env_lines(contents.lines());
        Ok(vars_to_tenant(name, &vars))
    }

    /// Load every `[NAME]` section of `tenants.env`
    pub fn load_tenants_env(&self) -> Result<Vec<TenantConfig>> {
        let env_path = self.config_dir.join("tenants.env");

        if !env_path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&env_path)?;
        let mut tenants = Vec::new();
        let mut section: Option<(String, Vec<&str>)> = None;

        for line in contents.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                if let Some((abbrev, lines)) = section.take() {
                    tenants.extend(vars_to_tenant(&abbrev, &parse_env_lines(lines.into_iter())));
                }
                section = Some((trimmed[1..trimmed.len() - 1].to_uppercase(), Vec::new()));
            } else if let Some((_, lines)) = section.as_mut() {
                lines.push(line);
            }
        }

        if let Some((abbrev, lines)) = section {
            tenants.extend(vars_to_tenant(&abbrev, &parse_env_lines(lines.into_iter())));
        }

        Ok(tenants)
    }

    /// Get tenant by name, falling back to env files and persisting what was found
    pub fn get_tenant_or_env(&self, name: &str) -> Result<TenantConfig> {
        if let Ok(tenant) = self.get_tenant(name) {
            return Ok(tenant);
        }

        let from_env = match self
            .load_tenants_env()?
            .into_iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
        {
            Some(tenant) => Some(tenant),
            None => self.load_env_file(name)?,
        };

        match from_env {
            Some(tenant) => {
                self.add_tenant(tenant.clone())?;
                Ok(tenant)
            }
            None => Err(ReportError::TenantNotFound(name.to_string())),
        }
    }
}

/// Parse `KEY=VALUE` lines, skipping blanks and comments; keys are upper-cased
fn parse_env_lines<'a>(lines: impl Iterator<Item = &'a str>) -> HashMap<String, String> {
    let mut vars = HashMap::new();

    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim();
            let value = if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                &value[1..value.len() - 1]
            } else {
                value
            };
            vars.insert(key.trim().to_uppercase(), value.to_string());
        }
    }

    vars
}

fn vars_to_tenant(name: &str, vars: &HashMap<String, String>) -> Option<TenantConfig> {
    let tenant_id = vars.get("TENANT_ID")?;
    let client_id = vars.get("CLIENT_ID")?;
    let client_secret = vars.get("CLIENT_SECRET").cloned();

    Some(TenantConfig {
        name: name.to_string(),
        tenant_id: tenant_id.clone(),
        client_id: client_id.clone(),
        auth_type: if client_secret.is_some() {
            AuthType::ClientCredentials
        } else {
            AuthType::DeviceCode
        },
        client_secret,
        description: vars
            .get("NAME")
            .or_else(|| vars.get("DESCRIPTION"))
            .cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(name: &str) -> TenantConfig {
        TenantConfig {
            name: name.to_string(),
            tenant_id: "tid".into(),
            client_id: "cid".into(),
            client_secret: None,
            auth_type: AuthType::DeviceCode,
            description: None,
        }
    }

    #[test]
    fn test_reports_defaults_when_config_missing() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_dir(dir.path()).unwrap();
        let config = manager.load_config().unwrap();
        assert_eq!(config.reports.delimiter, ',');
        assert_eq!(config.reports.page_size, 999);
        assert_eq!(config.reports.preview_rows, 0);
    }

    #[test]
    fn test_partial_reports_section_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            "current_tenant = \"CONTOSO\"\n[reports]\ndelimiter = \";\"\n",
        )
        .unwrap();
        let manager = ConfigManager::with_dir(dir.path()).unwrap();
        let config = manager.load_config().unwrap();
        assert_eq!(config.current_tenant.as_deref(), Some("CONTOSO"));
        assert_eq!(config.reports.delimiter, ';');
        assert_eq!(config.reports.page_size, 999);
    }

    #[test]
    fn test_tenant_add_switch_remove() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_dir(dir.path()).unwrap();

        manager.add_tenant(tenant("A")).unwrap();
        manager.add_tenant(tenant("B")).unwrap();
        manager.add_tenant(tenant("A")).unwrap();
        assert_eq!(manager.load_tenants().unwrap().len(), 2);

        manager.set_active_tenant("B").unwrap();
        assert_eq!(manager.get_active_tenant().unwrap().unwrap().name, "B");

        manager.remove_tenant("B").unwrap();
        assert!(manager.get_active_tenant().unwrap().is_none());
        assert!(matches!(
            manager.remove_tenant("B"),
            Err(ReportError::TenantNotFound(_))
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_dir(dir.path()).unwrap();
        let token = TokenCache {
            access_token: "abc".into(),
            refresh_token: None,
            expires_at: chrono::Utc::now() - chrono::Duration::minutes(5),
            tenant_id: "tid".into(),
        };
        manager.save_token("A", &token).unwrap();
        assert!(matches!(manager.load_token("A"), Err(ReportError::AuthError(_))));
        assert!(matches!(manager.load_token("B"), Err(ReportError::TokenNotFound)));
    }

    #[test]
    fn test_tenants_env_sections() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("tenants.env"),
            "# clients\n[reso]\nNAME=Resolve\nTENANT_ID=t1\nCLIENT_ID=c1\nCLIENT_SECRET=\"s1\"\n\n[acme]\ntenant_id=t2\nclient_id=c2\n\n[broken]\nTENANT_ID=t3\n",
        )
        .unwrap();
        let manager = ConfigManager::with_dir(dir.path()).unwrap();
        let tenants = manager.load_tenants_env().unwrap();

        assert_eq!(tenants.len(), 2);
        assert_eq!(tenants[0].name, "RESO");
        assert_eq!(tenants[0].client_secret.as_deref(), Some("s1"));
        assert_eq!(tenants[0].auth_type, AuthType::ClientCredentials);
        assert_eq!(tenants[0].description.as_deref(), Some("Resolve"));
        assert_eq!(tenants[1].name, "ACME");
        assert_eq!(tenants[1].auth_type, AuthType::DeviceCode);

        let found = manager.get_tenant_or_env("acme").unwrap();
        assert_eq!(found.tenant_id, "t2");
        assert_eq!(manager.get_tenant("ACME").unwrap().client_id, "c2");
    }
}
