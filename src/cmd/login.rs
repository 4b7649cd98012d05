use crate::cmd::console;
use crate::config::{AuthType, ConfigManager, TenantConfig};
use crate::error::{ReportError, Result};
use crate::graph::auth::GraphAuth;
use clap::Args;
use colored::Colorize;

/// First `n` characters, safe for non-ASCII input
fn truncate_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Tenant name; checks tenants.toml, then tenants.env, then {name}.env
    #[arg(index = 1)]
    name: Option<String>,

    /// Tenant name (alias for the positional argument)
    #[arg(short, long)]
    tenant: Option<String>,

    /// Entra ID tenant ID
    #[arg(long)]
    tenant_id: Option<String>,

    /// Application (client) ID
    #[arg(long)]
    client_id: Option<String>,

    /// Client secret (for client credentials flow)
    #[arg(long)]
    client_secret: Option<String>,

    /// Use client credentials flow instead of device code
    #[arg(long)]
    client_credentials: bool,

    /// Tenant description
    #[arg(long)]
    description: Option<String>,

    /// Import from env files only (don't authenticate)
    #[arg(long)]
    import_only: bool,
}

#[derive(Args, Debug)]
pub struct LogoutArgs {
    /// Tenant name
    #[arg(short, long)]
    tenant: Option<String>,

    /// Logout from all tenants
    #[arg(long)]
    all: bool,
}

fn not_found_help(name: &str) -> ReportError {
    ReportError::ConfigError(format!(
        "Tenant '{}' not found.\n\n\
        Options:\n\
        1. Add a section to tenants.env in the config directory:\n   \
           [{}]\n   \
           NAME=Your Organization\n   \
           TENANT_ID=your-tenant-id\n   \
           CLIENT_ID=your-client-id\n\n\
        2. Create {}.env in the config directory with TENANT_ID and CLIENT_ID\n\n\
        3. Run: m365report login --tenant-id ID --client-id ID --tenant {}",
        name,
        name.to_uppercase(),
        name.to_lowercase(),
        name
    ))
}

pub async fn login(args: LoginArgs) -> Result<()> {
    let config_manager = ConfigManager::new()?;
    let auth = GraphAuth::new(config_manager.clone());

    let tenant_name = args.name.as_ref().or(args.tenant.as_ref());

    let tenant_config = if let (Some(tenant_id), Some(client_id)) = (&args.tenant_id, &args.client_id) {
        println!(
            "\n{} Quick setup mode: creating tenant configuration...",
            "→".cyan()
        );

        let name = tenant_name.cloned().unwrap_or_else(|| {
            let auto_name = tenant_id
                .split('-')
                .next()
                .unwrap_or("my-tenant")
                .to_string();
            println!("{} Auto-generated tenant name: {}", "→".cyan(), auto_name.bold());
            auto_name
        });

        let auth_type = if args.client_credentials || args.client_secret.is_some() {
            println!("{} Using client credentials flow", "→".cyan());
            AuthType::ClientCredentials
        } else {
            println!("{} Using device code flow", "→".cyan());
            AuthType::DeviceCode
        };

        let tenant = TenantConfig {
            name: name.clone(),
            tenant_id: tenant_id.clone(),
            client_id: client_id.clone(),
            client_secret: args.client_secret.clone(),
            auth_type,
            description: args.description,
        };

        config_manager.add_tenant(tenant.clone())?;
        console::success(format!("Tenant '{}' configuration saved", name));

        tenant
    } else if let Some(name) = tenant_name {
        let tenant = match config_manager.get_tenant_or_env(name) {
            Ok(tenant) => tenant,
            Err(ReportError::TenantNotFound(_)) => return Err(not_found_help(name)),
            Err(e) => return Err(e),
        };

        println!(
            "{} Loaded tenant: {} ({})",
            "✓".green(),
            name.bold(),
            tenant.description.as_deref().unwrap_or("")
        );
        println!("  Tenant ID: {}...", truncate_chars(&tenant.tenant_id, 8));
        println!("  Client ID: {}...", truncate_chars(&tenant.client_id, 8));
        match tenant.auth_type {
            AuthType::ClientCredentials => println!("  Auth: Client Credentials"),
            AuthType::DeviceCode => println!("  Auth: Device Code Flow"),
        }

        if args.import_only {
            println!(
                "\n{} Import complete. Run 'm365report login {}' to authenticate.",
                "→".cyan(),
                name
            );
            return Ok(());
        }

        tenant
    } else {
        return Err(ReportError::InvalidArgument(
            "Usage:\n  \
            m365report login CONTOSO           # tenants.toml, tenants.env or contoso.env\n  \
            m365report login --tenant NAME     # existing configuration\n  \
            m365report login --tenant-id ID --client-id ID  # quick setup"
                .into(),
        ));
    };

    match tenant_config.auth_type {
        AuthType::DeviceCode => auth.login_device_code(&tenant_config).await?,
        AuthType::ClientCredentials => auth.login_client_credentials(&tenant_config).await?,
    };

    config_manager.set_active_tenant(&tenant_config.name)?;
    tracing::info!(tenant = %tenant_config.name, "authenticated");

    println!(
        "\n{} Active tenant: {}",
        "→".cyan(),
        tenant_config.name.bold()
    );
    Ok(())
}

pub async fn logout(args: LogoutArgs) -> Result<()> {
    let config_manager = ConfigManager::new()?;
    let auth = GraphAuth::new(config_manager.clone());

    if args.all {
        for tenant in &config_manager.load_tenants()? {
            auth.logout(&tenant.name)?;
        }
        console::success("Logged out from all tenants");
    } else if let Some(tenant_name) = &args.tenant {
        auth.logout(tenant_name)?;
    } else {
        match config_manager.load_config()?.current_tenant {
            Some(current) => auth.logout(&current)?,
            None => console::warn("No active tenant"),
        }
    }

    Ok(())
}
