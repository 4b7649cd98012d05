use crate::cmd::console;
use crate::config::{AuthType, ConfigManager, TenantConfig};
use crate::error::Result;
use crate::graph::auth::REQUIRED_SCOPES;
use clap::Args;
use colored::Colorize;

#[derive(Args, Debug)]
pub struct TenantAddArgs {
    /// Tenant name
    name: String,

    /// Entra ID tenant ID
    #[arg(long)]
    tenant_id: String,

    /// Application (client) ID
    #[arg(long)]
    client_id: String,

    /// Client secret (for client credentials flow)
    #[arg(long)]
    client_secret: Option<String>,

    /// Use client credentials flow
    #[arg(long)]
    client_credentials: bool,

    /// Tenant description
    #[arg(long)]
    description: Option<String>,
}

#[derive(Args, Debug)]
pub struct TenantListArgs {
    /// Show detailed information
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args, Debug)]
pub struct TenantSwitchArgs {
    /// Tenant name to switch to
    name: String,
}

#[derive(Args, Debug)]
pub struct TenantRemoveArgs {
    /// Tenant name to remove
    name: String,
}

pub async fn add(args: TenantAddArgs) -> Result<()> {
    let config_manager = ConfigManager::new()?;

    let auth_type = if args.client_credentials || args.client_secret.is_some() {
        AuthType::ClientCredentials
    } else {
        AuthType::DeviceCode
    };

    config_manager.add_tenant(TenantConfig {
        name: args.name.clone(),
        tenant_id: args.tenant_id,
        client_id: args.client_id,
        client_secret: args.client_secret,
        auth_type,
        description: args.description,
    })?;

    console::success(format!("Tenant '{}' added", args.name));
    println!("\n{} The app registration needs these Graph permissions:", "→".cyan());
    for scope in REQUIRED_SCOPES {
        println!("  • {}", scope);
    }
    println!(
        "\n{} Run {} to authenticate",
        "→".cyan(),
        format!("m365report login {}", args.name).bold()
    );

    Ok(())
}

pub async fn list(args: TenantListArgs) -> Result<()> {
    let config_manager = ConfigManager::new()?;
    let tenants = config_manager.load_tenants()?;
    let config = config_manager.load_config()?;

    if tenants.is_empty() {
        println!("{} No tenants configured", "⚠".yellow());
        println!(
            "\n{} Run {} to add a tenant",
            "→".cyan(),
            "m365report tenant add".bold()
        );
        return Ok(());
    }

    println!("\n{}", "Configured Tenants:".bold());
    println!("{}", "─".repeat(60));

    for tenant in &tenants {
        let is_current = config.current_tenant.as_ref() == Some(&tenant.name);
        let marker = if is_current { "●".green() } else { "○".dimmed() };

        println!("\n{} {}", marker, tenant.name.bold());

        if args.verbose {
            println!("  Tenant ID:    {}", tenant.tenant_id);
            println!("  Client ID:    {}", tenant.client_id);
            println!("  Auth Type:    {:?}", tenant.auth_type);

            if let Some(desc) = &tenant.description {
                println!("  Description:  {}", desc);
            }

            match config_manager.load_token(&tenant.name) {
                Ok(token) => println!(
                    "  Status:       {} (expires: {})",
                    "Authenticated".green(),
                    token.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
                ),
                Err(_) => println!("  Status:       {}", "Not authenticated".yellow()),
            }
        }
    }

    println!("\n{}", "─".repeat(60));
    console::info(format!("{} tenant(s) total", tenants.len()));

    if let Some(current) = &config.current_tenant {
        println!("{} Active: {}", "→".cyan(), current.bold());
    }

    Ok(())
}

pub async fn switch(args: TenantSwitchArgs) -> Result<()> {
    ConfigManager::new()?.set_active_tenant(&args.name)?;
    console::success(format!("Switched to tenant '{}'", args.name));
    Ok(())
}

pub async fn remove(args: TenantRemoveArgs) -> Result<()> {
    ConfigManager::new()?.remove_tenant(&args.name)?;
    console::success(format!("Tenant '{}' removed", args.name));
    Ok(())
}
