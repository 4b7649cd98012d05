use clap::{Parser, Subcommand};
use colored::Colorize;
use m365report::cmd;
use m365report::config::ConfigManager;
use m365report::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "m365report",
    about = "Paged Microsoft 365 reports exported to CSV",
    version,
    long_about = "Fetch Microsoft Graph collections page by page, join secondary lookups,\n\
                  filter and shape the records, and export sorted CSV reports.\n\
                  Bulk commands apply CSV-driven changes and report the result of each row."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Authenticate to Microsoft Graph
    Login(cmd::login::LoginArgs),

    /// Logout and clear cached credentials
    Logout(cmd::login::LogoutArgs),

    /// Manage tenant configurations
    #[command(subcommand)]
    Tenant(TenantCommands),

    /// Generate a report
    #[command(subcommand)]
    Report(ReportCommands),

    /// Bulk changes driven by a CSV file, reported per row
    #[command(subcommand)]
    Bulk(BulkCommands),
}

#[derive(Subcommand, Debug)]
enum TenantCommands {
    /// Add a new tenant configuration
    Add(cmd::tenant::TenantAddArgs),

    /// List all configured tenants
    List(cmd::tenant::TenantListArgs),

    /// Switch active tenant
    Switch(cmd::tenant::TenantSwitchArgs),

    /// Remove a tenant configuration
    Remove(cmd::tenant::TenantRemoveArgs),
}

#[derive(Subcommand, Debug)]
enum ReportCommands {
    /// Managed devices with an OS version below a threshold
    MobileDevices(cmd::mobile_devices::MobileDevicesArgs),

    /// Sign-in logs over a lookback window
    SignIns(cmd::sign_ins::SignInsArgs),

    /// Inbox rules, with forwarding recipients resolved
    InboxRules(cmd::inbox_rules::InboxRulesArgs),

    /// PIM role eligibility per principal
    RoleEligibility(cmd::role_eligibility::RoleEligibilityArgs),

    /// Registered authentication methods per user
    AuthMethods(cmd::auth_methods::AuthMethodsArgs),

    /// Calendar delegation per mailbox
    MailboxPermissions(cmd::mailbox_permissions::MailboxPermissionsArgs),
}

#[derive(Subcommand, Debug)]
enum BulkCommands {
    /// Add or remove group members listed by UPN
    GroupMembers(cmd::group_members::GroupMembersArgs),
}

/// `--verbose`, then RUST_LOG, then `log_level` from config.toml
fn log_filter(verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new("m365report=debug");
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let configured = ConfigManager::new()
        .and_then(|c| c.load_config())
        .map(|c| c.log_level)
        .unwrap_or_default();

    if configured.trim().is_empty() {
        EnvFilter::new("m365report=warn")
    } else {
        EnvFilter::new(configured)
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run() -> error::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Login(args) => cmd::login::login(args).await?,
        Commands::Logout(args) => cmd::login::logout(args).await?,
        Commands::Tenant(tenant_cmd) => match tenant_cmd {
            TenantCommands::Add(args) => cmd::tenant::add(args).await?,
            TenantCommands::List(args) => cmd::tenant::list(args).await?,
            TenantCommands::Switch(args) => cmd::tenant::switch(args).await?,
            TenantCommands::Remove(args) => cmd::tenant::remove(args).await?,
        },
        Commands::Report(report_cmd) => match report_cmd {
            ReportCommands::MobileDevices(args) => cmd::mobile_devices::run(args).await?,
            ReportCommands::SignIns(args) => cmd::sign_ins::run(args).await?,
            ReportCommands::InboxRules(args) => cmd::inbox_rules::run(args).await?,
            ReportCommands::RoleEligibility(args) => cmd::role_eligibility::run(args).await?,
            ReportCommands::AuthMethods(args) => cmd::auth_methods::run(args).await?,
            ReportCommands::MailboxPermissions(args) => cmd::mailbox_permissions::run(args).await?,
        },
        Commands::Bulk(bulk_cmd) => match bulk_cmd {
            BulkCommands::GroupMembers(args) => cmd::group_members::run(args).await?,
        },
    }

    Ok(())
}
