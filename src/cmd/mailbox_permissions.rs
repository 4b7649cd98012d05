//! Calendar delegation granted on each mailbox

use crate::cmd::progress::{create_progress_bar, finish_success};
use crate::cmd::{
    OutputArgs, ReportSettings, console, export, load_report_defaults, print_skip_summary,
    target_mailboxes,
};
use crate::error::Result;
use crate::graph::GraphClient;
use crate::graph::mail::{CalendarPermission, MailUser, MailboxIdentity, MailboxResolver, list_calendar_permissions};
use crate::report::cache::LookupCache;
use crate::report::filter::{Filter, SkipTally};
use crate::report::{ReportRow, SortKey};
use clap::Args;
use serde::Serialize;

#[derive(Args, Debug)]
pub struct MailboxPermissionsArgs {
    /// Only this mailbox (UPN or SMTP address)
    #[arg(long)]
    pub mailbox: Option<String>,

    /// Skip the built-in "My Organization" and anonymous entries
    #[arg(long)]
    pub exclude_defaults: bool,

    /// Only grants with this role (e.g. write, delegateWithPrivateEventAccess)
    #[arg(long)]
    pub role: Option<String>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Clone, Default)]
pub struct PermissionOptions {
    pub mailbox: Option<String>,
    pub exclude_defaults: bool,
    pub role: Option<String>,
}

impl From<&MailboxPermissionsArgs> for PermissionOptions {
    fn from(args: &MailboxPermissionsArgs) -> Self {
        Self {
            mailbox: args.mailbox.clone(),
            exclude_defaults: args.exclude_defaults,
            role: args.role.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MailboxPermissionRow {
    pub mailbox: String,
    pub mailbox_display_name: Option<String>,
    pub grantee: String,
    pub grantee_display_name: String,
    pub grantee_resolved: bool,
    pub role: Option<String>,
    pub allowed_roles: String,
    pub is_removable: Option<bool>,
    pub is_inside_organization: Option<bool>,
}

impl ReportRow for MailboxPermissionRow {
    const NAME: &'static str = "MailboxPermissions";
    const COLUMNS: &'static [&'static str] = &[
        "Mailbox",
        "MailboxDisplayName",
        "Grantee",
        "GranteeDisplayName",
        "GranteeResolved",
        "Role",
        "AllowedRoles",
        "IsRemovable",
        "IsInsideOrganization",
    ];
}

pub fn default_sort() -> Vec<SortKey> {
    vec![SortKey::asc("Mailbox"), SortKey::asc("Grantee")]
}

pub fn permission_filter(opts: &PermissionOptions) -> Filter<CalendarPermission> {
    let role = opts.role.clone();

    Filter::new()
        .guard_if(opts.exclude_defaults, "not-default", |p: &CalendarPermission| {
            !p.is_default_entry()
        })
        .guard_if(role.is_some(), "role-matches", move |p: &CalendarPermission| {
            match (&role, p.role.as_deref()) {
                (Some(wanted), Some(actual)) => actual.eq_ignore_ascii_case(wanted),
                _ => false,
            }
        })
}

fn grantee_address(permission: &CalendarPermission) -> Option<&str> {
    permission
        .email_address
        .as_ref()
        .and_then(|e| e.address.as_deref())
        .filter(|a| !a.is_empty())
}

/// Label for built-in entries that carry a name but no address
fn grantee_label(permission: &CalendarPermission) -> String {
    permission
        .email_address
        .as_ref()
        .and_then(|e| e.name.clone())
        .unwrap_or_else(|| permission.id.clone())
}

/// `grantee` is `None` for built-in entries with no address to resolve
pub fn shape(
    mailbox: &MailUser,
    permission: &CalendarPermission,
    grantee: Option<&MailboxIdentity>,
) -> MailboxPermissionRow {
    let (address, display_name, resolved) = match grantee {
        Some(identity) => (
            identity.primary_smtp.clone(),
            identity.display_name.clone(),
            identity.resolved,
        ),
        None => {
            let label = grantee_label(permission);
            (label.clone(), label, false)
        }
    };

    MailboxPermissionRow {
        mailbox: mailbox.address(),
        mailbox_display_name: mailbox.display_name.clone(),
        grantee: address,
        grantee_display_name: display_name,
        grantee_resolved: resolved,
        role: permission.role.clone(),
        allowed_roles: permission.allowed_roles.join("; "),
        is_removable: permission.is_removable,
        is_inside_organization: permission.is_inside_organization,
    }
}

pub async fn generate(
    graph: &GraphClient,
    opts: &PermissionOptions,
    settings: &ReportSettings,
) -> Result<Vec<MailboxPermissionRow>> {
    let mailboxes = target_mailboxes(graph, opts.mailbox.as_deref(), settings.page_size).await?;

    let filter = permission_filter(opts);
    let mut tally = SkipTally::default();
    let mut cache = LookupCache::new(MailboxResolver::new(graph));
    let mut rows = Vec::new();
    let mut total = 0;
    let mut failed = 0;

    let bar = create_progress_bar(mailboxes.len() as u64, "Calendar permissions");
    for mailbox in &mailboxes {
        let permissions = match list_calendar_permissions(graph, &mailbox.id).await {
            Ok(permissions) => permissions,
            Err(e) => {
                failed += 1;
                bar.suspend(|| {
                    console::warn(format!("Skipping {}: {}", mailbox.address(), e));
                });
                bar.inc(1);
                continue;
            }
        };

        total += permissions.len();
        for permission in &permissions {
            if let Err(guard) = filter.check(permission) {
                tally.record(guard);
                continue;
            }

            let grantee = match grantee_address(permission) {
                Some(address) => Some(cache.resolve(address).await),
                None => None,
            };
            rows.push(shape(mailbox, permission, grantee.as_ref()));
        }
        bar.inc(1);
    }
    finish_success(
        &bar,
        &format!("Read permissions from {} mailboxes", mailboxes.len() - failed),
    );

    print_skip_summary(total, &tally);
    let unresolved = cache.stats().failures;
    if unresolved > 0 {
        console::warn(format!(
            "{} grantee(s) could not be resolved; their raw address is shown with GranteeResolved=false",
            unresolved
        ));
    }
    if failed > 0 {
        console::warn(format!("{} mailbox(es) could not be read", failed));
    }

    Ok(rows)
}

pub async fn run(args: MailboxPermissionsArgs) -> Result<()> {
    let opts = PermissionOptions::from(&args);
    let settings = ReportSettings::resolve(&args.output, &load_report_defaults()?)?;
    settings.sort_keys::<MailboxPermissionRow>(default_sort())?;

    console::heading("Calendar permissions");
    let (_, _, graph) = crate::cmd::connect(args.output.tenant.as_deref()).await?;

    let mut rows = generate(&graph, &opts, &settings).await?;
    export(&settings, &mut rows, default_sort())?;
    Ok(())
}
