//! Bulk group membership from a CSV of user principal names
//!
//! Every input row becomes one result row saying what happened to that
//! user. A user that cannot be found or changed is a warning; the remaining
//! rows are still processed.

use crate::cmd::progress::{create_progress_bar, create_spinner, finish_error, finish_success};
use crate::cmd::{OutputArgs, ReportSettings, console, export, load_report_defaults, print_skip_summary};
use crate::error::{ReportError, Result};
use crate::graph::GraphClient;
use crate::graph::groups::{Group, UserRef, UserResolver, add_member, get_group, list_members, remove_member};
use crate::report::cache::LookupCache;
use crate::report::filter::{Filter, SkipTally};
use crate::report::{ReportRow, SortKey};
use clap::Args;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct GroupMembersArgs {
    /// Target group: object id or exact display name
    #[arg(long)]
    pub group: String,

    /// CSV file listing the users
    #[arg(short, long, value_name = "PATH")]
    pub input: PathBuf,

    /// Column holding each user's UPN
    #[arg(long, default_value = "UserPrincipalName")]
    pub column: String,

    /// Remove the listed users instead of adding them
    #[arg(long)]
    pub remove: bool,

    /// Report what would change without changing anything
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MemberAction {
    Add,
    Remove,
}

/// What happened to one input user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeStatus {
    Added,
    Removed,
    WouldAdd,
    WouldRemove,
    AlreadyMember,
    NotMember,
    UserNotFound,
    Failed,
}

#[derive(Debug, Clone)]
pub struct GroupMemberOptions {
    pub group: String,
    pub action: MemberAction,
    pub dry_run: bool,
}

impl From<&GroupMembersArgs> for GroupMemberOptions {
    fn from(args: &GroupMembersArgs) -> Self {
        Self {
            group: args.group.clone(),
            action: if args.remove {
                MemberAction::Remove
            } else {
                MemberAction::Add
            },
            dry_run: args.dry_run,
        }
    }
}

/// One data row of the input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEntry {
    /// Line in the input file, counting the header as line 1
    pub line: u64,
    pub upn: String,
}

/// Read the UPN column of a CSV file
///
/// A missing file or column is fatal; nothing has been sent to Graph yet.
pub fn read_input(path: &Path, column: &str) -> Result<Vec<InputEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let index = reader
        .headers()?
        .iter()
        .position(|h| h.eq_ignore_ascii_case(column))
        .ok_or_else(|| {
            ReportError::InvalidArgument(format!(
                "column '{}' not found in {}",
                column,
                path.display()
            ))
        })?;

    let mut entries = Vec::new();
    for (row_idx, record) in reader.records().enumerate() {
        let record = record?;
        entries.push(InputEntry {
            line: row_idx as u64 + 2,
            upn: record.get(index).unwrap_or_default().to_string(),
        });
    }
    Ok(entries)
}

pub fn entry_filter() -> Filter<InputEntry> {
    Filter::new()
        .guard("has-upn", |e: &InputEntry| !e.upn.is_empty())
        .guard("looks-like-upn", |e: &InputEntry| e.upn.contains('@'))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupMemberRow {
    pub source_line: u64,
    pub user_principal_name: String,
    pub display_name: Option<String>,
    pub user_id: Option<String>,
    pub group: String,
    pub action: MemberAction,
    pub status: ChangeStatus,
    pub detail: Option<String>,
}

impl ReportRow for GroupMemberRow {
    const NAME: &'static str = "GroupMembers";
    const COLUMNS: &'static [&'static str] = &[
        "SourceLine",
        "UserPrincipalName",
        "DisplayName",
        "UserId",
        "Group",
        "Action",
        "Status",
        "Detail",
    ];
}

pub fn default_sort() -> Vec<SortKey> {
    vec![SortKey::asc("SourceLine")]
}

/// The change to make for a resolved user, or the status when none is needed
pub fn plan(
    action: MemberAction,
    is_member: bool,
    dry_run: bool,
) -> std::result::Result<MemberAction, ChangeStatus> {
    match (action, is_member, dry_run) {
        (MemberAction::Add, true, _) => Err(ChangeStatus::AlreadyMember),
        (MemberAction::Remove, false, _) => Err(ChangeStatus::NotMember),
        (MemberAction::Add, false, true) => Err(ChangeStatus::WouldAdd),
        (MemberAction::Remove, true, true) => Err(ChangeStatus::WouldRemove),
        (action, _, false) => Ok(action),
    }
}

pub fn shape(
    entry: &InputEntry,
    user: Option<&UserRef>,
    group: &Group,
    action: MemberAction,
    status: ChangeStatus,
    detail: Option<String>,
) -> GroupMemberRow {
    GroupMemberRow {
        source_line: entry.line,
        user_principal_name: entry.upn.clone(),
        display_name: user.and_then(|u| u.display_name.clone()),
        user_id: user.map(|u| u.id.clone()),
        group: group.label().to_string(),
        action,
        status,
        detail,
    }
}

async fn apply(graph: &GraphClient, group: &Group, user: &UserRef, action: MemberAction) -> Result<ChangeStatus> {
    match action {
        MemberAction::Add => {
            add_member(graph, &group.id, &user.id).await?;
            Ok(ChangeStatus::Added)
        }
        MemberAction::Remove => {
            remove_member(graph, &group.id, &user.id).await?;
            Ok(ChangeStatus::Removed)
        }
    }
}

/// Resolve, compare against current membership and apply each entry in order
pub async fn generate(
    graph: &GraphClient,
    opts: &GroupMemberOptions,
    entries: &[InputEntry],
    settings: &ReportSettings,
) -> Result<Vec<GroupMemberRow>> {
    let group = get_group(graph, &opts.group).await?;
    console::info(format!("Group: {}", group.label()));

    let spinner = create_spinner("Reading current members...");
    let members: HashSet<String> = match list_members(graph, &group.id, settings.page_size).await {
        Ok(members) => {
            finish_success(&spinner, &format!("{} current member(s)", members.len()));
            members.into_iter().map(|m| m.id.to_lowercase()).collect()
        }
        Err(e) => {
            finish_error(&spinner, "Failed to read group members");
            return Err(e);
        }
    };

    let filter = entry_filter();
    let mut tally = SkipTally::default();
    let mut seen = HashSet::new();
    let mut users = LookupCache::new(UserResolver::new(graph));
    let mut rows = Vec::new();
    let mut failed = 0;

    let bar = create_progress_bar(entries.len() as u64, "Applying membership");
    for entry in entries {
        bar.inc(1);

        if let Err(guard) = filter.check(entry) {
            tally.record(guard);
            continue;
        }
        if !seen.insert(entry.upn.to_lowercase()) {
            tally.record("duplicate");
            continue;
        }

        let Some(user) = users.resolve(&entry.upn).await else {
            bar.suspend(|| console::warn(format!("Line {}: user {} not found", entry.line, entry.upn)));
            rows.push(shape(entry, None, &group, opts.action, ChangeStatus::UserNotFound, None));
            continue;
        };

        let is_member = members.contains(&user.id.to_lowercase());
        let (status, detail) = match plan(opts.action, is_member, opts.dry_run) {
            Err(status) => (status, None),
            Ok(action) => match apply(graph, &group, &user, action).await {
                Ok(status) => (status, None),
                Err(e) => {
                    failed += 1;
                    bar.suspend(|| console::warn(format!("Line {}: {}: {}", entry.line, entry.upn, e)));
                    (ChangeStatus::Failed, Some(e.to_string()))
                }
            },
        };
        rows.push(shape(entry, Some(&user), &group, opts.action, status, detail));
    }
    finish_success(&bar, &format!("Processed {} user(s)", rows.len()));

    print_skip_summary(entries.len(), &tally);
    if failed > 0 {
        console::warn(format!("{} change(s) failed", failed));
    }

    Ok(rows)
}

pub async fn run(args: GroupMembersArgs) -> Result<()> {
    let opts = GroupMemberOptions::from(&args);
    let settings = ReportSettings::resolve(&args.output, &load_report_defaults()?)?;
    settings.sort_keys::<GroupMemberRow>(default_sort())?;
    let entries = read_input(&args.input, &args.column)?;

    console::heading(if opts.dry_run {
        "Group membership (dry run)"
    } else {
        "Group membership"
    });
    let (_, _, graph) = crate::cmd::connect(args.output.tenant.as_deref()).await?;

    let mut rows = generate(&graph, &opts, &entries, &settings).await?;
    export(&settings, &mut rows, default_sort())?;
    Ok(())
}
