//! PIM role eligibility: one row per principal × role, plus an optional
//! pivot with one row per principal and one column per role.

use crate::cmd::progress::{create_progress_bar, create_spinner, finish_error, finish_success};
use crate::cmd::{
    OutputArgs, ReportSettings, console, export, export_pivot, load_report_defaults,
    print_skip_summary,
};
use crate::error::Result;
use crate::graph::GraphClient;
use crate::graph::roles::{
    Principal, PrincipalResolver, RoleEligibilityInstance, RoleNameResolver,
    list_eligibility_instances,
};
use crate::report::cache::LookupCache;
use crate::report::filter::{Filter, SkipTally};
use crate::report::pivot::PivotSource;
use crate::report::{ReportRow, SortKey};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct RoleEligibilityArgs {
    /// Only this role (display name, e.g. "Global Administrator")
    #[arg(long)]
    pub role: Option<String>,

    /// Also write the pivoted report (one row per principal)
    #[arg(long)]
    pub pivot: bool,

    /// Pivoted report path (implies --pivot)
    #[arg(long, value_name = "PATH")]
    pub pivot_output: Option<PathBuf>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Clone, Default)]
pub struct RoleEligibilityOptions {
    pub role: Option<String>,
}

/// An instance with its role definition already resolved
#[derive(Debug, Clone)]
pub struct Eligibility {
    pub instance: RoleEligibilityInstance,
    pub role_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoleEligibilityRow {
    pub principal_display_name: String,
    pub principal_name: String,
    pub principal_type: String,
    pub role_name: String,
    pub directory_scope: Option<String>,
    pub member_type: Option<String>,
    pub start_date_time: Option<DateTime<Utc>>,
    pub end_date_time: Option<DateTime<Utc>>,
    pub principal_id: String,
}

impl ReportRow for RoleEligibilityRow {
    const NAME: &'static str = "RoleEligibility";
    const COLUMNS: &'static [&'static str] = &[
        "PrincipalDisplayName",
        "PrincipalName",
        "PrincipalType",
        "RoleName",
        "DirectoryScope",
        "MemberType",
        "StartDateTime",
        "EndDateTime",
        "PrincipalId",
    ];
    const TIME_COLUMNS: &'static [&'static str] = &["StartDateTime", "EndDateTime"];
}

impl PivotSource for RoleEligibilityRow {
    const KEY_COLUMNS: &'static [&'static str] =
        &["PrincipalDisplayName", "PrincipalName", "PrincipalType"];

    fn entity_key(&self) -> Vec<String> {
        vec![
            self.principal_display_name.clone(),
            self.principal_name.clone(),
            self.principal_type.clone(),
        ]
    }

    fn category(&self) -> Option<String> {
        Some(self.role_name.clone())
    }

    fn cell(&self) -> String {
        "Eligible".to_string()
    }
}

pub fn default_sort() -> Vec<SortKey> {
    vec![SortKey::asc("PrincipalDisplayName"), SortKey::asc("RoleName")]
}

fn non_empty(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.is_empty())
}

/// Guards on the raw instance, checked before any lookup is made for it
pub fn instance_filter() -> Filter<RoleEligibilityInstance> {
    Filter::new()
        .guard("has-principal", |i: &RoleEligibilityInstance| {
            non_empty(i.principal_id.as_deref())
        })
        .guard("has-role", |i: &RoleEligibilityInstance| {
            non_empty(i.role_definition_id.as_deref())
        })
}

/// Guards on the instance joined with its role name
pub fn eligibility_filter(opts: &RoleEligibilityOptions) -> Filter<Eligibility> {
    let role = opts.role.clone();

    Filter::new()
        .guard_if(role.is_some(), "role-matches", move |e: &Eligibility| {
            role.as_deref()
                .is_some_and(|wanted| e.role_name.eq_ignore_ascii_case(wanted))
        })
}

pub fn shape(eligibility: &Eligibility, principal: &Principal) -> RoleEligibilityRow {
    let instance = &eligibility.instance;

    RoleEligibilityRow {
        principal_display_name: principal.display_name.clone(),
        principal_name: principal.name.clone(),
        principal_type: principal.kind.clone(),
        role_name: eligibility.role_name.clone(),
        directory_scope: instance.directory_scope_id.clone(),
        member_type: instance.member_type.clone(),
        start_date_time: instance.start_date_time,
        end_date_time: instance.end_date_time,
        principal_id: instance.principal_id.clone().unwrap_or_default(),
    }
}

pub async fn generate(
    graph: &GraphClient,
    opts: &RoleEligibilityOptions,
    settings: &ReportSettings,
) -> Result<Vec<RoleEligibilityRow>> {
    let spinner = create_spinner("Fetching role eligibility schedules...");
    let instances = match list_eligibility_instances(graph, settings.page_size).await {
        Ok(instances) => {
            finish_success(&spinner, &format!("Fetched {} eligibility instances", instances.len()));
            instances
        }
        Err(e) => {
            finish_error(&spinner, "Failed to fetch role eligibility schedules");
            return Err(e);
        }
    };

    let present = instance_filter();
    let filter = eligibility_filter(opts);
    let mut tally = SkipTally::default();
    let mut roles = LookupCache::new(RoleNameResolver::new(graph));
    let mut principals = LookupCache::new(PrincipalResolver::new(graph));
    let mut rows = Vec::new();

    let total = instances.len();
    let bar = create_progress_bar(total as u64, "Resolving principals");
    for instance in instances {
        bar.inc(1);

        if let Err(guard) = present.check(&instance) {
            tally.record(guard);
            continue;
        }

        let role_id = instance.role_definition_id.as_deref().unwrap_or_default();
        let role_name = roles.resolve(role_id).await;
        let eligibility = Eligibility { instance, role_name };

        if let Err(guard) = filter.check(&eligibility) {
            tally.record(guard);
            continue;
        }

        let principal_id = eligibility.instance.principal_id.as_deref().unwrap_or_default();
        let principal = principals.resolve(principal_id).await;
        rows.push(shape(&eligibility, &principal));
    }
    finish_success(
        &bar,
        &format!(
            "Resolved {} principals and {} roles",
            principals.len(),
            roles.len()
        ),
    );

    print_skip_summary(total, &tally);
    let unresolved = principals.stats().failures + roles.stats().failures;
    if unresolved > 0 {
        console::warn(format!(
            "{} identifier(s) could not be resolved; the raw id is shown instead",
            unresolved
        ));
    }

    Ok(rows)
}

pub async fn run(args: RoleEligibilityArgs) -> Result<()> {
    let opts = RoleEligibilityOptions {
        role: args.role.clone(),
    };
    let settings = ReportSettings::resolve(&args.output, &load_report_defaults()?)?;
    settings.sort_keys::<RoleEligibilityRow>(default_sort())?;
    let pivot = args.pivot || args.pivot_output.is_some();

    console::heading("Role eligibility");
    let (_, _, graph) = crate::cmd::connect(args.output.tenant.as_deref()).await?;

    let mut rows = generate(&graph, &opts, &settings).await?;
    let detail = export(&settings, &mut rows, default_sort())?;
    if pivot {
        export_pivot(&settings, &rows, &detail, args.pivot_output)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::pivot::Pivot;

    fn eligibility(principal: Option<&str>, role_id: Option<&str>, role_name: &str) -> Eligibility {
        Eligibility {
            instance: RoleEligibilityInstance {
                id: "i".into(),
                principal_id: principal.map(str::to_string),
                role_definition_id: role_id.map(str::to_string),
                directory_scope_id: Some("/".into()),
                member_type: Some("Direct".into()),
                ..Default::default()
            },
            role_name: role_name.to_string(),
        }
    }

    fn principal(name: &str) -> Principal {
        Principal {
            display_name: name.to_string(),
            name: format!("{}@contoso.com", name.to_lowercase()),
            kind: "user".into(),
            resolved: true,
        }
    }

    #[test]
    fn test_guards_in_order() {
        let present = instance_filter();
        assert_eq!(present.check(&eligibility(None, None, "").instance), Err("has-principal"));
        assert_eq!(present.check(&eligibility(None, Some("r1"), "").instance), Err("has-principal"));
        assert_eq!(present.check(&eligibility(Some("p1"), None, "").instance), Err("has-role"));
        assert!(present.accepts(&eligibility(Some("p1"), Some("r1"), "").instance));

        let filter = eligibility_filter(&RoleEligibilityOptions {
            role: Some("global administrator".into()),
        });
        assert_eq!(
            filter.check(&eligibility(Some("p1"), Some("r1"), "User Administrator")),
            Err("role-matches")
        );
        assert!(filter.accepts(&eligibility(Some("p1"), Some("r1"), "Global Administrator")));
    }

    #[test]
    fn test_pivot_one_row_per_principal() {
        let rows = vec![
            shape(&eligibility(Some("p1"), Some("r1"), "Global Administrator"), &principal("Adele")),
            shape(&eligibility(Some("p1"), Some("r2"), "User Administrator"), &principal("Adele")),
            shape(&eligibility(Some("p2"), Some("r2"), "User Administrator"), &principal("Megan")),
        ];

        let pivot = Pivot::from_rows(&rows);
        assert_eq!(pivot.len(), 2);
        assert_eq!(
            pivot.headers(),
            vec![
                "PrincipalDisplayName",
                "PrincipalName",
                "PrincipalType",
                "Global Administrator",
                "User Administrator"
            ]
        );
        let records: Vec<Vec<String>> = pivot.records().collect();
        assert_eq!(records[0][3..], ["Eligible".to_string(), "Eligible".to_string()]);
        assert_eq!(records[1][3..], [String::new(), "Eligible".to_string()]);
    }

    #[test]
    fn test_shape_uses_placeholder_principal() {
        let placeholder = Principal {
            display_name: "p9".into(),
            name: "p9".into(),
            kind: "unknown".into(),
            resolved: false,
        };
        let row = shape(&eligibility(Some("p9"), Some("r1"), "r1"), &placeholder);
        assert_eq!(row.principal_display_name, "p9");
        assert_eq!(row.principal_type, "unknown");
        assert_eq!(row.principal_id, "p9");
    }
}
