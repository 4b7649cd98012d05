//! Registered authentication methods per user
//!
//! The detail report has one row per user × method; users with no methods
//! registered get a single `none` row so they still appear.

use crate::cmd::progress::{create_spinner, finish_error, finish_success};
use crate::cmd::{
    OutputArgs, ReportSettings, console, export, export_pivot, load_report_defaults,
    print_skip_summary,
};
use crate::error::Result;
use crate::graph::GraphClient;
use crate::graph::auth_methods::{UserRegistrationDetails, list_registration_details, registration_query};
use crate::report::filter::{Filter, SkipTally};
use crate::report::pivot::PivotSource;
use crate::report::{ReportRow, SortKey};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

pub const NO_METHOD: &str = "none";

#[derive(Args, Debug)]
pub struct AuthMethodsArgs {
    /// Only this user principal name
    #[arg(long)]
    pub user: Option<String>,

    /// Only rows for this method (e.g. microsoftAuthenticatorPush, fido2)
    #[arg(long)]
    pub method: Option<String>,

    /// Only users without MFA registered
    #[arg(long)]
    pub without_mfa: bool,

    /// Also write the pivoted report (one row per user)
    #[arg(long)]
    pub pivot: bool,

    /// Pivoted report path (implies --pivot)
    #[arg(long, value_name = "PATH")]
    pub pivot_output: Option<PathBuf>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Clone, Default)]
pub struct AuthMethodOptions {
    pub user: Option<String>,
    pub method: Option<String>,
    pub without_mfa: bool,
}

impl From<&AuthMethodsArgs> for AuthMethodOptions {
    fn from(args: &AuthMethodsArgs) -> Self {
        Self {
            user: args.user.clone(),
            method: args.method.clone(),
            without_mfa: args.without_mfa,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthMethodRow {
    pub user_principal_name: Option<String>,
    pub user_display_name: Option<String>,
    pub is_admin: Option<bool>,
    pub is_mfa_registered: Option<bool>,
    pub is_mfa_capable: Option<bool>,
    pub is_passwordless_capable: Option<bool>,
    pub default_mfa_method: Option<String>,
    pub method: String,
    pub last_updated_date_time: Option<DateTime<Utc>>,
}

impl ReportRow for AuthMethodRow {
    const NAME: &'static str = "AuthMethods";
    const COLUMNS: &'static [&'static str] = &[
        "UserPrincipalName",
        "UserDisplayName",
        "IsAdmin",
        "IsMfaRegistered",
        "IsMfaCapable",
        "IsPasswordlessCapable",
        "DefaultMfaMethod",
        "Method",
        "LastUpdatedDateTime",
    ];
    const TIME_COLUMNS: &'static [&'static str] = &["LastUpdatedDateTime"];
}

impl PivotSource for AuthMethodRow {
    const KEY_COLUMNS: &'static [&'static str] = &["UserPrincipalName", "UserDisplayName"];

    fn entity_key(&self) -> Vec<String> {
        vec![
            self.user_principal_name.clone().unwrap_or_default(),
            self.user_display_name.clone().unwrap_or_default(),
        ]
    }

    fn category(&self) -> Option<String> {
        (self.method != NO_METHOD).then(|| self.method.clone())
    }

    fn cell(&self) -> String {
        "Registered".to_string()
    }
}

pub fn default_sort() -> Vec<SortKey> {
    vec![SortKey::asc("UserPrincipalName"), SortKey::asc("Method")]
}

/// User-level guards, applied before fan-out
pub fn user_filter(opts: &AuthMethodOptions) -> Filter<UserRegistrationDetails> {
    Filter::new()
        .guard("has-upn", |u: &UserRegistrationDetails| {
            u.user_principal_name.as_deref().is_some_and(|n| !n.is_empty())
        })
        .guard_if(opts.without_mfa, "without-mfa", |u: &UserRegistrationDetails| {
            u.is_mfa_registered == Some(false)
        })
}

/// Row-level guards, applied after fan-out
pub fn method_filter(opts: &AuthMethodOptions) -> Filter<AuthMethodRow> {
    let method = opts.method.clone();

    Filter::new().guard_if(method.is_some(), "method-matches", move |r: &AuthMethodRow| {
        method
            .as_deref()
            .is_some_and(|wanted| r.method.eq_ignore_ascii_case(wanted))
    })
}

/// Fan one user out into a row per registered method
pub fn shape(user: &UserRegistrationDetails) -> Vec<AuthMethodRow> {
    let row = |method: &str| AuthMethodRow {
        user_principal_name: user.user_principal_name.clone(),
        user_display_name: user.user_display_name.clone(),
        is_admin: user.is_admin,
        is_mfa_registered: user.is_mfa_registered,
        is_mfa_capable: user.is_mfa_capable,
        is_passwordless_capable: user.is_passwordless_capable,
        default_mfa_method: user.default_mfa_method.clone(),
        method: method.to_string(),
        last_updated_date_time: user.last_updated_date_time,
    };

    let methods: Vec<&str> = user
        .methods_registered
        .iter()
        .map(String::as_str)
        .filter(|m| !m.is_empty())
        .collect();

    if methods.is_empty() {
        vec![row(NO_METHOD)]
    } else {
        methods.into_iter().map(row).collect()
    }
}

pub async fn generate(
    graph: &GraphClient,
    opts: &AuthMethodOptions,
    settings: &ReportSettings,
) -> Result<Vec<AuthMethodRow>> {
    let query = registration_query(settings.page_size, opts.user.as_deref());

    let spinner = create_spinner("Fetching registration details...");
    let users = match list_registration_details(graph, &query, |n| {
        spinner.set_message(format!("Fetching registration details... {}", n))
    })
    .await
    {
        Ok(users) => {
            finish_success(&spinner, &format!("Fetched {} users", users.len()));
            users
        }
        Err(e) => {
            finish_error(&spinner, "Failed to fetch registration details");
            return Err(e);
        }
    };

    let users_filter = user_filter(opts);
    let rows_filter = method_filter(opts);
    let mut tally = SkipTally::default();
    let mut rows = Vec::new();

    for user in &users {
        if let Err(guard) = users_filter.check(user) {
            tally.record(guard);
            continue;
        }
        rows.extend(shape(user).into_iter().filter(|r| rows_filter.accepts(r)));
    }
    print_skip_summary(users.len(), &tally);

    Ok(rows)
}

pub async fn run(args: AuthMethodsArgs) -> Result<()> {
    let opts = AuthMethodOptions::from(&args);
    let settings = ReportSettings::resolve(&args.output, &load_report_defaults()?)?;
    settings.sort_keys::<AuthMethodRow>(default_sort())?;
    let pivot = args.pivot || args.pivot_output.is_some();

    console::heading("Authentication methods");
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

    fn user(upn: &str, mfa: bool, methods: &[&str]) -> UserRegistrationDetails {
        UserRegistrationDetails {
            id: upn.to_string(),
            user_principal_name: Some(upn.to_string()),
            user_display_name: Some(upn.split('@').next().unwrap_or_default().to_string()),
            is_mfa_registered: Some(mfa),
            methods_registered: methods.iter().map(|m| m.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_fan_out_one_row_per_method() {
        let rows = shape(&user("adele@contoso.com", true, &["fido2", "email"]));
        let methods: Vec<_> = rows.iter().map(|r| r.method.as_str()).collect();
        assert_eq!(methods, vec!["fido2", "email"]);
        assert!(rows.iter().all(|r| r.is_mfa_registered == Some(true)));
    }

    #[test]
    fn test_user_without_methods_gets_none_row() {
        let rows = shape(&user("megan@contoso.com", false, &[]));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].method, NO_METHOD);
    }

    #[test]
    fn test_filters() {
        let opts = AuthMethodOptions {
            without_mfa: true,
            method: Some("FIDO2".into()),
            ..Default::default()
        };
        let users = user_filter(&opts);
        assert_eq!(users.check(&user("a@contoso.com", true, &[])), Err("without-mfa"));
        assert!(users.accepts(&user("b@contoso.com", false, &[])));

        let mut anonymous = user("c@contoso.com", false, &[]);
        anonymous.user_principal_name = None;
        assert_eq!(users.check(&anonymous), Err("has-upn"));

        let methods = method_filter(&opts);
        let rows = shape(&user("b@contoso.com", false, &["fido2", "sms"]));
        let kept: Vec<_> = rows.iter().filter(|r| methods.accepts(r)).collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].method, "fido2");
    }

    #[test]
    fn test_pivot_keeps_users_without_methods() {
        let mut rows = shape(&user("adele@contoso.com", true, &["fido2", "sms"]));
        rows.extend(shape(&user("megan@contoso.com", false, &[])));

        let pivot = Pivot::from_rows(&rows);
        assert_eq!(pivot.len(), 2);
        assert_eq!(pivot.categories(), &["fido2".to_string(), "sms".to_string()]);

        let records: Vec<Vec<String>> = pivot.records().collect();
        assert_eq!(records[0], vec!["adele@contoso.com", "adele", "Registered", "Registered"]);
        assert_eq!(records[1], vec!["megan@contoso.com", "megan", "", ""]);
    }
}
