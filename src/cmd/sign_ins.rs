//! Sign-in log export over a lookback window
//!
//! Old `SignIns_*.csv` files in the output directory are pruned before the
//! fetch so the directory does not grow without bound on scheduled runs.

use crate::cmd::progress::{create_spinner, finish_error, finish_success};
use crate::cmd::{OutputArgs, ReportSettings, console, export, load_report_defaults, print_skip_summary};
use crate::error::{ReportError, Result};
use crate::graph::GraphClient;
use crate::graph::sign_ins::{SignInFilter, SignInLog, get_sign_in_logs};
use crate::report::filter::{Filter, SkipTally};
use crate::report::retention;
use crate::report::{ReportRow, SortKey};
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use serde::Serialize;
use std::path::Path;
use std::time::SystemTime;

const DEFAULT_LOOKBACK_HOURS: u32 = 24;
const DEFAULT_RETENTION_DAYS: u32 = 30;

#[derive(Args, Debug)]
pub struct SignInsArgs {
    /// Look back this many hours (default 24)
    #[arg(long)]
    pub hours: Option<u32>,

    /// Look back this many days
    #[arg(long)]
    pub days: Option<u32>,

    /// Only sign-ins by this user principal name
    #[arg(long)]
    pub user: Option<String>,

    /// Only sign-ins to this application display name
    #[arg(long)]
    pub app: Option<String>,

    /// Only failed sign-ins
    #[arg(long)]
    pub failures_only: bool,

    /// Only interactive sign-ins
    #[arg(long)]
    pub interactive_only: bool,

    /// Delete previous SignIns_*.csv exports older than this many days (0 disables)
    #[arg(long, default_value_t = DEFAULT_RETENTION_DAYS)]
    pub retention_days: u32,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Lookback window; exactly one unit is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookback {
    Hours(u32),
    Days(u32),
}

impl Lookback {
    pub fn from_args(hours: Option<u32>, days: Option<u32>) -> Result<Self> {
        let lookback = match (hours, days) {
            (Some(_), Some(_)) => {
                return Err(ReportError::InvalidArgument(
                    "--hours and --days are mutually exclusive".into(),
                ));
            }
            (Some(h), None) => Lookback::Hours(h),
            (None, Some(d)) => Lookback::Days(d),
            (None, None) => Lookback::Hours(DEFAULT_LOOKBACK_HOURS),
        };

        if matches!(lookback, Lookback::Hours(0) | Lookback::Days(0)) {
            return Err(ReportError::InvalidArgument(
                "lookback window must be greater than zero".into(),
            ));
        }
        Ok(lookback)
    }

    pub fn duration(&self) -> Duration {
        match *self {
            Lookback::Hours(h) => Duration::hours(i64::from(h)),
            Lookback::Days(d) => Duration::days(i64::from(d)),
        }
    }

    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.duration()
    }
}

impl std::fmt::Display for Lookback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lookback::Hours(h) => write!(f, "{} hour(s)", h),
            Lookback::Days(d) => write!(f, "{} day(s)", d),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignInOptions {
    pub lookback: Lookback,
    pub user: Option<String>,
    pub app: Option<String>,
    pub failures_only: bool,
    pub interactive_only: bool,
    pub retention_days: u32,
}

impl SignInOptions {
    pub fn from_args(args: &SignInsArgs) -> Result<Self> {
        Ok(Self {
            lookback: Lookback::from_args(args.hours, args.days)?,
            user: args.user.clone(),
            app: args.app.clone(),
            failures_only: args.failures_only,
            interactive_only: args.interactive_only,
            retention_days: args.retention_days,
        })
    }

    pub fn server_filter(&self, now: DateTime<Utc>) -> SignInFilter {
        SignInFilter {
            since: self.lookback.since(now),
            user: self.user.clone(),
            app: self.app.clone(),
            failures_only: self.failures_only,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignInRow {
    pub created_date_time: Option<DateTime<Utc>>,
    pub user_principal_name: Option<String>,
    pub user_display_name: Option<String>,
    pub app_display_name: Option<String>,
    pub resource_display_name: Option<String>,
    pub ip_address: Option<String>,
    pub city: Option<String>,
    pub country_or_region: Option<String>,
    pub client_app_used: Option<String>,
    pub is_interactive: Option<bool>,
    pub error_code: Option<i32>,
    pub failure_reason: Option<String>,
    pub conditional_access_status: Option<String>,
    pub operating_system: Option<String>,
    pub browser: Option<String>,
    pub device_id: Option<String>,
    pub risk_level_during_sign_in: Option<String>,
}

impl ReportRow for SignInRow {
    const NAME: &'static str = "SignIns";
    const COLUMNS: &'static [&'static str] = &[
        "CreatedDateTime",
        "UserPrincipalName",
        "UserDisplayName",
        "AppDisplayName",
        "ResourceDisplayName",
        "IpAddress",
        "City",
        "CountryOrRegion",
        "ClientAppUsed",
        "IsInteractive",
        "ErrorCode",
        "FailureReason",
        "ConditionalAccessStatus",
        "OperatingSystem",
        "Browser",
        "DeviceId",
        "RiskLevelDuringSignIn",
    ];
    const TIME_COLUMNS: &'static [&'static str] = &["CreatedDateTime"];
}

pub fn default_sort() -> Vec<SortKey> {
    vec![SortKey::desc("CreatedDateTime"), SortKey::asc("UserPrincipalName")]
}

/// Client-side guards for what the server filter cannot express
pub fn sign_in_filter(opts: &SignInOptions) -> Filter<SignInLog> {
    Filter::new()
        .guard("has-timestamp", |s: &SignInLog| s.created_date_time.is_some())
        .guard_if(opts.interactive_only, "interactive", |s: &SignInLog| {
            s.is_interactive == Some(true)
        })
        .guard_if(opts.failures_only, "failed", |s: &SignInLog| {
            s.status
                .as_ref()
                .and_then(|st| st.error_code)
                .is_some_and(|code| code != 0)
        })
}

pub fn shape(log: &SignInLog) -> SignInRow {
    let status = log.status.as_ref();
    let device = log.device_detail.as_ref();
    let location = log.location.as_ref();

    SignInRow {
        created_date_time: log.created_date_time,
        user_principal_name: log.user_principal_name.clone(),
        user_display_name: log.user_display_name.clone(),
        app_display_name: log.app_display_name.clone(),
        resource_display_name: log.resource_display_name.clone(),
        ip_address: log.ip_address.clone(),
        city: location.and_then(|l| l.city.clone()),
        country_or_region: location.and_then(|l| l.country_or_region.clone()),
        client_app_used: log.client_app_used.clone(),
        is_interactive: log.is_interactive,
        error_code: status.and_then(|s| s.error_code),
        failure_reason: status
            .and_then(|s| s.failure_reason.clone())
            .filter(|r| !r.is_empty()),
        conditional_access_status: log.conditional_access_status.clone(),
        operating_system: device.and_then(|d| d.operating_system.clone()),
        browser: device.and_then(|d| d.browser.clone()),
        device_id: device.and_then(|d| d.device_id.clone()).filter(|id| !id.is_empty()),
        risk_level_during_sign_in: log.risk_level_during_sign_in.clone(),
    }
}

/// Remove earlier exports older than `retention_days` from `dir`
pub fn prune_old_exports(dir: &Path, retention_days: u32, now: SystemTime) -> Result<usize> {
    if retention_days == 0 {
        return Ok(0);
    }

    let prefix = format!("{}_", SignInRow::NAME);
    let removed = retention::prune(dir, &prefix, ".csv", retention::days(retention_days), now)?;
    if !removed.is_empty() {
        console::info(format!(
            "Pruned {} export(s) older than {} day(s) from {}",
            removed.len(),
            retention_days,
            dir.display()
        ));
    }
    Ok(removed.len())
}

pub async fn generate(
    graph: &GraphClient,
    opts: &SignInOptions,
    settings: &ReportSettings,
    now: DateTime<Utc>,
) -> Result<Vec<SignInRow>> {
    let query = opts.server_filter(now).to_query(settings.page_size);

    let spinner = create_spinner("Fetching sign-in logs...");
    let logs = match get_sign_in_logs(graph, &query, |n| {
        spinner.set_message(format!("Fetching sign-in logs... {}", n))
    })
    .await
    {
        Ok(logs) => {
            finish_success(&spinner, &format!("Fetched {} sign-ins", logs.len()));
            logs
        }
        Err(e) => {
            finish_error(&spinner, "Failed to fetch sign-in logs");
            return Err(e);
        }
    };

    let filter = sign_in_filter(opts);
    let mut tally = SkipTally::default();
    let mut rows = Vec::with_capacity(logs.len());
    for log in &logs {
        match filter.check(log) {
            Ok(()) => rows.push(shape(log)),
            Err(guard) => tally.record(guard),
        }
    }
    print_skip_summary(logs.len(), &tally);

    Ok(rows)
}

pub async fn run(args: SignInsArgs) -> Result<()> {
    let opts = SignInOptions::from_args(&args)?;
    let settings = ReportSettings::resolve(&args.output, &load_report_defaults()?)?;
    settings.sort_keys::<SignInRow>(default_sort())?;

    console::heading(&format!("Sign-ins over the last {}", opts.lookback));

    let output_path = settings.output_path::<SignInRow>();
    let export_dir = output_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    prune_old_exports(export_dir, opts.retention_days, SystemTime::now())?;

    let (_, _, graph) = crate::cmd::connect(args.output.tenant.as_deref()).await?;

    let mut rows = generate(&graph, &opts, &settings, Utc::now()).await?;
    let settings = ReportSettings {
        output: Some(output_path),
        ..settings
    };
    export(&settings, &mut rows, default_sort())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::sign_ins::{DeviceDetail, SignInLocation, SignInStatus};
    use chrono::TimeZone;

    fn options() -> SignInOptions {
        SignInOptions {
            lookback: Lookback::Hours(24),
            user: None,
            app: None,
            failures_only: false,
            interactive_only: false,
            retention_days: 30,
        }
    }

    fn log(id: &str, interactive: Option<bool>, error_code: Option<i32>) -> SignInLog {
        SignInLog {
            id: id.to_string(),
            created_date_time: Some(Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap()),
            is_interactive: interactive,
            status: Some(SignInStatus {
                error_code,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_lookback_defaults_and_validation() {
        assert_eq!(Lookback::from_args(None, None).unwrap(), Lookback::Hours(24));
        assert_eq!(Lookback::from_args(None, Some(7)).unwrap(), Lookback::Days(7));
        assert!(matches!(
            Lookback::from_args(Some(1), Some(1)),
            Err(ReportError::InvalidArgument(_))
        ));
        assert!(Lookback::from_args(Some(0), None).is_err());
        assert!(Lookback::from_args(None, Some(0)).is_err());
    }

    #[test]
    fn test_since_subtracts_window() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        assert_eq!(
            Lookback::Days(2).since(now),
            Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap()
        );
        let filter = options().server_filter(now);
        assert_eq!(filter.since, Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_interactive_only_guard() {
        let filter = sign_in_filter(&SignInOptions {
            interactive_only: true,
            ..options()
        });
        assert!(filter.accepts(&log("a", Some(true), Some(0))));
        assert_eq!(filter.check(&log("b", Some(false), Some(0))), Err("interactive"));
        assert_eq!(filter.check(&log("c", None, Some(0))), Err("interactive"));
    }

    #[test]
    fn test_missing_timestamp_is_excluded() {
        let filter = sign_in_filter(&options());
        let mut undated = log("a", Some(true), Some(0));
        undated.created_date_time = None;
        assert_eq!(filter.check(&undated), Err("has-timestamp"));
    }

    #[test]
    fn test_shape_flattens_nested_details() {
        let mut l = log("a", Some(true), Some(50126));
        l.status.as_mut().unwrap().failure_reason = Some("Invalid username or password.".into());
        l.device_detail = Some(DeviceDetail {
            operating_system: Some("Windows10".into()),
            browser: Some("Edge 129".into()),
            device_id: Some(String::new()),
            ..Default::default()
        });
        l.location = Some(SignInLocation {
            city: Some("Oslo".into()),
            country_or_region: Some("NO".into()),
            ..Default::default()
        });

        let row = shape(&l);
        assert_eq!(row.error_code, Some(50126));
        assert_eq!(row.city.as_deref(), Some("Oslo"));
        assert_eq!(row.browser.as_deref(), Some("Edge 129"));
        assert!(row.device_id.is_none());
        assert_eq!(row, shape(&l));
    }

    #[test]
    fn test_retention_zero_disables_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("SignIns_20200101_000000.csv");
        std::fs::write(&old, "x").unwrap();

        let far_future = SystemTime::now() + retention::days(3650);
        assert_eq!(prune_old_exports(dir.path(), 0, far_future).unwrap(), 0);
        assert!(old.exists());

        assert_eq!(prune_old_exports(dir.path(), 30, far_future).unwrap(), 1);
        assert!(!old.exists());
    }

    #[test]
    fn test_sort_newest_first() {
        let mut rows: Vec<SignInRow> = ["2026-10-15T08:00:00Z", "2026-10-15T10:00:00Z"]
            .iter()
            .map(|ts| {
                let mut l = log("x", None, None);
                l.created_date_time = Some(ts.parse().unwrap());
                shape(&l)
            })
            .collect();
        crate::report::sort_rows(&mut rows, &default_sort()).unwrap();
        assert_eq!(
            rows[0].created_date_time,
            Some("2026-10-15T10:00:00Z".parse().unwrap())
        );
    }
}
