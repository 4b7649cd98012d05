pub mod auth_methods;
pub mod console;
pub mod group_members;
pub mod inbox_rules;
pub mod login;
pub mod mailbox_permissions;
pub mod mobile_devices;
pub mod progress;
pub mod role_eligibility;
pub mod sign_ins;
pub mod tenant;

use crate::config::{ConfigManager, ReportsConfig, TenantConfig};
use crate::error::{ReportError, Result};
use crate::graph::GraphClient;
use crate::graph::mail::{self, MailUser};
use crate::report::filter::SkipTally;
use crate::report::pivot::{Pivot, PivotSource, pivot_path_for};
use crate::report::{Outcome, ReportRow, Reporter, SortKey, default_output_path, parse_delimiter};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

/// Options shared by every report
#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Tenant to report on (defaults to the active tenant)
    #[arg(long)]
    pub tenant: Option<String>,

    /// CSV output path (default: <reports dir>/<Report>_<timestamp>.csv)
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Field delimiter for the CSV file
    #[arg(long, value_name = "CHAR")]
    pub delimiter: Option<char>,

    /// Print the first N rows to the console after sorting
    #[arg(long, value_name = "N")]
    pub preview: Option<usize>,

    /// Override the sort order (repeatable), e.g. --sort-by CreatedDateTime:desc
    #[arg(long = "sort-by", value_name = "COLUMN[:asc|desc]")]
    pub sort_by: Vec<String>,

    /// Records per page requested from Graph (1-999)
    #[arg(long, value_name = "N")]
    pub page_size: Option<u32>,
}

/// Output options merged with config defaults and validated
#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub output: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub delimiter: u8,
    pub preview: usize,
    pub page_size: u32,
    pub sort_override: Vec<SortKey>,
}

impl ReportSettings {
    pub fn resolve(args: &OutputArgs, defaults: &ReportsConfig) -> Result<Self> {
        let delimiter = parse_delimiter(args.delimiter.unwrap_or(defaults.delimiter))?;

        let page_size = args.page_size.unwrap_or(defaults.page_size);
        if page_size == 0 {
            return Err(ReportError::InvalidArgument("--page-size must be at least 1".into()));
        }

        let sort_override = args
            .sort_by
            .iter()
            .map(|s| s.parse::<SortKey>())
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            output: args.output.clone(),
            output_dir: defaults.output_dir.clone(),
            delimiter,
            preview: args.preview.unwrap_or(defaults.preview_rows),
            page_size,
            sort_override,
        })
    }

    /// Settings for tests and library callers: comma, no preview, full pages
    pub fn to_path(path: impl Into<PathBuf>) -> Self {
        let defaults = ReportsConfig::default();
        Self {
            output: Some(path.into()),
            output_dir: defaults.output_dir,
            delimiter: b',',
            preview: 0,
            page_size: defaults.page_size,
            sort_override: Vec::new(),
        }
    }

    pub fn output_path<R: ReportRow>(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| default_output_path(&self.output_dir, R::NAME, chrono::Local::now()))
    }

    pub fn reporter<R: ReportRow>(&self) -> Reporter {
        Reporter::new(self.output_path::<R>(), self.delimiter, self.preview)
    }

    /// The user's `--sort-by` keys when given, else the report default
    pub fn sort_keys<R: ReportRow>(&self, default: Vec<SortKey>) -> Result<Vec<SortKey>> {
        let keys = if self.sort_override.is_empty() {
            default
        } else {
            self.sort_override.clone()
        };
        SortKey::validate::<R>(&keys)?;
        Ok(keys)
    }
}

/// Load config, pick the tenant and build a Graph client from its cached token
pub async fn connect(tenant: Option<&str>) -> Result<(ConfigManager, TenantConfig, GraphClient)> {
    let config = ConfigManager::load()?;

    let tenant = match tenant {
        Some(name) => config.get_tenant(name)?,
        None => config.get_active_tenant()?.ok_or_else(|| {
            ReportError::ConfigError(
                "No active tenant. Run 'm365report login <name>' or pass --tenant".into(),
            )
        })?,
    };

    console::info(format!("Tenant: {}", tenant.name.cyan().bold()));

    let graph = GraphClient::from_config(&config, &tenant.name).await?;
    Ok((config, tenant, graph))
}

/// Load just the report defaults from config.toml
pub fn load_report_defaults() -> Result<ReportsConfig> {
    Ok(ConfigManager::load()?.load_config()?.reports)
}

/// The single `--mailbox` target, or every member mailbox in the tenant
///
/// A named mailbox that does not exist is fatal.
pub async fn target_mailboxes(
    graph: &GraphClient,
    mailbox: Option<&str>,
    page_size: u32,
) -> Result<Vec<MailUser>> {
    if let Some(identity) = mailbox {
        let user = mail::get_mailbox(graph, identity).await?;
        console::info(format!("Mailbox: {}", user.address()));
        return Ok(vec![user]);
    }

    let spinner = progress::create_spinner("Enumerating mailboxes...");
    match mail::list_mailboxes(graph, page_size).await {
        Ok(users) => {
            progress::finish_success(&spinner, &format!("Found {} mailboxes", users.len()));
            Ok(users)
        }
        Err(e) => {
            progress::finish_error(&spinner, "Failed to enumerate mailboxes");
            Err(e)
        }
    }
}

/// One-line summary of what the filter dropped
pub fn print_skip_summary(total: usize, tally: &SkipTally) {
    if tally.total() == 0 {
        console::info(format!("{} record(s) fetched, all matched", total));
        return;
    }

    let reasons: Vec<String> = tally
        .counts()
        .iter()
        .map(|(guard, count)| format!("{} {}", count, guard))
        .collect();
    console::info(format!(
        "{} record(s) fetched, {} skipped ({})",
        total,
        tally.total(),
        reasons.join(", ")
    ));
}

/// Sort with the override or `default_sort`, then preview and write
pub fn export<R: ReportRow>(
    settings: &ReportSettings,
    rows: &mut Vec<R>,
    default_sort: Vec<SortKey>,
) -> Result<Outcome> {
    let keys = settings.sort_keys::<R>(default_sort)?;
    settings.reporter::<R>().report(rows, &keys)
}

/// Write the pivoted companion of a detail report
///
/// Nothing is written when the detail report was empty. Without an explicit
/// path the pivot lands next to the detail file as `<stem>_Pivot.csv`.
pub fn export_pivot<R: PivotSource>(
    settings: &ReportSettings,
    rows: &[R],
    detail: &Outcome,
    pivot_output: Option<PathBuf>,
) -> Result<Outcome> {
    let Outcome::Written { path, .. } = detail else {
        return Ok(Outcome::Empty);
    };

    let target = pivot_output.unwrap_or_else(|| pivot_path_for(path));
    Pivot::from_rows(rows).write(&target, settings.delimiter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_merge_config_defaults() {
        let defaults = ReportsConfig {
            output_dir: PathBuf::from("/tmp/reports"),
            delimiter: ';',
            preview_rows: 5,
            page_size: 200,
        };
        let settings = ReportSettings::resolve(&OutputArgs::default(), &defaults).unwrap();
        assert_eq!(settings.delimiter, b';');
        assert_eq!(settings.preview, 5);
        assert_eq!(settings.page_size, 200);
        assert!(settings.output.is_none());
    }

    #[test]
    fn test_settings_reject_bad_arguments_before_any_call() {
        let defaults = ReportsConfig::default();

        let bad_delimiter = OutputArgs {
            delimiter: Some('"'),
            ..Default::default()
        };
        assert!(matches!(
            ReportSettings::resolve(&bad_delimiter, &defaults),
            Err(ReportError::InvalidArgument(_))
        ));

        let bad_sort = OutputArgs {
            sort_by: vec!["Name:upward".into()],
            ..Default::default()
        };
        assert!(ReportSettings::resolve(&bad_sort, &defaults).is_err());

        let zero_page = OutputArgs {
            page_size: Some(0),
            ..Default::default()
        };
        assert!(ReportSettings::resolve(&zero_page, &defaults).is_err());
    }
}
