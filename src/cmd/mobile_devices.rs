//! Managed devices running an OS version below a threshold
//!
//! Devices with no version, or a version that does not parse, are excluded
//! rather than treated as outdated.

use crate::cmd::progress::{create_progress_bar, create_spinner, finish_error, finish_success};
use crate::cmd::{OutputArgs, ReportSettings, console, export, load_report_defaults, print_skip_summary};
use crate::error::{ReportError, Result};
use crate::graph::GraphClient;
use crate::graph::devices::{DeviceStats, DeviceStatsResolver, ManagedDevice, devices_query, list_devices};
use crate::report::cache::LookupCache;
use crate::report::filter::{Filter, SkipTally};
use crate::report::version::Version;
use crate::report::{ReportRow, SortKey};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

#[derive(Args, Debug)]
pub struct MobileDevicesArgs {
    /// Report devices whose OS version is strictly below this (e.g. 17.4)
    #[arg(long, value_name = "VERSION")]
    pub min_version: String,

    /// Only devices with this operating system (e.g. iOS, Android)
    #[arg(long)]
    pub os: Option<String>,

    /// Fetch storage, battery and memory statistics for each reported device
    #[arg(long)]
    pub include_stats: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Clone)]
pub struct MobileDeviceOptions {
    pub threshold: Version,
    pub os: Option<String>,
    pub include_stats: bool,
}

impl MobileDeviceOptions {
    pub fn from_args(args: &MobileDevicesArgs) -> Result<Self> {
        let threshold = args
            .min_version
            .parse::<Version>()
            .map_err(|e| ReportError::InvalidArgument(format!("--min-version: {}", e)))?;

        Ok(Self {
            threshold,
            os: args.os.clone().filter(|o| !o.trim().is_empty()),
            include_stats: args.include_stats,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MobileDeviceRow {
    pub device_name: Option<String>,
    pub user_principal_name: Option<String>,
    pub user_display_name: Option<String>,
    pub operating_system: Option<String>,
    pub client_version: Option<String>,
    pub model: Option<String>,
    pub manufacturer: Option<String>,
    pub compliance_state: Option<String>,
    pub last_sync_date_time: Option<DateTime<Utc>>,
    pub total_storage_bytes: Option<i64>,
    pub free_storage_bytes: Option<i64>,
    pub battery_health_percentage: Option<i32>,
    pub physical_memory_bytes: Option<i64>,
    pub device_id: String,
}

impl ReportRow for MobileDeviceRow {
    const NAME: &'static str = "MobileDevices";
    const COLUMNS: &'static [&'static str] = &[
        "DeviceName",
        "UserPrincipalName",
        "UserDisplayName",
        "OperatingSystem",
        "ClientVersion",
        "Model",
        "Manufacturer",
        "ComplianceState",
        "LastSyncDateTime",
        "TotalStorageBytes",
        "FreeStorageBytes",
        "BatteryHealthPercentage",
        "PhysicalMemoryBytes",
        "DeviceId",
    ];
    const TIME_COLUMNS: &'static [&'static str] = &["LastSyncDateTime"];
}

pub fn default_sort() -> Vec<SortKey> {
    vec![SortKey::asc("UserPrincipalName"), SortKey::asc("DeviceName")]
}

/// Guards in evaluation order; each may assume the ones before it passed
pub fn device_filter(opts: &MobileDeviceOptions) -> Filter<ManagedDevice> {
    let threshold = opts.threshold.clone();
    let os = opts.os.clone();

    Filter::new()
        .guard("version-present", |d: &ManagedDevice| {
            d.os_version.as_deref().is_some_and(|v| !v.trim().is_empty())
        })
        .guard("version-parses", |d: &ManagedDevice| {
            Version::parse_opt(d.os_version.as_deref()).is_some()
        })
        .guard("below-threshold", move |d: &ManagedDevice| {
            Version::parse_opt(d.os_version.as_deref()).is_some_and(|v| v < threshold)
        })
        .guard_if(os.is_some(), "os-matches", move |d: &ManagedDevice| {
            match (&os, d.operating_system.as_deref()) {
                (Some(wanted), Some(actual)) => actual.eq_ignore_ascii_case(wanted),
                _ => false,
            }
        })
}

pub fn shape(device: &ManagedDevice, stats: Option<&DeviceStats>) -> MobileDeviceRow {
    MobileDeviceRow {
        device_name: device.device_name.clone(),
        user_principal_name: device.user_principal_name.clone(),
        user_display_name: device.user_display_name.clone(),
        operating_system: device.operating_system.clone(),
        client_version: device.os_version.clone(),
        model: device.model.clone(),
        manufacturer: device.manufacturer.clone(),
        compliance_state: device.compliance_state.clone(),
        last_sync_date_time: device.last_sync_date_time,
        total_storage_bytes: stats.and_then(|s| s.total_storage_space),
        free_storage_bytes: stats.and_then(|s| s.free_storage_space),
        battery_health_percentage: stats.and_then(|s| s.battery_health_percentage),
        physical_memory_bytes: stats.and_then(|s| s.physical_memory_in_bytes),
        device_id: device.id.clone(),
    }
}

/// Fetch, filter and shape; rows come back unsorted
pub async fn generate(
    graph: &GraphClient,
    opts: &MobileDeviceOptions,
    settings: &ReportSettings,
) -> Result<Vec<MobileDeviceRow>> {
    let query = devices_query(settings.page_size, opts.os.as_deref());

    let spinner = create_spinner("Fetching managed devices...");
    let devices = match list_devices(graph, &query, |n| {
        spinner.set_message(format!("Fetching managed devices... {}", n))
    })
    .await
    {
        Ok(devices) => {
            finish_success(&spinner, &format!("Fetched {} managed devices", devices.len()));
            devices
        }
        Err(e) => {
            finish_error(&spinner, "Failed to fetch managed devices");
            return Err(e);
        }
    };

    let filter = device_filter(opts);
    let mut tally = SkipTally::default();
    let matched: Vec<&ManagedDevice> = devices
        .iter()
        .filter(|d| match filter.check(d) {
            Ok(()) => true,
            Err(guard) => {
                tally.record(guard);
                false
            }
        })
        .collect();
    print_skip_summary(devices.len(), &tally);

    if !opts.include_stats {
        return Ok(matched.into_iter().map(|d| shape(d, None)).collect());
    }

    let mut cache = LookupCache::new(DeviceStatsResolver::new(graph));
    let bar = create_progress_bar(matched.len() as u64, "Device statistics");
    let mut rows = Vec::with_capacity(matched.len());
    for device in matched {
        let stats = cache.resolve(&device.id).await;
        rows.push(shape(device, stats.as_ref()));
        bar.inc(1);
    }
    finish_success(&bar, &format!("Read statistics for {} devices", cache.len()));

    let failures = cache.stats().failures;
    if failures > 0 {
        console::warn(format!(
            "Statistics unavailable for {} device(s); those columns are blank",
            failures
        ));
    }

    Ok(rows)
}

pub async fn run(args: MobileDevicesArgs) -> Result<()> {
    let opts = MobileDeviceOptions::from_args(&args)?;
    let settings = ReportSettings::resolve(&args.output, &load_report_defaults()?)?;
    settings.sort_keys::<MobileDeviceRow>(default_sort())?;

    console::heading(&format!("Devices below OS version {}", opts.threshold));
    let (_, _, graph) = crate::cmd::connect(args.output.tenant.as_deref()).await?;

    let mut rows = generate(&graph, &opts, &settings).await?;
    export(&settings, &mut rows, default_sort())?;
    Ok(())
}
