//! Intune managed devices
//!
//! Required permissions:
//! - DeviceManagementManagedDevices.Read.All

use crate::error::Result;
use crate::graph::GraphClient;
use crate::graph::query::{CollectionQuery, odata_string, path_key};
use crate::report::cache::Resolver;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fields requested from the device collection
pub const DEVICE_SELECT: &[&str] = &[
    "id",
    "deviceName",
    "userId",
    "userPrincipalName",
    "userDisplayName",
    "operatingSystem",
    "osVersion",
    "model",
    "manufacturer",
    "lastSyncDateTime",
    "complianceState",
    "managementAgent",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagedDevice {
    pub id: String,
    pub device_name: Option<String>,
    pub user_id: Option<String>,
    pub user_principal_name: Option<String>,
    pub user_display_name: Option<String>,
    pub operating_system: Option<String>,
    pub os_version: Option<String>,
    pub model: Option<String>,
    pub manufacturer: Option<String>,
    pub last_sync_date_time: Option<DateTime<Utc>>,
    pub compliance_state: Option<String>,
    pub management_agent: Option<String>,
}

/// Hardware statistics Graph only returns when a single device is read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceStats {
    pub total_storage_space: Option<i64>,
    pub free_storage_space: Option<i64>,
    pub battery_health_percentage: Option<i32>,
    #[serde(skip)]
    pub physical_memory_in_bytes: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceStatsEnvelope {
    #[serde(default)]
    hardware_information: Option<DeviceStats>,
    #[serde(default)]
    physical_memory_in_bytes: Option<i64>,
}

/// Base query for managed devices, optionally narrowed to one operating system
pub fn devices_query(page_size: u32, operating_system: Option<&str>) -> CollectionQuery {
    let query = CollectionQuery::new("deviceManagement/managedDevices")
        .select(DEVICE_SELECT)
        .page_size(page_size);

    match operating_system {
        Some(os) => query.filter(format!("operatingSystem eq {}", odata_string(os))),
        None => query,
    }
}

pub async fn list_devices(
    client: &GraphClient,
    query: &CollectionQuery,
    on_page: impl FnMut(usize),
) -> Result<Vec<ManagedDevice>> {
    client.get_all_pages_observed(query, on_page).await
}

/// Read hardware statistics for one device (beta endpoint)
pub async fn get_device_stats(client: &GraphClient, device_id: &str) -> Result<DeviceStats> {
    let envelope: DeviceStatsEnvelope = client
        .get_beta(&format!(
            "deviceManagement/managedDevices/{}?$select=id,hardwareInformation,physicalMemoryInBytes",
            path_key(device_id)
        ))
        .await?;

    let mut stats = envelope.hardware_information.unwrap_or_default();
    stats.physical_memory_in_bytes = envelope.physical_memory_in_bytes.filter(|b| *b > 0);
    Ok(stats)
}

/// Device id → hardware statistics; a failed read leaves the statistics blank
pub struct DeviceStatsResolver<'a> {
    client: &'a GraphClient,
}

impl<'a> DeviceStatsResolver<'a> {
    pub fn new(client: &'a GraphClient) -> Self {
        Self { client }
    }
}

impl Resolver for DeviceStatsResolver<'_> {
    type Value = Option<DeviceStats>;
    const NAME: &'static str = "device-stats";

    async fn fetch(&self, key: &str) -> Result<Self::Value> {
        get_device_stats(self.client, key).await.map(Some)
    }

    fn placeholder(&self, _key: &str) -> Self::Value {
        None
    }
}
