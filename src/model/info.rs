use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Response of `GET /v4/info`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeInfo {
    pub version: Version,
    pub lavaplayer: String,
    pub source_managers: Vec<String>,
    pub filters: Vec<String>,
    pub plugins: Vec<Plugin>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Version {
    pub semver: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Plugin {
    pub name: String,
    pub version: String,
}

impl NodeInfo {
    pub fn supports_filter(&self, name: &str) -> bool {
        self.filters.iter().any(|f| f == name)
    }
}

/// Response of `GET /v4/routeplanner/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutePlannerStatus {
    /// `None` when the node has no route planner configured.
    #[serde(rename = "class")]
    pub kind: Option<RoutePlannerKind>,
    pub details: Option<RoutePlannerDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RoutePlannerKind {
    RotatingIpRoutePlanner,
    NanoIpRoutePlanner,
    RotatingNanoIpRoutePlanner,
    BalancingIpRoutePlanner,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlannerDetails {
    pub ip_block: IpBlock,
    pub failing_addresses: Vec<FailingAddress>,
    // Planner specific, the node sends these as strings.
    pub rotate_index: Option<String>,
    pub ip_index: Option<String>,
    pub current_address: Option<String>,
    pub current_address_index: Option<String>,
    pub block_index: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum IpBlockKind {
    #[serde(rename = "Inet4Address")]
    V4,
    #[serde(rename = "Inet6Address")]
    V6,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IpBlock {
    #[serde(rename = "type")]
    pub kind: IpBlockKind,
    pub size: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailingAddress {
    pub failing_address: String,
    /// Unix timestamp in milliseconds.
    pub failing_timestamp: i64,
    pub failing_time: String,
}

impl FailingAddress {
    pub fn failed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.failing_timestamp)
    }
}
