use serde::Deserialize;

use super::seed::{FarSeed, PdrSeed, QerSeed, UrrSeed};
use super::telemetry::{LoggingConfig, TelemetryConfig};

/// Main configuration structure.
///
/// Describes the process-lifetime constants (interfaces, VLANs, the
/// masquerade/flow-accounting switches) plus the initial contents of the
/// rule tables. The control plane remains the authoritative, continuously
/// updating writer of those tables once the process is up; this file only
/// seeds the tables so the datapath can come up pre-provisioned.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// N3 (radio access network side) interface name, e.g. "n3".
    pub n3_interface: String,
    /// N6 (data network side) interface name, e.g. "n6".
    pub n6_interface: String,
    /// 802.1Q VLAN tag expected on N3, 0 if untagged.
    #[serde(default)]
    pub n3_vlan: u16,
    /// 802.1Q VLAN tag expected on N6, 0 if untagged.
    #[serde(default)]
    pub n6_vlan: u16,
    /// Enable source NAT on the uplink / destination NAT on the downlink.
    #[serde(default)]
    pub masquerade: bool,
    /// Enable per-flow accounting.
    #[serde(default)]
    pub flowact: bool,
    /// Initial Packet Detection Rules.
    #[serde(default)]
    pub pdrs: Vec<PdrSeed>,
    /// Initial Forwarding Action Rules.
    #[serde(default)]
    pub fars: Vec<FarSeed>,
    /// Initial QoS Enforcement Rules.
    #[serde(default)]
    pub qers: Vec<QerSeed>,
    /// Initial Usage Reporting Rules (counters start at zero regardless;
    /// only the set of provisioned `urr_id`s is meaningful here).
    #[serde(default)]
    pub urrs: Vec<UrrSeed>,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
