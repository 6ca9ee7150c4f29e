//! Static seed data for the PDR/FAR/QER/URR tables, deserialized from TOML
//! and converted into the `#[repr(C)]` map value types shared with the
//! datapath. This only covers base provisioning: SDF sub-rules and
//! per-session state are expected to arrive from the control plane at
//! runtime, not from the static config file.

use std::net::{Ipv4Addr, Ipv6Addr};

use serde::Deserialize;
use upf_ebpf_common::far::{action, FarInfo, OuterHeaderCreation};
use upf_ebpf_common::pdr::PdrInfo;
use upf_ebpf_common::qer::QerInfo;
use upf_ebpf_common::wire::{GATE_CLOSED, GATE_OPEN};

use crate::error::ConfigError;

/// How a PDR seed entry is keyed: the uplink table is keyed by TEID, the
/// downlink tables by the UE's assigned IPv4 or IPv6 address.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", tag = "direction")]
pub enum PdrKey {
    Uplink { teid: u32 },
    DownlinkV4 { ue_addr: Ipv4Addr },
    DownlinkV6 { ue_addr: Ipv6Addr },
}

#[derive(Debug, Clone, Deserialize)]
pub struct PdrSeed {
    pub pdr_id: u32,
    pub local_seid: u64,
    #[serde(default)]
    pub imsi: u64,
    pub far_id: u32,
    pub qer_id: u32,
    #[serde(default)]
    pub urr_id: u32,
    #[serde(flatten)]
    pub key: PdrKey,
    /// Outer header already removed by the time this PDR is consulted:
    /// "gtp_u_udp_ipv4" for an uplink PDR matching a GTP-U tunnel, "none"
    /// for a downlink PDR matching a native IP destination.
    #[serde(default = "default_outer_header_removal")]
    pub outer_header_removal: String,
}

fn default_outer_header_removal() -> String {
    "none".to_string()
}

impl PdrSeed {
    pub fn to_info(&self) -> Result<PdrInfo, ConfigError> {
        let mut info = PdrInfo::default();
        info.local_seid = self.local_seid;
        info.imsi = self.imsi;
        info.pdr_id = self.pdr_id;
        info.far_id = self.far_id;
        info.qer_id = self.qer_id;
        info.urr_id = self.urr_id;
        info.outer_header_removal = parse_outer_header_removal(&self.outer_header_removal)?;
        Ok(info)
    }
}

fn parse_outer_header_removal(s: &str) -> Result<u8, ConfigError> {
    match s {
        "gtp_u_udp_ipv4" => Ok(0),
        "gtp_u_udp_ipv6" => Ok(1),
        "udp_ipv4" => Ok(2),
        "udp_ipv6" => Ok(3),
        "ipv4" => Ok(4),
        "ipv6" => Ok(5),
        "none" => Ok(0xFF),
        other => Err(ConfigError::Invalid(format!(
            "unknown outer_header_removal {other:?}"
        ))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FarSeed {
    pub far_id: u32,
    /// Actions this FAR requests: any of "drop", "forward", "buffer",
    /// "notify_cp", "duplicate".
    pub actions: Vec<String>,
    /// Set when this FAR adds GTP-U/IPv4 encapsulation on the downlink.
    #[serde(default)]
    pub gtp_u_ipv4: Option<GtpEncapSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GtpEncapSeed {
    pub teid: u32,
    /// UPF-side tunnel endpoint.
    pub local_ip: Ipv4Addr,
    /// Peer GTP-U endpoint, e.g. the gNB address.
    pub remote_ip: Ipv4Addr,
    /// Transport-level marking; the outer IPv4 ToS is this value's high
    /// byte.
    #[serde(default)]
    pub transport_level_marking: u16,
}

impl FarSeed {
    pub fn to_info(&self) -> Result<FarInfo, ConfigError> {
        let mut info = FarInfo::default();
        info.action_mask = 0;
        for a in &self.actions {
            info.action_mask |= match a.as_str() {
                "drop" => action::DROP,
                "forward" => action::FORWARD,
                "buffer" => action::BUFFER,
                "notify_cp" => action::NOTIFY_CP,
                "duplicate" => action::DUPLICATE,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "unknown FAR action {other:?}"
                    )))
                }
            };
        }
        if let Some(ref gtp) = self.gtp_u_ipv4 {
            info.outer_header_creation = OuterHeaderCreation::GtpUUdpIpv4 as u8;
            info.teid = gtp.teid;
            info.tunnel_src_addr = u32::from(gtp.local_ip);
            info.tunnel_dst_addr = u32::from(gtp.remote_ip);
            info.transport_level_marking = gtp.transport_level_marking;
        } else {
            info.outer_header_creation = OuterHeaderCreation::None as u8;
        }
        Ok(info)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QerSeed {
    pub qer_id: u32,
    #[serde(default)]
    pub ul_gate_open: bool,
    #[serde(default)]
    pub dl_gate_open: bool,
    #[serde(default)]
    pub ul_maximum_bitrate_bps: u64,
    #[serde(default)]
    pub dl_maximum_bitrate_bps: u64,
    #[serde(default)]
    pub qfi: u8,
}

impl QerSeed {
    pub fn to_info(&self) -> QerInfo {
        let mut info = QerInfo::default();
        info.gate_status_ul = if self.ul_gate_open { GATE_OPEN } else { GATE_CLOSED };
        info.gate_status_dl = if self.dl_gate_open { GATE_OPEN } else { GATE_CLOSED };
        info.maximum_bitrate_ul_bps = self.ul_maximum_bitrate_bps;
        info.maximum_bitrate_dl_bps = self.dl_maximum_bitrate_bps;
        info.qfi = self.qfi;
        info
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrrSeed {
    pub urr_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn far_seed_sets_encap_fields() {
        let seed = FarSeed {
            far_id: 1,
            actions: vec!["forward".to_string()],
            gtp_u_ipv4: Some(GtpEncapSeed {
                teid: 42,
                local_ip: Ipv4Addr::new(10, 0, 0, 1),
                remote_ip: Ipv4Addr::new(10, 0, 0, 2),
                transport_level_marking: 0x0a00,
            }),
        };
        let info = seed.to_info().unwrap();
        assert_eq!(info.action_mask, action::FORWARD);
        assert_eq!(info.teid, 42);
        assert_eq!(info.tunnel_src_addr, u32::from(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(info.tunnel_dst_addr, u32::from(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[test]
    fn far_seed_rejects_unknown_action() {
        let seed = FarSeed {
            far_id: 1,
            actions: vec!["teleport".to_string()],
            gtp_u_ipv4: None,
        };
        assert!(seed.to_info().is_err());
    }

    #[test]
    fn qer_seed_defaults_to_closed_gates() {
        let seed = QerSeed {
            qer_id: 1,
            ul_gate_open: false,
            dl_gate_open: false,
            ul_maximum_bitrate_bps: 0,
            dl_maximum_bitrate_bps: 0,
            qfi: 0,
        };
        let info = seed.to_info();
        assert_eq!(info.gate_status_ul, GATE_CLOSED);
        assert_eq!(info.gate_status_dl, GATE_CLOSED);
    }

    #[test]
    fn pdr_seed_parses_outer_header_removal() {
        let seed = PdrSeed {
            pdr_id: 1,
            local_seid: 1,
            imsi: 0,
            far_id: 1,
            qer_id: 1,
            urr_id: 0,
            key: PdrKey::Uplink { teid: 7 },
            outer_header_removal: "gtp_u_udp_ipv4".to_string(),
        };
        let info = seed.to_info().unwrap();
        assert_eq!(info.outer_header_removal, 0);
    }
}
