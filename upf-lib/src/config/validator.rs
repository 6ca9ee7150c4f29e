use std::collections::HashSet;

use crate::config::Config;
use crate::error::ConfigError;

/// Checks the invariants spec §3 requires hold before the tables are ever
/// handed to the datapath: every PDR's `far_id` resolves to a configured
/// FAR (a dangling reference there is a configuration error, not a policy
/// decision the datapath should discover at runtime), and every FAR a PDR
/// names is provisioned exactly once.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.n3_interface == config.n6_interface {
        return Err(ConfigError::Invalid(
            "n3_interface and n6_interface must be different".to_string(),
        ));
    }

    let far_ids: HashSet<u32> = config.fars.iter().map(|f| f.far_id).collect();
    if far_ids.len() != config.fars.len() {
        return Err(ConfigError::Invalid("duplicate far_id in [[fars]]".to_string()));
    }
    let qer_ids: HashSet<u32> = config.qers.iter().map(|q| q.qer_id).collect();
    if qer_ids.len() != config.qers.len() {
        return Err(ConfigError::Invalid("duplicate qer_id in [[qers]]".to_string()));
    }

    for pdr in &config.pdrs {
        if !far_ids.contains(&pdr.far_id) {
            return Err(ConfigError::Invalid(format!(
                "pdr {} references unknown far_id {}",
                pdr.pdr_id, pdr.far_id
            )));
        }
        if !qer_ids.contains(&pdr.qer_id) {
            return Err(ConfigError::Invalid(format!(
                "pdr {} references unknown qer_id {}",
                pdr.pdr_id, pdr.qer_id
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::seed::{FarSeed, PdrKey, PdrSeed, QerSeed};
    use crate::config::{LoggingConfig, TelemetryConfig};

    fn base_config() -> Config {
        Config {
            n3_interface: "n3".to_string(),
            n6_interface: "n6".to_string(),
            n3_vlan: 0,
            n6_vlan: 0,
            masquerade: false,
            flowact: false,
            pdrs: vec![],
            fars: vec![],
            qers: vec![],
            urrs: vec![],
            logging: LoggingConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }

    #[test]
    fn rejects_same_interface_for_both_sides() {
        let mut cfg = base_config();
        cfg.n6_interface = "n3".to_string();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn rejects_pdr_with_dangling_far_id() {
        let mut cfg = base_config();
        cfg.pdrs.push(PdrSeed {
            pdr_id: 1,
            local_seid: 1,
            imsi: 0,
            far_id: 99,
            qer_id: 1,
            urr_id: 0,
            key: PdrKey::Uplink { teid: 1 },
            outer_header_removal: "none".to_string(),
        });
        cfg.qers.push(QerSeed {
            qer_id: 1,
            ul_gate_open: true,
            dl_gate_open: true,
            ul_maximum_bitrate_bps: 0,
            dl_maximum_bitrate_bps: 0,
            qfi: 0,
        });
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn accepts_pdr_with_resolvable_far_and_qer() {
        let mut cfg = base_config();
        cfg.fars.push(FarSeed {
            far_id: 1,
            actions: vec!["forward".to_string()],
            gtp_u_ipv4: None,
        });
        cfg.qers.push(QerSeed {
            qer_id: 1,
            ul_gate_open: true,
            dl_gate_open: true,
            ul_maximum_bitrate_bps: 0,
            dl_maximum_bitrate_bps: 0,
            qfi: 0,
        });
        cfg.pdrs.push(PdrSeed {
            pdr_id: 1,
            local_seid: 1,
            imsi: 0,
            far_id: 1,
            qer_id: 1,
            urr_id: 0,
            key: PdrKey::Uplink { teid: 1 },
            outer_header_removal: "none".to_string(),
        });
        assert!(validate(&cfg).is_ok());
    }
}
