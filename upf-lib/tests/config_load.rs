use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use upf_lib::Config;

fn tmp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_nanos();
    std::env::temp_dir().join(format!("upf-{nanos}-{name}.toml"))
}

/// `load_from_path` additionally resolves interface names to live kernel
/// ifindices via `if_nametoindex`, which this test environment cannot
/// guarantee; these cases exercise the same TOML schema `load_from_path`
/// parses, stopping short of the ifindex resolution step.
fn parse(toml: &str) -> Config {
    toml::from_str(toml).expect("valid config toml")
}

#[test]
fn loads_minimal_config_with_defaults() {
    let cfg = parse(
        r#"
n3_interface = "n3"
n6_interface = "n6"
"#,
    );
    assert_eq!(cfg.n3_interface, "n3");
    assert_eq!(cfg.n6_interface, "n6");
    assert_eq!(cfg.n3_vlan, 0);
    assert_eq!(cfg.n6_vlan, 0);
    assert!(!cfg.masquerade);
    assert!(!cfg.flowact);
    assert!(cfg.pdrs.is_empty());
    assert!(cfg.fars.is_empty());
}

#[test]
fn loads_rules_and_flags() {
    let path = tmp_path("rules");
    let toml = r#"
n3_interface = "n3"
n6_interface = "n6"
n3_vlan = 100
masquerade = true
flowact = true

[[fars]]
far_id = 1
actions = ["forward"]

[fars.gtp_u_ipv4]
teid = 4660
local_ip = "198.51.100.1"
remote_ip = "198.51.100.2"

[[qers]]
qer_id = 1
ul_gate_open = true
dl_gate_open = true
ul_maximum_bitrate_bps = 100000000
dl_maximum_bitrate_bps = 200000000
qfi = 9

[[pdrs]]
pdr_id = 1
local_seid = 1
far_id = 1
qer_id = 1
direction = "uplink"
teid = 4660
"#;
    fs::write(&path, toml).expect("write fixture");

    let txt = fs::read_to_string(&path).expect("read fixture");
    let cfg = parse(&txt);
    assert_eq!(cfg.n3_vlan, 100);
    assert!(cfg.masquerade);
    assert!(cfg.flowact);
    assert_eq!(cfg.fars.len(), 1);
    assert_eq!(cfg.qers[0].qfi, 9);
    assert_eq!(cfg.pdrs.len(), 1);

    let _ = fs::remove_file(&path);
}

#[test]
fn rejects_malformed_toml() {
    let err = toml::from_str::<Config>("n3_interface = [not valid").unwrap_err();
    assert!(err.to_string().len() > 0);
}
