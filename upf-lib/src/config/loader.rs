use std::ffi::CString;
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::error::ConfigError;

/// Configuration plus the interface names resolved to live kernel
/// ifindices at load time, per the requirement that `n3_ifindex`/
/// `n6_ifindex` are process-lifetime constants set once at program load.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: Config,
    pub n3_ifindex: u32,
    pub n6_ifindex: u32,
}

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<ResolvedConfig, ConfigError> {
    let txt = fs::read_to_string(p)?;
    let config: Config = toml::from_str(&txt)?;

    let n3_ifindex = if_nametoindex(&config.n3_interface)?;
    let n6_ifindex = if_nametoindex(&config.n6_interface)?;

    super::validator::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        n3_ifindex,
        n6_ifindex,
    })
}

/// Resolves an interface name to its kernel ifindex via `if_nametoindex(3)`.
/// Returns zero when the interface does not currently exist, which
/// `if_nametoindex` also uses to signal failure (see `ifindex(7)`).
fn if_nametoindex(name: &str) -> Result<u32, ConfigError> {
    let cname = CString::new(name)
        .map_err(|_| ConfigError::UnknownInterface(name.to_string()))?;
    #[allow(unsafe_code)]
    let idx = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if idx == 0 {
        return Err(ConfigError::UnknownInterface(name.to_string()));
    }
    Ok(idx)
}
