use thiserror::Error;

/// Errors raised while loading or validating the on-disk configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("interface {0:?} does not resolve to a live ifindex")]
    UnknownInterface(String),
}

/// Errors surfaced by the host-side runtime: configuration and the
/// observability server. The datapath itself reports failures only
/// through its XDP return action and the kernel-side trace channel.
#[derive(Error, Debug)]
pub enum UpfError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, UpfError>;
