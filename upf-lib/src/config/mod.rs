mod loader;
pub mod seed;
mod root;
mod telemetry;
mod validator;

pub use loader::{load_from_path, ResolvedConfig};
pub use root::Config;
pub use seed::{FarSeed, PdrKey, PdrSeed, QerSeed, UrrSeed};
pub use telemetry::{LoggingConfig, TelemetryConfig};
