pub mod monitor;

pub use monitor::{ConfigError, MonitorConfig};
