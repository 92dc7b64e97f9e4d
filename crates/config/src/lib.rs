mod config;
pub mod constants;

pub use config::{ForkPoolConfig, LogLevel, Timeouts};
