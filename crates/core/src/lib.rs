//! Archivist核心库：统一错误类型、配置与日志初始化

pub mod config;
pub mod errors;
pub mod logging;

pub use config::*;
pub use errors::*;
pub use logging::{init_logging, LogConfig, OutputFormat};
