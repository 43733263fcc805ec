//! 配置管理
//!
//! 配置按 内置默认值 < TOML文件 < `ARCHIVIST_*` 环境变量 的顺序叠加，
//! 加载后逐段校验。

pub mod models;

pub use models::*;
