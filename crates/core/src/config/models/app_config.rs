use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    api_observability::{ApiConfig, ObservabilityConfig},
    dispatcher_maintenance::{ClusterLockConfig, DispatcherConfig, MaintenanceConfig, TransportConfig},
};

/// 环境变量前缀，例如 `ARCHIVIST_MAINTENANCE__ORPHAN_TIME_SECONDS=600`
pub const ENV_PREFIX: &str = "ARCHIVIST";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub dispatcher: DispatcherConfig,
    pub maintenance: MaintenanceConfig,
    pub cluster_lock: ClusterLockConfig,
    pub transport: TransportConfig,
    pub api: ApiConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 加载配置：内置默认值 < TOML文件 < 环境变量
    ///
    /// 配置文件不存在时使用内置默认值。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = ConfigBuilder::try_from(&AppConfig::default())
            .context("构建默认配置失败")?;

        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                tracing::warn!("配置文件不存在，使用默认配置: {}", path);
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("解析配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 从TOML字符串解析，缺失的字段不做默认填充
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化TOML配置失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.dispatcher.validate().context("dispatcher配置无效")?;
        self.maintenance.validate().context("maintenance配置无效")?;
        self.cluster_lock.validate().context("cluster_lock配置无效")?;
        self.transport.validate().context("transport配置无效")?;
        self.api.validate().context("api配置无效")?;
        self.observability.validate().context("observability配置无效")?;
        Ok(())
    }
}
