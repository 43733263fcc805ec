use std::str::FromStr;

use crate::config::ObservabilityConfig;

/// 日志配置
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LogConfig {
    /// 默认日志级别，`RUST_LOG`存在时以环境变量为准
    pub level: String,
    pub format: OutputFormat,
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Pretty,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "pretty" => Ok(OutputFormat::Pretty),
            other => Err(anyhow::anyhow!("不支持的日志格式: {other}")),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: OutputFormat::Pretty,
        }
    }
}

impl LogConfig {
    pub fn new(level: impl Into<String>, format: OutputFormat) -> Self {
        Self {
            level: level.into(),
            format,
        }
    }

    pub fn from_observability(config: &ObservabilityConfig) -> anyhow::Result<Self> {
        Ok(Self {
            level: config.log_level.clone(),
            format: config.log_format.parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("pretty".parse::<OutputFormat>().unwrap(), OutputFormat::Pretty);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_from_observability() {
        let mut obs = ObservabilityConfig::default();
        obs.log_format = "json".to_string();
        obs.log_level = "debug".to_string();
        let config = LogConfig::from_observability(&obs).unwrap();
        assert_eq!(config.format, OutputFormat::Json);
        assert_eq!(config.level, "debug");
    }
}
