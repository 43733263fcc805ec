use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::signal;
use tracing::{error, info, warn};

use archivist_core::{init_logging, AppConfig, LogConfig};

mod app;
mod shutdown;

use app::{AppMode, Application};
use shutdown::ShutdownManager;

/// 等待各组件退出的最长时间
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("archivist")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Archivist分布式作业调度服务")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .default_value("config/archivist.toml"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["scheduler", "api", "all"])
                .default_value("all"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .context("缺少配置文件参数")?;
    let mode_str = matches.get_one::<String>("mode").context("缺少运行模式参数")?;

    let mut config = AppConfig::load(Some(config_path))
        .with_context(|| format!("加载配置文件失败: {config_path}"))?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }
    init_logging(&LogConfig::from_observability(&config.observability)?)?;

    info!("启动Archivist调度服务");
    info!("配置文件: {config_path}");
    info!("运行模式: {mode_str}");

    let app_mode: AppMode = mode_str.parse()?;
    let app = Arc::new(Application::new(config, app_mode).await?);

    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);

        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");

    shutdown_manager.shutdown().await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("Archivist调度服务已退出");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("监听Ctrl+C信号失败: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("监听SIGTERM信号失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("收到Ctrl+C信号"),
        _ = terminate => info!("收到SIGTERM信号"),
    }
}
