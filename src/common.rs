use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use shipqueue_config::{AppConfig, LogLevel, OutputFormat};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app::{AppMode, Application};
use crate::shutdown::ShutdownManager;

/// 等待各组件结束当前周期的最长时间
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// 命令行传入的启动参数，未指定的项使用配置文件
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    pub mode: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub runner_id: Option<String>,
}

/// 初始化日志系统，`RUST_LOG` 优先于配置的级别
pub fn init_logging(log_level: LogLevel, log_format: OutputFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        OutputFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("初始化JSON日志格式失败")?,
        OutputFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("初始化Pretty日志格式失败")?,
        OutputFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
            .context("初始化Compact日志格式失败")?,
    }

    Ok(())
}

/// 加载应用配置并应用命令行覆盖项
pub fn load_config(startup_config: &StartupConfig) -> Result<AppConfig> {
    let mut config = AppConfig::load(startup_config.config_path.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            startup_config
                .config_path
                .as_deref()
                .unwrap_or("<默认路径>")
        )
    })?;

    if let Some(ref runner_id) = startup_config.runner_id {
        config.runner.runner_id = Some(runner_id.clone());
    }
    if let Some(ref level) = startup_config.log_level {
        config.logging.level = level.parse().map_err(anyhow::Error::msg)?;
    }
    if let Some(ref format) = startup_config.log_format {
        config.logging.format = format.parse().map_err(anyhow::Error::msg)?;
    }

    config.validate()?;
    Ok(config)
}

/// 解析应用运行模式
pub fn parse_app_mode(mode_str: &str, config: &AppConfig) -> Result<AppMode> {
    match mode_str {
        "runner" => {
            if !config.runner.enabled {
                return Err(anyhow::anyhow!("Runner模式被禁用，请检查配置"));
            }
            Ok(AppMode::Runner)
        }
        "scheduler" => {
            if !config.scheduler.enabled {
                return Err(anyhow::anyhow!("Scheduler模式被禁用，请检查配置"));
            }
            Ok(AppMode::Scheduler)
        }
        "all" => Ok(AppMode::All),
        _ => Err(anyhow::anyhow!("不支持的运行模式: {mode_str}")),
    }
}

/// 加载配置、启动应用并阻塞到收到关闭信号
pub async fn start_application(startup_config: StartupConfig) -> Result<()> {
    let config = load_config(&startup_config)?;
    init_logging(config.logging.level, config.logging.format)?;

    let mode_str = startup_config.mode.as_deref().unwrap_or("all");
    info!("启动 shipqueue");
    info!(
        "配置文件: {}",
        startup_config.config_path.as_deref().unwrap_or("<默认路径>")
    );
    info!("运行模式: {mode_str}");

    let app_mode = parse_app_mode(mode_str, &config)?;
    let app = Application::new(config, app_mode).await?;

    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let app = Arc::new(app);
        let shutdown_rx = shutdown_manager.subscribe().await;

        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e}");
            }
        })
    };

    wait_for_shutdown_signal().await?;

    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("shipqueue 已退出");
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("安装SIGTERM信号处理器失败")?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("安装Ctrl+C信号处理器失败")?;
                info!("收到Ctrl+C信号");
            },
            _ = terminate.recv() => {
                info!("收到SIGTERM信号");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.context("安装Ctrl+C信号处理器失败")?;
        info!("收到Ctrl+C信号");
    }

    Ok(())
}
