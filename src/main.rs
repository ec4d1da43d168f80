use ftpwatch_lib::config::{default_config_dir, AppConfig, CONFIG_FILE_NAME};
use ftpwatch_lib::job::build_targets;
use ftpwatch_lib::logging::{LogConfig, SizeRotatingWriter};
use ftpwatch_lib::notify::bot::{TelegramBot, UpdateBoard};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::prelude::*;

/// 初始化日志系统
fn init_logging(log_dir: &Path, config: &LogConfig) -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(config.tracing_level().into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("opendal=warn".parse()?);

    // 文件日志层
    let file_layer = if config.enabled {
        match SizeRotatingWriter::new(log_dir, config.max_size_mb) {
            Ok(file_writer) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            ),
            Err(e) => {
                eprintln!("无法创建日志文件 {}: {}", log_dir.display(), e);
                None
            }
        }
    } else {
        None
    };

    // debug 模式或没有日志文件时输出到控制台
    let console_layer = (cfg!(debug_assertions) || file_layer.is_none()).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

/// 配置目录：命令行第一个参数，或系统默认位置
fn config_dir() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_config_dir)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_dir = config_dir();
    let config = AppConfig::load(&config_dir.join(CONFIG_FILE_NAME))?;

    init_logging(&config_dir, &config.log)?;
    tracing::info!("配置目录: {}", config_dir.display());

    let board = Arc::new(UpdateBoard::default());
    let mut targets = build_targets(&config, &config_dir, &board);
    if targets.is_empty() {
        anyhow::bail!("no usable targets in {}", config_dir.join(CONFIG_FILE_NAME).display());
    }

    if let Some(telegram) = &config.telegram {
        match TelegramBot::new(&telegram.api_base, &telegram.bot_token) {
            Ok(bot) => {
                tokio::spawn(bot.run(board.clone()));
            }
            Err(e) => tracing::error!("无法启动 Telegram 机器人: {}", e),
        }
    }

    let interval = config.interval();
    tracing::info!(
        "共 {} 个目标，每 {} 分钟检查一次",
        targets.len(),
        interval.as_secs() / 60
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                futures::future::join_all(targets.iter_mut().map(|t| t.run_logged())).await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("收到退出信号，停止检查");
                break;
            }
        }
    }

    Ok(())
}
