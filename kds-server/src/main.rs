//! KDS Server 二进制入口
//!
//! 此文件负责:
//! - 加载 .env 配置文件
//! - 设置工作目录
//! - 初始化日志系统
//! - 启动服务器

use kds_server::{Config, Server, init_logger_with_file, print_banner};
use std::path::PathBuf;

/// 设置运行环境 (仅 bin 使用)
fn setup_environment() -> Result<PathBuf, Box<dyn std::error::Error>> {
    // 加载 .env 文件 (仅 bin 层面支持)
    dotenvy::dotenv().ok();

    let work_dir = std::env::var("WORK_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));

    if !work_dir.exists() {
        std::fs::create_dir_all(&work_dir)?;
        println!("Created work directory: {}", work_dir.display());
    }

    let log_dir = work_dir.join("logs");
    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir)?;
    }

    let json_format = std::env::var("LOG_JSON")
        .unwrap_or_else(|_| "false".to_string())
        .parse()
        .unwrap_or(false);
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    init_logger_with_file(
        &log_level,
        json_format,
        Some(log_dir.to_str().unwrap_or("logs")),
    )?;

    tracing::info!(
        "Environment initialized. WorkDir: {}, LogLevel: {}",
        work_dir.display(),
        log_level
    );

    Ok(work_dir)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 设置环境 (dotenv, 工作目录, 日志)
    let work_dir = setup_environment()?;

    print_banner();

    tracing::info!("Galley KDS server starting...");
    tracing::debug!("Work directory: {}", work_dir.display());

    // 2. 加载配置 (从环境变量)
    let config = Config::from_env();

    // 3. 启动服务器
    let server = Server::new(config);
    let token = server.shutdown_token();

    // ctrl_c 触发取消；run() 随后走 graceful shutdown 并排空后台任务
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
        token.cancel();
    });

    let result = server.run().await;
    if let Err(e) = &result {
        tracing::error!("Server error: {}", e);
    }

    result.map_err(|e| e.into())
}
