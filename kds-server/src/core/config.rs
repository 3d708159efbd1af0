//! 服务器配置 - 所有可调参数
//!
//! # 环境变量
//!
//! | 环境变量 | 默认值 | 说明 |
//! |----------|--------|------|
//! | WORK_DIR | /var/lib/galley/kds | 工作目录 |
//! | HTTP_PORT | 3000 | HTTP API 端口 |
//! | STREAM_TCP_PORT | 8081 | 订阅流 TCP 端口 |
//! | ENVIRONMENT | development | 运行环境 |
//! | BUS_RETENTION_SECS | 86400 | 流消息保留时间 (24h) |
//! | TERMINAL_RETENTION_SECS | 900 | 终态 ticket 缓存保留时间 (15m) |
//! | SUBSCRIBER_BUFFER | 100 | 每个订阅者的事件缓冲区 |
//! | SNAPSHOT_CHUNK | 32 | 快照分块大小 |
//! | STREAM_KEEPALIVE_SECS | 15 | 订阅流心跳间隔 |
//! | SHUTDOWN_DRAIN_MS | 5000 | 关闭时排空窗口 |
//! | WARM_RETRY_ATTEMPTS | 5 | 缓存预热重试次数 |

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录，存储数据库、事件流和日志
    pub work_dir: String,
    /// HTTP API 端口
    pub http_port: u16,
    /// 订阅流 TCP 端口
    pub stream_tcp_port: u16,
    /// 运行环境: development | staging | production
    pub environment: String,
    /// 持久化流的消息保留时间（秒）
    pub bus_retention_secs: u64,
    /// 终态 ticket 在缓存中的保留时间（秒）
    pub terminal_retention_secs: u64,
    /// 每个订阅者的有界缓冲区容量
    pub subscriber_buffer: usize,
    /// 订阅快照的分块大小
    pub snapshot_chunk: usize,
    /// 订阅流心跳间隔（秒）
    pub stream_keepalive_secs: u64,
    /// 关闭时等待后台任务排空的窗口（毫秒）
    pub shutdown_drain_ms: u64,
    /// 缓存预热失败时的重试次数，超过则启动失败
    pub warm_retry_attempts: u32,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// 从环境变量加载配置，未设置时使用默认值
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/galley/kds".into()),
            http_port: env_parse("HTTP_PORT", 3000),
            stream_tcp_port: env_parse("STREAM_TCP_PORT", 8081),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            bus_retention_secs: env_parse("BUS_RETENTION_SECS", 24 * 3600),
            terminal_retention_secs: env_parse("TERMINAL_RETENTION_SECS", 15 * 60),
            subscriber_buffer: env_parse(
                "SUBSCRIBER_BUFFER",
                crate::stream::DEFAULT_SUBSCRIBER_BUFFER,
            ),
            snapshot_chunk: env_parse("SNAPSHOT_CHUNK", 32),
            stream_keepalive_secs: env_parse("STREAM_KEEPALIVE_SECS", 15),
            shutdown_drain_ms: env_parse("SHUTDOWN_DRAIN_MS", 5000),
            warm_retry_attempts: env_parse("WARM_RETRY_ATTEMPTS", 5),
        }
    }

    /// 使用自定义值覆盖部分配置（常用于测试）
    pub fn with_overrides(
        work_dir: impl Into<String>,
        http_port: u16,
        stream_tcp_port: u16,
    ) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.http_port = http_port;
        config.stream_tcp_port = stream_tcp_port;
        config
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    // ========== Paths ==========

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("data")
    }

    pub fn db_file(&self) -> PathBuf {
        self.data_dir().join("kds.db")
    }

    pub fn bus_file(&self) -> PathBuf {
        self.data_dir().join("streams.redb")
    }

    pub fn logs_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("logs")
    }

    /// 确保工作目录结构存在
    pub fn ensure_work_dir_structure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.data_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }

    // ========== Durations ==========

    pub fn bus_retention(&self) -> Duration {
        Duration::from_secs(self.bus_retention_secs)
    }

    pub fn terminal_retention(&self) -> Duration {
        Duration::from_secs(self.terminal_retention_secs)
    }

    pub fn stream_keepalive(&self) -> Duration {
        Duration::from_secs(self.stream_keepalive_secs)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
