//! 服务器状态 - 持有所有服务的共享引用
//!
//! AppState 是整条流水线的装配点。使用 Arc 实现浅拷贝，所有权成本极低。
//!
//! # 启动顺序
//!
//! 1. 工作目录结构（确保目录存在）
//! 2. SQLite（迁移）与事件流日志
//! 3. 缓存与流服务器
//! 4. 缓存预热（有界重试，失败则启动失败）— 在此之前不接受订阅者
//! 5. 后台任务（消费者、分发器、清扫器、TCP 流服务器）

use crate::bus::EventBus;
use crate::core::tasks::{BackgroundTasks, TaskKind};
use crate::core::Config;
use crate::db::DbService;
use crate::orders::{OrderItemChange, OrderItemStreamServer, StatusReflector};
use crate::stream::tcp_server::StreamTcpServer;
use crate::tables::TableStatusCache;
use crate::tickets::{CacheReplayWorker, TicketCache, TicketIngestWorker, TicketStreamServer};
use shared::AppError;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Order-item change channel capacity (feeds the order-item dispatcher)
const ORDER_ITEM_CHANGE_CAPACITY: usize = 8192;

#[derive(Clone)]
pub struct AppState {
    /// 服务器配置
    pub config: Config,
    /// SQLite connection pool
    pub pool: SqlitePool,
    /// 事件总线（持久化流 + ephemeral 主题）
    pub bus: EventBus,
    /// Ticket 内存投影
    pub ticket_cache: Arc<TicketCache>,
    /// Ticket 订阅流服务器
    pub ticket_stream: Arc<TicketStreamServer>,
    /// Order-item 订阅流服务器
    pub order_item_stream: Arc<OrderItemStreamServer>,
    /// Order-item 本地变更通道（状态反射 → 订阅流）
    pub order_item_changes: broadcast::Sender<OrderItemChange>,
    /// 桌台状态缓存
    pub table_status: Arc<TableStatusCache>,
    /// 预热完成后置位；readiness 与订阅接入以此为准
    ready: Arc<AtomicBool>,
    /// 服务器实例 epoch (启动时生成的 UUID)
    /// 客户端用它检测服务器重启并触发重新订阅
    pub epoch: String,
}

impl AppState {
    /// 初始化服务器状态
    pub async fn initialize(config: &Config) -> Result<Self, AppError> {
        config
            .ensure_work_dir_structure()
            .map_err(|e| AppError::internal(format!("Failed to create work directory: {e}")))?;

        // 1. Stores
        let db_path = config.db_file();
        let db = DbService::new(&db_path.to_string_lossy()).await?;
        let pool = db.pool;

        // 2. Event bus
        let bus = EventBus::open(config.bus_file())
            .map_err(|e| AppError::internal(format!("Failed to open event streams: {e}")))?;

        // 3. Caches and stream servers
        let ticket_cache = Arc::new(TicketCache::new());
        let ticket_stream = Arc::new(TicketStreamServer::new(
            ticket_cache.clone(),
            config.subscriber_buffer,
        ));
        let order_item_stream = Arc::new(OrderItemStreamServer::new(
            pool.clone(),
            config.subscriber_buffer,
        ));
        let (order_item_changes, _) = broadcast::channel(ORDER_ITEM_CHANGE_CAPACITY);
        let table_status = Arc::new(TableStatusCache::new());

        let epoch = uuid::Uuid::new_v4().to_string();
        tracing::info!(epoch = %epoch, "Server state initialized");

        Ok(Self {
            config: config.clone(),
            pool,
            bus,
            ticket_cache,
            ticket_stream,
            order_item_stream,
            order_item_changes,
            table_status,
            ready: Arc::new(AtomicBool::new(false)),
            epoch,
        })
    }

    /// 缓存预热（有界重试）
    ///
    /// 必须在流服务器接受订阅者之前完成；重试耗尽视为终端错误，
    /// 进程启动失败交由编排器重启。
    pub async fn warm(&self) -> Result<usize, AppError> {
        let mut last_error: Option<String> = None;
        for attempt in 1..=self.config.warm_retry_attempts {
            match self.ticket_cache.warm(&self.pool).await {
                Ok(count) => {
                    self.ready.store(true, Ordering::Release);
                    tracing::info!(tickets = count, attempt, "Ticket cache warmed");
                    return Ok(count);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Cache warm attempt failed");
                    last_error = Some(e.to_string());
                    tokio::time::sleep(std::time::Duration::from_millis(200 * attempt as u64))
                        .await;
                }
            }
        }
        Err(AppError::internal(format!(
            "cache warm failed after {} attempts: {}",
            self.config.warm_retry_attempts,
            last_error.unwrap_or_default(),
        )))
    }

    /// 预热是否已完成
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// 启动后台任务
    ///
    /// 必须在 `warm()` 之后调用。返回 `BackgroundTasks` 用于 graceful shutdown。
    pub fn start_background_tasks(&self, shutdown: CancellationToken) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new(shutdown);

        // ═══════════════════════════════════════════════════════════════
        // Worker Tasks (durable 消费者循环)
        // ═══════════════════════════════════════════════════════════════

        // TicketIngestWorker: orders.items → tickets
        let ingest =
            TicketIngestWorker::new(self.pool.clone(), self.bus.clone(), self.ticket_cache.clone());
        let token = tasks.shutdown_token();
        tasks.spawn("ticket_ingest", TaskKind::Worker, async move {
            ingest.run(token).await;
        });

        // CacheReplayWorker: kitchen.tickets → cache（第二写入源）
        let replay =
            CacheReplayWorker::new(self.pool.clone(), self.bus.clone(), self.ticket_cache.clone());
        let token = tasks.shutdown_token();
        tasks.spawn("cache_replay", TaskKind::Worker, async move {
            replay.run(token).await;
        });

        // StatusReflector: kitchen.tickets → order_items（独立消费位点）
        let reflector = StatusReflector::new(
            self.pool.clone(),
            self.bus.clone(),
            self.order_item_changes.clone(),
        );
        let token = tasks.shutdown_token();
        tasks.spawn("status_reflector", TaskKind::Worker, async move {
            reflector.run(token).await;
        });

        // Stream TCP server（订阅接入，预热完成后才会运行到这里）
        let tcp = StreamTcpServer::new(
            format!("0.0.0.0:{}", self.config.stream_tcp_port),
            self.ticket_stream.clone(),
            self.order_item_stream.clone(),
            self.config.snapshot_chunk,
            self.config.stream_keepalive(),
        );
        let token = tasks.shutdown_token();
        tasks.spawn("stream_tcp_server", TaskKind::Worker, async move {
            if let Err(e) = tcp.run(token).await {
                tracing::error!(error = %e, "Stream TCP server failed");
            }
        });

        // ═══════════════════════════════════════════════════════════════
        // Listener Tasks (分发器)
        // ═══════════════════════════════════════════════════════════════

        // Ticket dispatcher: cache changes → subscriber buffers
        let dispatcher = self.ticket_stream.clone();
        let changes = self.ticket_cache.subscribe_changes();
        let token = tasks.shutdown_token();
        tasks.spawn("ticket_dispatcher", TaskKind::Listener, async move {
            dispatcher.run_dispatcher(changes, token).await;
        });

        // Order-item dispatcher: reflector writes → subscriber buffers
        let dispatcher = self.order_item_stream.clone();
        let changes = self.order_item_changes.subscribe();
        let token = tasks.shutdown_token();
        tasks.spawn("order_item_dispatcher", TaskKind::Listener, async move {
            dispatcher.run_dispatcher(changes, token).await;
        });

        // Table status listener: ephemeral subject → read-through cache
        let table_cache = self.table_status.clone();
        let bus = self.bus.clone();
        let token = tasks.shutdown_token();
        tasks.spawn("table_status_listener", TaskKind::Listener, async move {
            crate::tables::run_table_status_listener(table_cache, bus, token).await;
        });

        // ═══════════════════════════════════════════════════════════════
        // Periodic Tasks (清扫器)
        // ═══════════════════════════════════════════════════════════════

        self.register_terminal_eviction(&mut tasks);
        self.register_bus_retention(&mut tasks);

        tasks.log_summary();
        tasks
    }

    /// 终态 ticket 清扫：每分钟移除超过保留窗口的终态条目
    fn register_terminal_eviction(&self, tasks: &mut BackgroundTasks) {
        const SWEEP_INTERVAL_SECS: u64 = 60;

        let cache = self.ticket_cache.clone();
        let retention = self.config.terminal_retention();
        let shutdown = tasks.shutdown_token();

        tasks.spawn("terminal_eviction", TaskKind::Periodic, async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let evicted = cache.evict_terminal(retention);
                        if evicted > 0 {
                            tracing::info!(evicted, "Evicted terminal tickets from cache");
                        }
                    }
                }
            }
        });
    }

    /// 流保留清扫：每 10 分钟删除超龄且所有消费者都已确认的消息
    fn register_bus_retention(&self, tasks: &mut BackgroundTasks) {
        const SWEEP_INTERVAL_SECS: u64 = 600;

        let bus = self.bus.clone();
        let retention = self.config.bus_retention();
        let shutdown = tasks.shutdown_token();

        tasks.spawn("bus_retention", TaskKind::Periodic, async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        match bus.sweep_retention(retention) {
                            Ok(removed) if removed > 0 => {
                                tracing::info!(removed, "Stream retention sweep");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::error!(error = %e, "Stream retention sweep failed");
                            }
                        }
                    }
                }
            }
        });
    }
}
