//! Server Implementation
//!
//! HTTP 服务器启动和管理

use crate::core::{AppState, Config};
use shared::AppError;
use tokio_util::sync::CancellationToken;

/// KDS server: warm, spawn the pipeline, serve HTTP
pub struct Server {
    config: Config,
    state: Option<AppState>,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create server with existing state (tests share the state handle)
    pub fn with_state(config: Config, state: AppState) -> Self {
        Self {
            config,
            state: Some(state),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(&self) -> Result<(), AppError> {
        let state = match &self.state {
            Some(s) => s.clone(),
            None => AppState::initialize(&self.config).await?,
        };

        // Warm before anything accepts subscribers or reports ready.
        // A failed warm is a terminal startup error; the orchestrator
        // restarts the process.
        state.warm().await?;

        let tasks = state.start_background_tasks(self.shutdown.clone());

        let app = crate::api::router(state.clone());
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| AppError::internal(format!("Failed to bind {addr}: {e}")))?;

        tracing::info!("KDS server listening on {}", addr);
        tracing::info!(
            "Stream subscribers on tcp://0.0.0.0:{}",
            self.config.stream_tcp_port
        );

        let token = self.shutdown.clone();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .map_err(|e| AppError::internal(format!("HTTP server error: {e}")));

        // Drain the pipeline within the configured window
        tasks.shutdown(self.config.shutdown_drain()).await;

        result
    }
}
