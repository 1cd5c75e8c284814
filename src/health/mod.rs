//! 健康检查模块
//!
//! 供注册中心探测存活的 HTTP 服务，固定返回 200

use std::net::SocketAddr;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::HealthCheckConfig;
use crate::error::{DiscoveryError, Result};

/// 健康检查响应体
pub const CHECK_BODY: &str = "consulCheck";

async fn check() -> &'static str {
    CHECK_BODY
}

/// 健康检查 HTTP 服务
pub struct HealthServer {
    local_addr: SocketAddr,
    path: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HealthServer {
    /// 绑定端口并在后台开始服务
    pub async fn bind(config: &HealthCheckConfig) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], config.port)))
            .await
            .map_err(|e| {
                DiscoveryError::HealthServer(format!("failed to bind port {}: {}", config.port, e))
            })?;
        let local_addr = listener.local_addr()?;

        let app = Router::new().route(&config.path, get(check));
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                error!(error = %e, "health check server exited with error");
            }
        });

        info!(addr = %local_addr, path = %config.path, "health check server listening");

        Ok(Self {
            local_addr,
            path: config.path.clone(),
            cancel,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// 停止服务并等待退出
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!(addr = %self.local_addr, "health check server stopped");
    }
}

impl Drop for HealthServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_check_endpoint_returns_ok() {
        let server = HealthServer::bind(&HealthCheckConfig::default().with_port(0))
            .await
            .unwrap();
        let url = format!("http://127.0.0.1:{}{}", server.port(), server.path());

        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.text().await.unwrap(), CHECK_BODY);

        server.shutdown().await;
        assert!(reqwest::get(&url).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let first = HealthServer::bind(&HealthCheckConfig::default().with_port(0))
            .await
            .unwrap();
        let err = HealthServer::bind(&HealthCheckConfig::default().with_port(first.port()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DiscoveryError::HealthServer(_)));
        first.shutdown().await;
    }
}
