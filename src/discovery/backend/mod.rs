//! 注册中心后端抽象和实现

pub mod consul;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::InfraResult;
use crate::types::RegistrationDescriptor;

pub use consul::ConsulBackend;
pub use memory::MemoryBackend;

/// 注册中心后端 trait
///
/// 注意：由于需要动态分发（dyn），使用 async-trait
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// 注册服务实例（附带健康检查）
    async fn register(&self, descriptor: &RegistrationDescriptor) -> InfraResult<()>;

    /// 注销服务实例
    async fn deregister(&self, service_id: &str) -> InfraResult<()>;

    /// 订阅某个服务名的成员变化
    ///
    /// 订阅建立失败（服务名非法、传输失败）直接返回错误，不做重试。
    /// 每条通知是该服务当前的完整成员列表（原始 JSON）。
    async fn subscribe(&self, service_name: &str) -> InfraResult<Subscription>;
}

/// 一次订阅的句柄
///
/// 被丢弃或调用 [`Subscription::cancel`] 后，后端的推送任务随之退出
pub struct Subscription {
    service_name: String,
    updates: mpsc::Receiver<Value>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(
        service_name: impl Into<String>,
        updates: mpsc::Receiver<Value>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            updates,
            cancel,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// 等待下一条通知，订阅结束时返回 `None`
    pub async fn recv(&mut self) -> Option<Value> {
        self.updates.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
