//! 服务发现监听器
//!
//! 每个被监听的服务名对应一个 [`DiscoveryWatcher`]：后台任务消费注册中心的变更通知，
//! 每次通知整体重建健康实例快照；选择调用只读取当前快照，不会阻塞在 I/O 上。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::discovery::address_set::{AddressInfo, AddressSet};
use crate::discovery::backend::{RegistryBackend, Subscription};
use crate::error::{DiscoveryError, InfraResultExt, Result};
use crate::types::ServiceEntry;

/// 按 ID 选择的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pick {
    /// 命中指定实例
    Exact(AddressInfo),
    /// 指定实例不存在，随机返回了一个健康实例
    Fallback(AddressInfo),
}

impl Pick {
    pub fn found(&self) -> bool {
        matches!(self, Pick::Exact(_))
    }

    pub fn info(&self) -> &AddressInfo {
        match self {
            Pick::Exact(info) | Pick::Fallback(info) => info,
        }
    }

    pub fn into_info(self) -> AddressInfo {
        match self {
            Pick::Exact(info) | Pick::Fallback(info) => info,
        }
    }
}

/// 单个服务的健康实例缓存
///
/// 快照只在写锁下整体替换；轮询游标是独立的原子计数器，
/// 使用前总是对当前快照长度取模，重建快照时不重置。
pub struct AddressCache {
    service_name: String,
    snapshot: RwLock<Arc<AddressSet>>,
    cursor: AtomicUsize,
}

impl AddressCache {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            snapshot: RwLock::new(Arc::new(AddressSet::empty())),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// 处理一条原始通知
    ///
    /// 无法解析为服务条目列表的通知被忽略，快照和游标保持不变。
    /// 返回是否应用了该通知。
    pub async fn on_update(&self, payload: &Value) -> bool {
        match Vec::<ServiceEntry>::deserialize(payload) {
            Ok(entries) => {
                self.apply_entries(&entries).await;
                true
            }
            Err(e) => {
                warn!(
                    service = %self.service_name,
                    error = %e,
                    "ignoring malformed registry notification"
                );
                false
            }
        }
    }

    /// 用一组条目重建快照
    pub async fn apply_entries(&self, entries: &[ServiceEntry]) {
        let next = Arc::new(AddressSet::from_entries(entries));
        let healthy = next.len();
        *self.snapshot.write().await = next;
        debug!(
            service = %self.service_name,
            total = entries.len(),
            healthy,
            "address set rebuilt"
        );
    }

    /// 当前快照
    pub async fn snapshot(&self) -> Arc<AddressSet> {
        self.snapshot.read().await.clone()
    }

    /// 当前游标值（未取模）
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// 轮询选择
    pub async fn round_select(&self) -> Result<AddressInfo> {
        let set = self.snapshot().await;
        let len = set.len();
        if len == 0 {
            return Err(DiscoveryError::empty_address_set(&self.service_name));
        }

        let prev = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cursor| {
                Some((cursor % len + 1) % len)
            })
            .unwrap_or_else(|cursor| cursor);

        set.get(prev % len)
            .cloned()
            .ok_or_else(|| DiscoveryError::empty_address_set(&self.service_name))
    }

    /// 按实例 ID 选择，不存在时随机回退（回退不是错误）
    pub async fn get_by_id(&self, server_id: &str) -> Result<Pick> {
        let set = self.snapshot().await;
        if let Some(info) = set.get_by_id(server_id) {
            return Ok(Pick::Exact(info.clone()));
        }
        set.random()
            .cloned()
            .map(Pick::Fallback)
            .ok_or_else(|| DiscoveryError::empty_address_set(&self.service_name))
    }
}

/// 服务发现监听器
///
/// 持有订阅和后台监听任务；[`DiscoveryWatcher::shutdown`] 或 drop 时停止监听
pub struct DiscoveryWatcher {
    cache: Arc<AddressCache>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DiscoveryWatcher {
    /// 订阅服务并启动后台监听
    ///
    /// 订阅失败直接返回 `SubscriptionFailed`，不做重试
    pub async fn start(
        backend: Arc<dyn RegistryBackend>,
        service_name: impl Into<String>,
    ) -> Result<Self> {
        let service_name = service_name.into();
        let subscription = backend
            .subscribe(&service_name)
            .await
            .into_discovery(|reason| DiscoveryError::subscription_failed(&service_name, reason))?;
        Ok(Self::from_subscription(subscription))
    }

    /// 基于已建立的订阅启动后台监听
    pub fn from_subscription(subscription: Subscription) -> Self {
        let cache = Arc::new(AddressCache::new(subscription.service_name()));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(listen(cache.clone(), subscription, cancel.clone()));

        info!(service = %cache.service_name(), "discovery watcher started");

        Self {
            cache,
            cancel,
            task: Some(task),
        }
    }

    pub fn service_name(&self) -> &str {
        self.cache.service_name()
    }

    pub fn cache(&self) -> &Arc<AddressCache> {
        &self.cache
    }

    pub async fn round_select(&self) -> Result<AddressInfo> {
        self.cache.round_select().await
    }

    pub async fn get_by_id(&self, server_id: &str) -> Result<Pick> {
        self.cache.get_by_id(server_id).await
    }

    pub async fn snapshot(&self) -> Arc<AddressSet> {
        self.cache.snapshot().await
    }

    /// 后台监听任务是否仍在运行
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// 停止监听并等待后台任务退出
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(service = %self.cache.service_name(), error = %e, "watcher task failed");
            }
        }
        info!(service = %self.cache.service_name(), "discovery watcher stopped");
    }
}

impl Drop for DiscoveryWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn listen(
    cache: Arc<AddressCache>,
    mut subscription: Subscription,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            update = subscription.recv() => match update {
                Some(payload) => {
                    cache.on_update(&payload).await;
                }
                None => {
                    warn!(service = %cache.service_name(), "registry subscription closed");
                    break;
                }
            },
        }
    }
    subscription.cancel();
}
