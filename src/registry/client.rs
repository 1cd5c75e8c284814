//! 注册中心客户端
//!
//! 封装本进程的服务注册和多个服务的发现监听，对外提供轮询和按 ID 两种选择方式

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::{Config, HealthCheckConfig};
use crate::discovery::{
    AddressInfo, AddressSet, ConsulBackend, DiscoveryWatcher, Pick, RegistryBackend,
};
use crate::error::{DiscoveryError, InfraResultExt, Result};
use crate::health::HealthServer;
use crate::types::{HealthCheckSpec, RegistrationDescriptor};

/// 注册中心客户端
///
/// 显式构造后通过 `Arc` 共享给需要的组件，不使用进程级单例
pub struct RegistryClient {
    backend: Arc<dyn RegistryBackend>,
    health_config: HealthCheckConfig,
    registration: RwLock<Option<RegistrationDescriptor>>,
    /// 串行化注册和注销；`registration` 只在写入结果时短暂加写锁
    registering: Mutex<()>,
    health_server: Mutex<Option<HealthServer>>,
    watchers: RwLock<HashMap<String, DiscoveryWatcher>>,
}

impl RegistryClient {
    pub fn new(backend: Arc<dyn RegistryBackend>, health_config: HealthCheckConfig) -> Self {
        Self {
            backend,
            health_config,
            registration: RwLock::new(None),
            registering: Mutex::new(()),
            health_server: Mutex::new(None),
            watchers: RwLock::new(HashMap::new()),
        }
    }

    /// 使用 Consul 后端创建
    pub fn consul(config: &Config) -> Result<Self> {
        let backend = ConsulBackend::new(&config.registry)
            .map_err(|e| DiscoveryError::Config(format!("{:#}", e)))?;
        Ok(Self::new(Arc::new(backend), config.health_check.clone()))
    }

    /// 按配置创建：注册本进程（如果配置了）并监听 `watch` 中的所有服务
    pub async fn from_config(config: &Config) -> Result<Self> {
        let client = Self::consul(config)?;
        if let Some(service) = &config.service {
            client
                .register(
                    &service.name,
                    &service.instance_id(),
                    &service.address,
                    service.port,
                )
                .await?;
        }
        for name in &config.watch {
            client.add_watcher(name).await?;
        }
        Ok(client)
    }

    /// 注册本进程
    ///
    /// 先启动健康检查 HTTP 服务，再向注册中心注册；注册失败时关闭健康检查服务，
    /// 错误原样返回，不做重试。每个客户端只能注册一次。
    ///
    /// 注册进行中 [`RegistryClient::registration`] 不会被阻塞，返回的是注册前的状态
    pub async fn register(&self, name: &str, id: &str, addr: &str, port: u16) -> Result<()> {
        let _registering = self.registering.lock().await;
        if let Some(existing) = self.registration.read().await.as_ref() {
            return Err(DiscoveryError::AlreadyRegistered {
                service: existing.name.clone(),
                id: existing.id.clone(),
            });
        }

        let server = HealthServer::bind(&self.health_config).await?;
        let descriptor = RegistrationDescriptor {
            name: name.to_string(),
            id: id.to_string(),
            addr: addr.to_string(),
            port,
            check: HealthCheckSpec {
                http: format!("http://{}:{}{}", addr, server.port(), server.path()),
                timeout: self.health_config.timeout(),
                interval: self.health_config.interval(),
                ttl: self.health_config.ttl(),
                deregister_critical_after: self.health_config.deregister_after(),
            },
        };

        if let Err(e) = self
            .backend
            .register(&descriptor)
            .await
            .into_discovery(|reason| DiscoveryError::registration_failed(name, reason))
        {
            server.shutdown().await;
            return Err(e);
        }

        info!(service = name, id, addr, port, "service instance registered");
        *self.health_server.lock().await = Some(server);
        *self.registration.write().await = Some(descriptor);
        Ok(())
    }

    /// 当前注册信息
    pub async fn registration(&self) -> Option<RegistrationDescriptor> {
        self.registration.read().await.clone()
    }

    /// 从注册中心注销本进程并停止健康检查服务
    pub async fn deregister(&self) -> Result<()> {
        let _registering = self.registering.lock().await;
        let Some(descriptor) = self.registration.read().await.clone() else {
            return Err(DiscoveryError::NotRegistered);
        };

        self.backend
            .deregister(&descriptor.id)
            .await
            .into_discovery(|reason| DiscoveryError::DeregistrationFailed {
                id: descriptor.id.clone(),
                reason,
            })?;

        info!(service = %descriptor.name, id = %descriptor.id, "service instance deregistered");
        *self.registration.write().await = None;
        if let Some(server) = self.health_server.lock().await.take() {
            server.shutdown().await;
        }
        Ok(())
    }

    /// 添加服务发现监听
    ///
    /// 同名监听已存在时替换，并停止被替换的监听器
    pub async fn add_watcher(&self, name: &str) -> Result<()> {
        let watcher = DiscoveryWatcher::start(self.backend.clone(), name).await?;
        let replaced = self.watchers.write().await.insert(name.to_string(), watcher);

        if let Some(old) = replaced {
            warn!(service = name, "watcher replaced, stopping the previous one");
            old.shutdown().await;
        }
        Ok(())
    }

    /// 移除服务发现监听，返回是否存在
    pub async fn remove_watcher(&self, name: &str) -> bool {
        let removed = self.watchers.write().await.remove(name);
        match removed {
            Some(watcher) => {
                watcher.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// 正在监听的服务名
    pub async fn watched_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.watchers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// 轮询选择一个健康实例
    pub async fn select(&self, name: &str) -> Result<AddressInfo> {
        let watchers = self.watchers.read().await;
        let watcher = watchers
            .get(name)
            .ok_or_else(|| DiscoveryError::watcher_not_found(name))?;
        watcher.round_select().await
    }

    /// 按实例 ID 选择
    ///
    /// 实例不存在时返回 [`Pick::Fallback`]，调用方根据 `found()` 决定是否告警
    pub async fn select_by_id(&self, name: &str, server_id: &str) -> Result<Pick> {
        let watchers = self.watchers.read().await;
        let watcher = watchers
            .get(name)
            .ok_or_else(|| DiscoveryError::watcher_not_found(name))?;

        let pick = watcher.get_by_id(server_id).await?;
        if !pick.found() {
            info!(
                service = name,
                requested = server_id,
                picked = %pick.info().id,
                "instance not found by id, fell back to a random instance"
            );
        }
        Ok(pick)
    }

    /// 指定服务当前的健康实例快照
    pub async fn snapshot(&self, name: &str) -> Result<Arc<AddressSet>> {
        let watchers = self.watchers.read().await;
        let watcher = watchers
            .get(name)
            .ok_or_else(|| DiscoveryError::watcher_not_found(name))?;
        Ok(watcher.snapshot().await)
    }

    /// 停止所有监听器和健康检查服务（不注销）
    pub async fn shutdown(&self) {
        let watchers: Vec<DiscoveryWatcher> = self
            .watchers
            .write()
            .await
            .drain()
            .map(|(_, watcher)| watcher)
            .collect();
        join_all(watchers.into_iter().map(DiscoveryWatcher::shutdown)).await;

        if let Some(server) = self.health_server.lock().await.take() {
            server.shutdown().await;
        }
    }
}
