//! 进程内注册中心（开发、测试用）

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{RegistryBackend, Subscription};
use crate::error::InfraResult;
use crate::types::{RegistrationDescriptor, ServiceEntry};

const SUBSCRIPTION_BUFFER: usize = 16;

/// 进程内注册中心
///
/// 通知由调用方通过 [`MemoryBackend::publish`] 显式推送，新订阅者会立即收到
/// 该服务最近一次推送的内容。订阅被取消或接收端被丢弃后不再推送。
#[derive(Default)]
pub struct MemoryBackend {
    registrations: RwLock<HashMap<String, RegistrationDescriptor>>,
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    last_payloads: RwLock<HashMap<String, Value>>,
    fail_next_register: Mutex<Option<String>>,
    fail_next_subscribe: Mutex<Option<String>>,
    register_delay: Mutex<Option<Duration>>,
}

#[derive(Clone)]
struct Subscriber {
    tx: mpsc::Sender<Value>,
    cancel: CancellationToken,
}

impl Subscriber {
    fn is_live(&self) -> bool {
        !self.tx.is_closed() && !self.cancel.is_cancelled()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 推送一条原始通知给该服务的所有订阅者
    pub async fn publish(&self, service_name: &str, payload: Value) {
        self.last_payloads
            .write()
            .await
            .insert(service_name.to_string(), payload.clone());

        let senders = {
            let mut subscribers = self.subscribers.lock().await;
            let senders = subscribers.entry(service_name.to_string()).or_default();
            senders.retain(Subscriber::is_live);
            senders.clone()
        };

        for subscriber in senders {
            tokio::select! {
                _ = subscriber.cancel.cancelled() => {}
                // 接收端已关闭说明订阅刚被取消
                _ = subscriber.tx.send(payload.clone()) => {}
            }
        }
        debug!(service = service_name, "notification published");
    }

    /// 推送一组条目
    pub async fn publish_entries(&self, service_name: &str, entries: &[ServiceEntry]) {
        let payload = serde_json::to_value(entries).unwrap_or(Value::Null);
        self.publish(service_name, payload).await;
    }

    /// 下一次注册失败
    pub async fn fail_next_register(&self, reason: impl Into<String>) {
        *self.fail_next_register.lock().await = Some(reason.into());
    }

    /// 下一次注册在返回前等待 `delay`
    pub async fn delay_next_register(&self, delay: Duration) {
        *self.register_delay.lock().await = Some(delay);
    }

    /// 下一次订阅失败
    pub async fn fail_next_subscribe(&self, reason: impl Into<String>) {
        *self.fail_next_subscribe.lock().await = Some(reason.into());
    }

    pub async fn registration(&self, service_id: &str) -> Option<RegistrationDescriptor> {
        self.registrations.read().await.get(service_id).cloned()
    }

    pub async fn registration_count(&self) -> usize {
        self.registrations.read().await.len()
    }

    /// 仍在接收通知的订阅数
    pub async fn subscriber_count(&self, service_name: &str) -> usize {
        self.subscribers
            .lock()
            .await
            .get(service_name)
            .map(|senders| senders.iter().filter(|s| s.is_live()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RegistryBackend for MemoryBackend {
    async fn register(&self, descriptor: &RegistrationDescriptor) -> InfraResult<()> {
        let delay = self.register_delay.lock().await.take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.fail_next_register.lock().await.take() {
            bail!(reason);
        }
        self.registrations
            .write()
            .await
            .insert(descriptor.id.clone(), descriptor.clone());
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> InfraResult<()> {
        self.registrations
            .write()
            .await
            .remove(service_id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("unknown service id {}", service_id))
    }

    async fn subscribe(&self, service_name: &str) -> InfraResult<Subscription> {
        if service_name.is_empty() {
            bail!("watch specification requires a service name");
        }
        if let Some(reason) = self.fail_next_subscribe.lock().await.take() {
            bail!(reason);
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        if let Some(payload) = self.last_payloads.read().await.get(service_name) {
            tx.try_send(payload.clone())?;
        }
        let cancel = CancellationToken::new();
        self.subscribers
            .lock()
            .await
            .entry(service_name.to_string())
            .or_default()
            .push(Subscriber {
                tx,
                cancel: cancel.clone(),
            });

        Ok(Subscription::new(service_name, rx, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_cancelled_subscription_stops_receiving() {
        let backend = MemoryBackend::new();
        let mut subscription = backend.subscribe("user-service").await.unwrap();
        backend.publish("user-service", json!([])).await;
        assert_eq!(subscription.recv().await, Some(json!([])));

        subscription.cancel();
        assert_eq!(backend.subscriber_count("user-service").await, 0);

        // 取消的订阅在下一次推送时被移除，通道随之关闭
        backend.publish("user-service", json!([1])).await;
        assert_eq!(subscription.recv().await, None);
    }

    #[tokio::test]
    async fn test_publish_does_not_block_on_cancelled_subscriber() {
        let backend = MemoryBackend::new();
        let subscription = backend.subscribe("user-service").await.unwrap();
        // 填满缓冲区，之后的 send 会一直等待
        for i in 0..SUBSCRIPTION_BUFFER {
            backend.publish("user-service", json!([i])).await;
        }
        subscription.cancel();
        tokio::time::timeout(
            Duration::from_secs(1),
            backend.publish("user-service", json!([])),
        )
        .await
        .expect("publish blocked on a cancelled subscriber");
    }
}
