//! Consul 注册中心后端
//!
//! 注册走 agent API，成员变化通过 `/v1/health/service/:name` 的阻塞查询获得

use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use reqwest::{Client as HttpClient, Url};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{RegistryBackend, Subscription};
use crate::config::RegistryConfig;
use crate::error::InfraResult;
use crate::retry::{BackoffPolicy, ExponentialBackoffPolicy};
use crate::types::RegistrationDescriptor;

const SUBSCRIPTION_BUFFER: usize = 16;
const CONSUL_INDEX_HEADER: &str = "X-Consul-Index";

#[allow(non_snake_case)]
#[derive(Serialize)]
struct ConsulServiceRegistration {
    ID: String,
    Name: String,
    Address: String,
    Port: u16,
    Check: ConsulCheck,
}

#[allow(non_snake_case)]
#[derive(Serialize)]
struct ConsulCheck {
    HTTP: String,
    Timeout: String,
    Interval: String,
    TTL: String,
    DeregisterCriticalServiceAfter: String,
}

fn consul_duration(duration: Duration) -> String {
    format!("{}s", duration.as_secs())
}

impl From<&RegistrationDescriptor> for ConsulServiceRegistration {
    fn from(descriptor: &RegistrationDescriptor) -> Self {
        Self {
            ID: descriptor.id.clone(),
            Name: descriptor.name.clone(),
            Address: descriptor.addr.clone(),
            Port: descriptor.port,
            Check: ConsulCheck {
                HTTP: descriptor.check.http.clone(),
                Timeout: consul_duration(descriptor.check.timeout),
                Interval: consul_duration(descriptor.check.interval),
                TTL: consul_duration(descriptor.check.ttl),
                DeregisterCriticalServiceAfter: consul_duration(
                    descriptor.check.deregister_critical_after,
                ),
            },
        }
    }
}

/// Consul 注册中心后端
pub struct ConsulBackend {
    http_client: HttpClient,
    consul_url: String,
    base_url: Url,
    wait: Duration,
    backoff: ExponentialBackoffPolicy,
}

impl ConsulBackend {
    pub fn new(config: &RegistryConfig) -> InfraResult<Self> {
        let http_client = HttpClient::builder()
            .timeout(config.request_timeout())
            .build()
            .context("failed to build consul http client")?;

        let consul_url = normalize_url(&config.address);
        let base_url = Url::parse(&consul_url)
            .with_context(|| format!("invalid consul address {}", config.address))?;
        if base_url.cannot_be_a_base() {
            bail!("invalid consul address {}", config.address);
        }

        Ok(Self {
            http_client,
            consul_url,
            base_url,
            wait: config.wait(),
            backoff: ExponentialBackoffPolicy::from_config(config),
        })
    }

    pub fn consul_url(&self) -> &str {
        &self.consul_url
    }

    /// 拼接 API 地址，每一段单独做百分号编码
    fn endpoint(&self, segments: &[&str]) -> InfraResult<Url> {
        endpoint(&self.base_url, segments)
    }
}

fn normalize_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> InfraResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow!("consul address {} cannot be a base url", base))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[async_trait]
impl RegistryBackend for ConsulBackend {
    async fn register(&self, descriptor: &RegistrationDescriptor) -> InfraResult<()> {
        let url = self.endpoint(&["v1", "agent", "service", "register"])?;
        let payload = ConsulServiceRegistration::from(descriptor);

        self.http_client
            .put(url.clone())
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("PUT {}", url))?
            .error_for_status()
            .context("consul rejected service registration")?;

        info!(
            service = %descriptor.name,
            id = %descriptor.id,
            addr = %descriptor.addr,
            port = descriptor.port,
            "service registered with consul"
        );
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> InfraResult<()> {
        let url = self.endpoint(&["v1", "agent", "service", "deregister", service_id])?;
        self.http_client
            .put(url.clone())
            .send()
            .await
            .with_context(|| format!("PUT {}", url))?
            .error_for_status()
            .context("consul rejected service deregistration")?;

        info!(id = service_id, "service deregistered from consul");
        Ok(())
    }

    async fn subscribe(&self, service_name: &str) -> InfraResult<Subscription> {
        if service_name.trim().is_empty() {
            bail!("watch specification requires a service name");
        }

        let query = HealthQuery {
            http_client: self.http_client.clone(),
            url: self.endpoint(&["v1", "health", "service", service_name])?,
            wait: self.wait,
        };

        // 首次查询同步执行，传输失败直接作为订阅失败返回
        let (index, payload) = query.fetch(0).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tx.try_send(payload)?;

        let cancel = CancellationToken::new();
        tokio::spawn(run_watch(
            service_name.to_string(),
            query,
            tx,
            cancel.clone(),
            index,
            self.backoff,
        ));

        Ok(Subscription::new(service_name, rx, cancel))
    }
}

#[derive(Clone)]
struct HealthQuery {
    http_client: HttpClient,
    url: Url,
    wait: Duration,
}

impl HealthQuery {
    /// index 为 0 时立即返回，否则阻塞到索引变化或 wait 超时
    ///
    /// 返回的索引总是 >= 1；缺少或无法解析 `X-Consul-Index` 视为查询失败
    async fn fetch(&self, index: u64) -> InfraResult<(u64, Value)> {
        let mut request = self.http_client.get(self.url.clone());
        if index > 0 {
            request = request
                .query(&[
                    ("index", index.to_string()),
                    ("wait", consul_duration(self.wait)),
                ])
                // consul 会在 wait 上追加最多 wait/16 的随机抖动
                .timeout(self.wait + self.wait / 16 + Duration::from_secs(5));
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("GET {}", self.url))?
            .error_for_status()?;

        let new_index = resp
            .headers()
            .get(CONSUL_INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|&index| index > 0)
            .ok_or_else(|| anyhow!("missing or invalid {} header", CONSUL_INDEX_HEADER))?;

        let payload = resp
            .json::<Value>()
            .await
            .context("failed to decode consul health response")?;

        Ok((new_index, payload))
    }
}

/// 根据查询返回的索引计算下一次查询使用的索引
///
/// 返回 `None` 表示索引未变化，本次结果不需要投递。
/// 索引回退时重置为 0，下一次查询立即返回完整结果。
fn advance_index(current: u64, returned: u64) -> Option<u64> {
    if returned == current {
        None
    } else if returned < current {
        Some(0)
    } else {
        Some(returned)
    }
}

async fn run_watch(
    service_name: String,
    query: HealthQuery,
    tx: mpsc::Sender<Value>,
    cancel: CancellationToken,
    mut index: u64,
    backoff: ExponentialBackoffPolicy,
) {
    let mut failures = 0usize;

    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tx.closed() => break,
            result = query.fetch(index) => result,
        };

        match result {
            Ok((new_index, payload)) => {
                failures = 0;
                let Some(next) = advance_index(index, new_index) else {
                    continue;
                };
                if next == 0 {
                    debug!(
                        service = %service_name,
                        from = index,
                        to = new_index,
                        "consul index went backwards, resetting"
                    );
                }
                index = next;
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                let delay = backoff.backoff_duration(failures);
                failures += 1;
                warn!(
                    service = %service_name,
                    error = %format!("{:#}", e),
                    retry_in = ?delay,
                    "consul watch query failed"
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    debug!(service = %service_name, "consul watch stopped");
}
