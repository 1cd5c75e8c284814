use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 健康检查状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Passing,
    Warning,
    Critical,
    Maintenance,
    #[serde(other)]
    Unknown,
}

/// 注册中心返回的一条健康检查结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    /// 节点级检查的 ServiceID 为空
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
    pub status: HealthStatus,
}

impl HealthCheck {
    pub fn new(service_id: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            service_id: service_id.into(),
            status,
        }
    }
}

/// 注册中心中的服务实例
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentService {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub service: String,
    pub address: String,
    pub port: u16,
}

/// 一次变更通知中的一条服务条目（Consul `/v1/health/service/:name` 的元素）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceEntry {
    pub service: AgentService,
    #[serde(default)]
    pub checks: Vec<HealthCheck>,
}

impl ServiceEntry {
    pub fn new(
        service_name: impl Into<String>,
        id: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            service: AgentService {
                id: id.into(),
                service: service_name.into(),
                address: address.into(),
                port,
            },
            checks: Vec::new(),
        }
    }

    pub fn with_check(mut self, service_id: impl Into<String>, status: HealthStatus) -> Self {
        self.checks.push(HealthCheck::new(service_id, status));
        self
    }

    /// 至少有一条属于本实例的检查处于 passing 状态
    pub fn is_healthy(&self) -> bool {
        self.checks.iter().any(|check| {
            check.service_id == self.service.id && check.status == HealthStatus::Passing
        })
    }

    /// `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.service.address, self.service.port)
    }
}

/// 注册时附带的主动健康检查
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckSpec {
    /// 探测 URL
    pub http: String,
    pub timeout: Duration,
    pub interval: Duration,
    pub ttl: Duration,
    pub deregister_critical_after: Duration,
}

/// 本进程的注册信息，注册后不再变化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationDescriptor {
    pub name: String,
    pub id: String,
    pub addr: String,
    pub port: u16,
    pub check: HealthCheckSpec,
}
