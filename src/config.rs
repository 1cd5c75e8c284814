use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{DiscoveryError, Result};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    /// 本进程的注册信息（不注册时可省略）
    pub service: Option<ServiceConfig>,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    /// 启动时需要监听的服务名
    #[serde(default)]
    pub watch: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub name: String,
    /// 缺省时生成 `{name}-{uuid}`
    pub id: Option<String>,
    pub address: String,
    pub port: u16,
}

impl ServiceConfig {
    pub fn instance_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.name, uuid::Uuid::new_v4()))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Consul HTTP API 地址
    #[serde(default = "default_registry_address")]
    pub address: String,
    /// 阻塞查询的最长等待时间（秒）
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
    /// 监听失败后的初始退避（毫秒）
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    /// 普通请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_registry_address() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_wait_secs() -> u64 {
    30
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_retry_max_ms() -> u64 {
    20_000
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: default_registry_address(),
            wait_secs: default_wait_secs(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl RegistryConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// 健康检查配置
///
/// 注册时作为固定参数下发给注册中心，运行期不可调整
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    /// 健康检查 HTTP 服务监听端口，0 表示由系统分配
    #[serde(default = "default_check_port")]
    pub port: u16,
    #[serde(default = "default_check_path")]
    pub path: String,
    #[serde(default = "default_check_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_check_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_check_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_deregister_after_secs")]
    pub deregister_after_secs: u64,
}

fn default_check_port() -> u16 {
    8080
}

fn default_check_path() -> String {
    "/check".to_string()
}

fn default_check_timeout_secs() -> u64 {
    3
}

fn default_check_interval_secs() -> u64 {
    5
}

fn default_check_ttl_secs() -> u64 {
    10
}

fn default_deregister_after_secs() -> u64 {
    30
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            port: default_check_port(),
            path: default_check_path(),
            timeout_secs: default_check_timeout_secs(),
            interval_secs: default_check_interval_secs(),
            ttl_secs: default_check_ttl_secs(),
            deregister_after_secs: default_deregister_after_secs(),
        }
    }
}

impl HealthCheckConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn deregister_after(&self) -> Duration {
        Duration::from_secs(self.deregister_after_secs)
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DiscoveryError::Config(format!("failed to read {}: {}", path, e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| DiscoveryError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_registry_constants() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.registry.address, "http://127.0.0.1:8500");
        assert_eq!(config.health_check.port, 8080);
        assert_eq!(config.health_check.path, "/check");
        assert_eq!(config.health_check.timeout(), Duration::from_secs(3));
        assert_eq!(config.health_check.interval(), Duration::from_secs(5));
        assert_eq!(config.health_check.ttl(), Duration::from_secs(10));
        assert_eq!(config.health_check.deregister_after(), Duration::from_secs(30));
        assert!(config.service.is_none());
        assert!(config.watch.is_empty());
    }

    #[test]
    fn test_parse_full_file() {
        let config = Config::from_toml_str(
            r#"
            watch = ["user-service", "order-service"]

            [registry]
            address = "http://consul.internal:8500"
            wait_secs = 5

            [service]
            name = "gateway"
            id = "gateway-1"
            address = "10.0.0.7"
            port = 9000

            [health_check]
            port = 18080
            "#,
        )
        .unwrap();

        assert_eq!(config.registry.address, "http://consul.internal:8500");
        assert_eq!(config.registry.wait(), Duration::from_secs(5));
        assert_eq!(config.registry.retry_max_ms, 20_000);
        let service = config.service.unwrap();
        assert_eq!(service.instance_id(), "gateway-1");
        assert_eq!(config.health_check.port, 18080);
        assert_eq!(config.health_check.ttl_secs, 10);
        assert_eq!(config.watch, ["user-service", "order-service"]);
    }

    #[test]
    fn test_generated_instance_id() {
        let service = ServiceConfig {
            name: "gateway".to_string(),
            id: None,
            address: "127.0.0.1".to_string(),
            port: 9000,
        };
        assert!(service.instance_id().starts_with("gateway-"));
        assert_ne!(service.instance_id(), service.instance_id());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_toml_str("watch = 3").unwrap_err();
        assert!(matches!(err, DiscoveryError::Config(_)));
    }
}
