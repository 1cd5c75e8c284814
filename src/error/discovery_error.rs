//! 服务注册与发现统一错误类型

use super::code::ErrorCode;
use thiserror::Error;

/// 服务注册与发现统一错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// 注册中心拒绝注册或不可达
    #[error("registration of service {service} failed: {reason}")]
    RegistrationFailed { service: String, reason: String },

    /// 当前进程已经注册过
    #[error("service {service} is already registered as {id}")]
    AlreadyRegistered { service: String, id: String },

    /// 尚未注册
    #[error("no service instance registered")]
    NotRegistered,

    /// 注销失败
    #[error("deregistration of service instance {id} failed: {reason}")]
    DeregistrationFailed { id: String, reason: String },

    /// 订阅建立失败（监听参数非法或传输失败）
    #[error("subscription to service {service} failed: {reason}")]
    SubscriptionFailed { service: String, reason: String },

    /// 指定服务没有监听器
    #[error("no watcher for service {service}")]
    WatcherNotFound { service: String },

    /// 当前没有健康实例
    #[error("no healthy instance known for service {service}")]
    EmptyAddressSet { service: String },

    /// 健康检查 HTTP 服务错误
    #[error("health check server error: {0}")]
    HealthServer(String),

    /// 配置错误
    #[error("configuration error: {0}")]
    Config(String),
}

impl DiscoveryError {
    pub fn registration_failed(service: impl Into<String>, reason: impl Into<String>) -> Self {
        DiscoveryError::RegistrationFailed {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn subscription_failed(service: impl Into<String>, reason: impl Into<String>) -> Self {
        DiscoveryError::SubscriptionFailed {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn watcher_not_found(service: impl Into<String>) -> Self {
        DiscoveryError::WatcherNotFound {
            service: service.into(),
        }
    }

    pub fn empty_address_set(service: impl Into<String>) -> Self {
        DiscoveryError::EmptyAddressSet {
            service: service.into(),
        }
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            DiscoveryError::RegistrationFailed { .. } => ErrorCode::RegistrationFailed,
            DiscoveryError::AlreadyRegistered { .. } => ErrorCode::AlreadyRegistered,
            DiscoveryError::NotRegistered => ErrorCode::NotRegistered,
            DiscoveryError::DeregistrationFailed { .. } => ErrorCode::DeregistrationFailed,
            DiscoveryError::SubscriptionFailed { .. } => ErrorCode::SubscriptionFailed,
            DiscoveryError::WatcherNotFound { .. } => ErrorCode::WatcherNotFound,
            DiscoveryError::EmptyAddressSet { .. } => ErrorCode::EmptyAddressSet,
            DiscoveryError::HealthServer(_) => ErrorCode::HealthServerError,
            DiscoveryError::Config(_) => ErrorCode::ConfigurationError,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

impl From<std::io::Error> for DiscoveryError {
    fn from(err: std::io::Error) -> Self {
        DiscoveryError::HealthServer(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, DiscoveryError>;
