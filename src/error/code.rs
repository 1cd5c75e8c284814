//! 错误代码和错误类别定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 服务注册相关错误
/// - 2000-2999: 服务发现相关错误
/// - 6000-6999: 系统相关错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 服务注册相关错误 (1000-1999)
    // ============================================================
    RegistrationFailed = 1000,
    AlreadyRegistered = 1001,
    NotRegistered = 1002,
    DeregistrationFailed = 1003,

    // ============================================================
    // 服务发现相关错误 (2000-2999)
    // ============================================================
    SubscriptionFailed = 2000,
    WatcherNotFound = 2001,
    EmptyAddressSet = 2002,

    // ============================================================
    // 系统相关错误 (6000-6999)
    // ============================================================
    HealthServerError = 6000,
    ConfigurationError = 6001,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 从数字值创建错误代码
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            1000 => Some(ErrorCode::RegistrationFailed),
            1001 => Some(ErrorCode::AlreadyRegistered),
            1002 => Some(ErrorCode::NotRegistered),
            1003 => Some(ErrorCode::DeregistrationFailed),
            2000 => Some(ErrorCode::SubscriptionFailed),
            2001 => Some(ErrorCode::WatcherNotFound),
            2002 => Some(ErrorCode::EmptyAddressSet),
            6000 => Some(ErrorCode::HealthServerError),
            6001 => Some(ErrorCode::ConfigurationError),
            _ => None,
        }
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RegistrationFailed => "REGISTRATION_FAILED",
            ErrorCode::AlreadyRegistered => "ALREADY_REGISTERED",
            ErrorCode::NotRegistered => "NOT_REGISTERED",
            ErrorCode::DeregistrationFailed => "DEREGISTRATION_FAILED",
            ErrorCode::SubscriptionFailed => "SUBSCRIPTION_FAILED",
            ErrorCode::WatcherNotFound => "WATCHER_NOT_FOUND",
            ErrorCode::EmptyAddressSet => "EMPTY_ADDRESS_SET",
            ErrorCode::HealthServerError => "HEALTH_SERVER_ERROR",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
        }
    }

    /// 获取错误代码的类别
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Registry,
            2000..=2999 => ErrorCategory::Discovery,
            _ => ErrorCategory::System,
        }
    }

    /// 判断是否为可重试的错误
    ///
    /// 注册中心不可达、暂时没有健康实例都属于可恢复的状态
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RegistrationFailed
                | ErrorCode::DeregistrationFailed
                | ErrorCode::SubscriptionFailed
                | ErrorCode::EmptyAddressSet
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Registry,
    Discovery,
    System,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Registry => write!(f, "REGISTRY"),
            ErrorCategory::Discovery => write!(f, "DISCOVERY"),
            ErrorCategory::System => write!(f, "SYSTEM"),
        }
    }
}
