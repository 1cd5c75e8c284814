//! 错误处理模块
//!
//! 对外统一使用 `DiscoveryError`，基础设施层（注册中心后端）使用 `anyhow`，
//! 在门面层转换为带错误代码的业务错误

pub mod code;
pub mod discovery_error;

pub use code::{ErrorCategory, ErrorCode};
pub use discovery_error::{DiscoveryError, Result};

/// 基础设施层默认使用的结果类型
pub type InfraResult<T> = anyhow::Result<T>;

/// 将基础设施错误转换为 `DiscoveryError`
///
/// 原始错误链完整保留在 reason 中
pub fn map_infra_error<F>(error: anyhow::Error, build: F) -> DiscoveryError
where
    F: FnOnce(String) -> DiscoveryError,
{
    build(format!("{:#}", error))
}

/// `InfraResult` 的辅助扩展，用于快速转换为统一的业务错误类型
pub trait InfraResultExt<T> {
    fn into_discovery<F>(self, build: F) -> Result<T>
    where
        F: FnOnce(String) -> DiscoveryError;
}

impl<T> InfraResultExt<T> for InfraResult<T> {
    fn into_discovery<F>(self, build: F) -> Result<T>
    where
        F: FnOnce(String) -> DiscoveryError,
    {
        self.map_err(|err| map_infra_error(err, build))
    }
}
