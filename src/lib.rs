//! Flare Discovery Client
//!
//! 把本进程注册到 Consul，并为关心的服务维护一份随注册中心通知实时更新的健康实例视图，
//! 提供轮询和按实例 ID（随机回退）两种选择方式。

pub mod config;
pub mod discovery;
pub mod error;
pub mod health;
pub mod logging;
pub mod membership;
pub mod registry;
pub mod retry;
pub mod types;
pub mod utils;

// Re-exports
pub use config::{Config, HealthCheckConfig, RegistryConfig, ServiceConfig};
pub use discovery::{
    AddressCache, AddressInfo, AddressSet, ConsulBackend, DiscoveryWatcher, MemoryBackend, Pick,
    RegistryBackend, Subscription,
};
pub use error::{DiscoveryError, ErrorCategory, ErrorCode, InfraResult, Result};
pub use health::HealthServer;
pub use membership::{MemberStatus, Membership};
pub use registry::RegistryClient;
pub use types::{
    AgentService, HealthCheck, HealthCheckSpec, HealthStatus, RegistrationDescriptor, ServiceEntry,
};
pub use utils::{DispatchError, Dispatcher};
