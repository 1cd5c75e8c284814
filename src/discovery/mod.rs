//! 服务发现模块
//!
//! 订阅注册中心的成员变化，为每个服务名维护健康实例快照，
//! 支持轮询和按实例 ID（随机回退）两种选择方式。

pub mod address_set;
pub mod backend;
pub mod watcher;

pub use address_set::{AddressInfo, AddressSet};
pub use backend::{ConsulBackend, MemoryBackend, RegistryBackend, Subscription};
pub use watcher::{AddressCache, DiscoveryWatcher, Pick};
