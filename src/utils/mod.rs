//! 工具模块

pub mod dispatch;

pub use dispatch::{DispatchError, Dispatcher};
