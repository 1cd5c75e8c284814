//! 服务注册模块

pub mod client;

pub use client::RegistryClient;
