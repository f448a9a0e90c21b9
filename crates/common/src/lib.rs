//! K2 基础组件库
//!
//! 为 sidecar 代理与云厂商抽象层提供共享的配置、错误类型和工具函数

pub mod config;
pub mod error;
pub mod util;

// Re-export commonly used types for convenience
pub use config::{ObservabilityConfig, SidecarConfig};
pub use error::ConfigError;
pub use util::{region_slug, slugify, sslip_domain};
