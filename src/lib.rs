//! # k2-sidecar
//!
//! K2 节点代理：节点注册、证书落盘、配置渲染、RADIUS 桥接与状态上报

pub mod agent;
pub mod error;
pub mod observability;
pub mod process;

// Re-export commonly used types
pub use agent::{Agent, Bootstrapped};
pub use error::{Error, Result};
pub use k2_common::SidecarConfig;
