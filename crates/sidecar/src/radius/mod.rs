//! RADIUS 认证桥接
//!
//! 报文编解码与 PAP 密码隐藏由 `radius` crate 完成，
//! 这里只负责把 Access-Request 映射为设备认证结果。

pub mod server;

pub use server::{Authenticator, DEFAULT_RADIUS_SECRET, MAX_PACKET_LEN, RadiusServer};
