//! K2 节点代理核心
//!
//! 提供以下能力：
//! 1. 按地址族探测本机公网 IP 与国家/地区
//! 2. 向中心注册节点与隧道，周期上报状态，下线时注销
//! 3. 设备认证（带正/负缓存）与 RADIUS PAP 桥接
//! 4. 证书落盘、自签名证书兜底与服务配置渲染
//! 5. 系统指标采集与计费周期流量统计

pub mod auth_cache;
pub mod cert;
pub mod clock;
pub mod collector;
pub mod connect_url;
pub mod ech;
pub mod error;
mod fs;
pub mod ip;
pub mod netdev;
pub mod node;
pub mod radius;
pub mod ready;
pub mod selfcert;
pub mod template;
pub mod traffic;
pub mod types;

pub use auth_cache::{AuthCache, AuthCacheResult};
pub use cert::{SERVER_CERT_FILE, SERVER_KEY_FILE, persist_tunnel_cert};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collector::{Collector, DEFAULT_REPORT_INTERVAL, StatusReporter};
pub use connect_url::{parse_connect_url, read_connect_url};
pub use ech::{EchKeyConfig, EchKeysFile};
pub use error::{Result, SidecarError};
pub use ip::{IpData, IpDetector, IpFamily, IpService};
pub use node::{DEFAULT_CENTER_TIMEOUT, Node, NodeIdentity, NodeState};
pub use crate::radius::{Authenticator, RadiusServer};
pub use ready::{clear_ready_marker, write_ready_marker};
pub use selfcert::{SelfSignedCertConfig, get_or_create_self_signed_cert};
pub use traffic::{TrafficMonitor, TrafficStats};
pub use types::*;
