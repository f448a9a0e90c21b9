//! 中心服务接口的数据结构
//!
//! 字段名与中心的 JSON 约定一致（camelCase）。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 中心统一响应信封，`code = 0` 表示成功
#[derive(Debug, Clone, Deserialize)]
pub struct CenterResponse<T> {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

/// k2 代理隧道协议
pub const PROTOCOL_K2V5: &str = "k2v5";
/// 接入服务（ocserv）隧道协议
pub const PROTOCOL_K2OC: &str = "k2oc";

/// 批量注册时的隧道配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelConfig {
    pub domain: String,
    /// k2v5 / k2v4 / k2wss / k2oc
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    pub port: u16,
    /// 端口跳跃范围，`[0, 0]` 表示关闭
    #[serde(default, skip_serializing_if = "is_zero")]
    pub hop_port_start: u16,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub hop_port_end: u16,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_test: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_relay: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_tunnel: bool,
    /// k2v5 证书指纹（来自 connect-url.txt）
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cert_pin: String,
    /// k2v5 ECH 配置（来自 connect-url.txt）
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ech_config_list: String,
}

fn is_zero(v: &u16) -> bool {
    *v == 0
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// 批量注册返回的单条隧道结果（含证书）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TunnelResult {
    pub domain: String,
    pub protocol: String,
    pub port: u16,
    pub hop_port_start: u16,
    pub hop_port_end: u16,
    pub ssl_cert: String,
    pub ssl_key: String,
    pub created: bool,
    pub has_relay: bool,
    pub has_tunnel: bool,
}

/// 节点注册 / 更新请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpsertRequest {
    pub country: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ipv6: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_token: String,
    /// 缺省视为在线
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_alive: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tunnels: Vec<TunnelConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeUpsertResponse {
    pub ipv4: String,
    pub secret_token: String,
    pub created: bool,
    pub tunnels: Vec<TunnelResult>,
}

/// PEM 格式的隧道证书
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelCertificate {
    pub ssl_cert: String,
    pub ssl_key: String,
}

/// 批量注册结果
#[derive(Debug, Clone, Default)]
pub struct RegisterResult {
    pub ipv4: String,
    pub node_created: bool,
    /// 域名 → 证书
    pub tunnels: BTreeMap<String, TunnelCertificate>,
}

/// 单条隧道注册请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelUpsertRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    pub port: u16,
    pub version: u32,
    pub hop_port_start: u16,
    pub hop_port_end: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TunnelUpsertResponse {
    pub tunnel_id: u64,
    pub domain: String,
    pub ssl_cert: String,
    pub ssl_key: String,
    pub created: bool,
}

/// 节点健康指标
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    pub network_in: i64,
    pub network_out: i64,
    pub connections: i64,

    pub network_speed_mbps: f64,
    pub bandwidth_up_mbps: f64,
    pub bandwidth_down_mbps: f64,
    pub network_latency_ms: f64,
    pub packet_loss_percent: f64,

    /// 计费周期结束时间（Unix 秒）
    pub billing_cycle_end_at: i64,
    /// 月流量上限（字节），0 表示不限
    pub monthly_traffic_limit_bytes: i64,
    pub used_traffic_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub updated_at: i64,
    pub health: Health,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCheckAuthRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub udid: String,
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceCheckAuthResponse {
    #[serde(rename = "userID")]
    pub user_id: u64,
    pub udid: String,
    #[serde(rename = "tokenExpiredAt")]
    pub token_expired_at: i64,
    #[serde(rename = "serviceExpiredAt")]
    pub service_expired_at: i64,
}

/// 设备认证错误码（与中心一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorCode {
    None,
    /// 401：token 无效或过期
    InvalidToken,
    /// 402：会员过期
    MembershipExpired,
    /// 500：网络或其他未知错误
    Unknown,
}

impl AuthErrorCode {
    pub fn code(&self) -> i32 {
        match self {
            Self::None => 0,
            Self::InvalidToken => 401,
            Self::MembershipExpired => 402,
            Self::Unknown => 500,
        }
    }

    /// 只保留明确的业务码，其余一律视为未知错误
    pub fn from_center_code(code: i32) -> Self {
        match code {
            0 => Self::None,
            401 => Self::InvalidToken,
            402 => Self::MembershipExpired,
            _ => Self::Unknown,
        }
    }
}

/// 设备认证结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub success: bool,
    pub error_code: AuthErrorCode,
    pub message: String,
}

impl AuthResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error_code: AuthErrorCode::None,
            message: String::new(),
        }
    }

    pub fn fail(error_code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code,
            message: message.into(),
        }
    }
}
