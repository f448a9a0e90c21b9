//! 统一的记录类型
//!
//! 所有驱动都把厂商响应归一化为这里的结构

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// 厂商标签
pub const PROVIDER_ALIYUN_SWAS: &str = "aliyun_swas";
pub const PROVIDER_ALIBABA_SWAS: &str = "alibaba_swas";
pub const PROVIDER_AWS_LIGHTSAIL: &str = "aws_lightsail";
pub const PROVIDER_BANDWAGON: &str = "bandwagon";
pub const PROVIDER_TENCENT_LIGHTHOUSE: &str = "tencent_lighthouse";
pub const PROVIDER_QCLOUD_LIGHTHOUSE: &str = "qcloud_lighthouse";
pub const PROVIDER_SSH_STANDALONE: &str = "ssh_standalone";

/// 实例状态字符串（小写）
pub mod state {
    pub const RUNNING: &str = "running";
    pub const STOPPED: &str = "stopped";
    pub const SUSPENDED: &str = "suspended";
    pub const MIGRATING: &str = "migrating";
    pub const ERROR: &str = "error";
    pub const UNKNOWN: &str = "unknown";
}

/// 某一时刻观察到的实例状态
///
/// 每次查询时构造，抽象层本身不做缓存。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    pub instance_id: String,
    pub name: String,
    pub ip_address: String,
    pub ipv6_address: String,
    pub region: String,
    /// 当前计费周期已用流量（字节）
    pub traffic_used_bytes: i64,
    /// 当前计费周期流量额度（字节）
    pub traffic_total_bytes: i64,
    /// 下次流量重置时间
    pub traffic_reset_at: Option<DateTime<Utc>>,
    /// 到期时间，`None` 表示按量付费或永久
    pub expires_at: Option<DateTime<Utc>>,
    /// running / stopped / suspended / migrating / error / unknown
    pub state: String,
}

impl InstanceStatus {
    /// 以 instance id 为名称、其余字段为空的状态
    pub fn new(instance_id: impl Into<String>) -> Self {
        let instance_id = instance_id.into();
        Self {
            name: instance_id.clone(),
            instance_id,
            ip_address: String::new(),
            ipv6_address: String::new(),
            region: String::new(),
            traffic_used_bytes: 0,
            traffic_total_bytes: 0,
            traffic_reset_at: None,
            expires_at: None,
            state: state::UNKNOWN.to_string(),
        }
    }
}

/// 写操作的结果
///
/// `data` 中携带厂商相关的附加字段，例如 `new_ip`、`instance_id`。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
}

impl OperationResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

/// 更换 IP 选项
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeIpOptions {
    /// 迁移类厂商的目标机房代码
    #[serde(default)]
    pub target_region: String,
}

/// 创建实例选项
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateInstanceOptions {
    /// 统一 slug 或厂商区域代码
    pub region: String,
    /// 套餐 / bundle id
    pub plan: String,
    /// 系统镜像 id
    pub image_id: String,
    pub name: String,
}

/// 区域目录记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionInfo {
    /// 统一 slug，例如 "us-virginia"
    pub slug: String,
    pub name_en: String,
    pub name_zh: String,
    pub country: String,
    /// 厂商区域代码，例如 "us-east-1"
    pub provider_id: String,
    pub available: bool,
}

/// 套餐目录记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanInfo {
    pub id: String,
    pub name: String,
    pub cpu: u32,
    pub memory_mb: u32,
    pub storage_gb: u32,
    pub transfer_tb: f64,
    pub price_monthly: f64,
}

/// 镜像目录记录（仅系统镜像）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    pub name: String,
    /// linux / windows
    pub os: String,
    pub platform: String,
    pub description: String,
}

/// 解析厂商返回的 `YYYY-MM-DDTHH:MM:SSZ` 时间，空串或格式错误返回 `None`
pub(crate) fn parse_vendor_time(s: &str) -> Option<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ")
        .ok()
        .map(|t| t.and_utc())
}
