//! K2 中心服务连接配置

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// K2 中心（协调器）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct K2CenterConfig {
    /// 是否接入中心
    ///
    /// 关闭时 sidecar 以独立模式运行：不注册、不上报，使用自签名证书。
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// 中心服务地址，例如 "https://k2.52j.me"
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// HTTP 请求超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// 节点共享密钥（Basic 认证的密码部分）
    #[serde(default)]
    pub secret: String,

    /// 状态上报间隔（秒）
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,

    /// 计费周期起始日期（YYYY-MM-DD），为空表示不统计月流量
    #[serde(default)]
    pub billing_start_date: String,

    /// 月流量上限（GB），0 表示不限
    #[serde(default)]
    pub traffic_limit_gb: u64,
}

impl Default for K2CenterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            secret: String::new(),
            report_interval_secs: default_report_interval_secs(),
            billing_start_date: String::new(),
            traffic_limit_gb: 0,
        }
    }
}

impl K2CenterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    /// 去掉末尾 `/` 的中心地址
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "https://k2.52j.me".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_report_interval_secs() -> u64 {
    120
}
