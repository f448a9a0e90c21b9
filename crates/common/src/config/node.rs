//! 节点身份配置

use serde::{Deserialize, Serialize};

/// 节点身份（可选的手工覆盖）
///
/// `ipv4` 与 `country` 同时配置时跳过外网 IP 探测。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub ipv4: String,

    #[serde(default)]
    pub ipv6: String,

    /// 显示名称，默认使用 IPv4
    #[serde(default)]
    pub name: String,

    /// ISO 国家代码
    #[serde(default)]
    pub country: String,

    /// 区域 slug，默认由国家与位置生成
    #[serde(default)]
    pub region: String,
}

impl NodeConfig {
    /// 是否已手工指定身份
    pub fn is_pinned(&self) -> bool {
        !self.ipv4.trim().is_empty() && !self.country.trim().is_empty()
    }
}
