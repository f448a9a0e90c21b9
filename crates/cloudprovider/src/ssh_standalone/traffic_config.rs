//! 独立主机上的流量配置文件
//!
//! 文件带人工可读的注释，允许运维手工修改，解析时忽略注释行。

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};

pub const TRAFFIC_CONFIG_DIR: &str = "$HOME/.kaitu";
pub const TRAFFIC_CONFIG_PATH: &str = "$HOME/.kaitu/traffic-config.yaml";

/// 默认流量额度 2 TiB
pub const DEFAULT_TRAFFIC_TOTAL_BYTES: i64 = 2 * 1024 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficConfig {
    /// 流量额度（字节）
    pub traffic_total_bytes: i64,
    /// 开始计量的 Unix 时间戳
    pub traffic_reset_at: i64,
}

impl TrafficConfig {
    /// 默认额度，从 `now` 开始计量
    pub fn with_defaults(now: i64) -> Self {
        Self {
            traffic_total_bytes: DEFAULT_TRAFFIC_TOTAL_BYTES,
            traffic_reset_at: now,
        }
    }

    /// 解析配置文件内容，空文件或字段非法返回 `None`
    pub fn parse(content: &str) -> Option<Self> {
        if content.trim().is_empty() {
            return None;
        }
        serde_yaml::from_str(content).ok()
    }

    /// 生成带注释的 YAML
    pub fn render(&self) -> String {
        let reset_time = Local
            .timestamp_opt(self.traffic_reset_at, 0)
            .single()
            .map(|t: DateTime<Local>| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let total_gb = self.traffic_total_bytes as f64 / (1024.0 * 1024.0 * 1024.0);

        format!(
            "# Kaitu Traffic Configuration
# This file is managed by kaitu-center, but you can manually edit it.
# Changes will be preserved during sync.

# Total traffic allowance in bytes (default: 2TB = {DEFAULT_TRAFFIC_TOTAL_BYTES})
# Current value: {total_gb:.2} GB
traffic_total_bytes: {}

# Unix timestamp when traffic tracking started
# Human readable: {reset_time}
traffic_reset_at: {}
",
            self.traffic_total_bytes, self.traffic_reset_at
        )
    }

    /// 在远端写入配置文件的 shell 命令
    pub fn write_command(&self) -> String {
        format!(
            "mkdir -p {TRAFFIC_CONFIG_DIR} && cat > {TRAFFIC_CONFIG_PATH} << 'EOF'\n{}EOF",
            self.render()
        )
    }
}

/// 读取远端配置文件的 shell 命令
pub fn read_command() -> String {
    format!("cat {TRAFFIC_CONFIG_PATH} 2>/dev/null")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_roundtrip() {
        let config = TrafficConfig {
            traffic_total_bytes: 1024 * 1024 * 1024 * 500,
            traffic_reset_at: 1_700_000_000,
        };
        let yaml = config.render();
        assert!(yaml.starts_with("# Kaitu Traffic Configuration"));
        assert!(yaml.contains("# Current value: 500.00 GB"));
        assert_eq!(TrafficConfig::parse(&yaml), Some(config));
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(TrafficConfig::parse(""), None);
        assert_eq!(TrafficConfig::parse("not: [valid"), None);
        assert_eq!(TrafficConfig::parse("traffic_total_bytes: abc\n"), None);
    }

    #[test]
    fn test_write_command_heredoc() {
        let cmd = TrafficConfig::with_defaults(0).write_command();
        assert!(cmd.starts_with("mkdir -p $HOME/.kaitu && cat > $HOME/.kaitu/traffic-config.yaml << 'EOF'\n"));
        assert!(cmd.ends_with("traffic_reset_at: 0\nEOF"));
    }
}
