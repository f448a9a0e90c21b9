//! 统一配置管理系统
//!
//! sidecar 代理的全部配置项定义、默认值与校验逻辑都在这里统一管理。
//! 配置文件使用 TOML 格式，加载后再叠加环境变量覆盖。

pub mod center;
pub mod node;
pub mod tunnel;

pub use center::K2CenterConfig;
pub use node::NodeConfig;
pub use tunnel::{EchConfig, OcConfig, RelayConfig, TunnelConfig};

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// sidecar 主配置结构体
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SidecarConfig {
    /// 配置目录
    ///
    /// 证书（`certs/`）、渲染出的配置文件、`.ready` 标记与
    /// `connect-url.txt` 都位于此目录下。
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// 旧版 k2v4 服务的本地端口（环境变量 `K2V4_PORT` 覆盖）
    #[serde(default = "default_k2v4_port")]
    pub k2v4_port: String,

    /// 测试节点标记，随隧道注册上报
    #[serde(default)]
    pub test_node: bool,

    /// PID 文件路径（可选）
    pub pid: Option<String>,

    /// 设备认证缓存开关
    ///
    /// 默认关闭，环境变量 `K2_AUTH_CACHE_ENABLED=true` 时开启。
    #[serde(default)]
    pub auth_cache_enabled: bool,

    #[serde(default)]
    pub k2_center: K2CenterConfig,

    #[serde(default)]
    pub tunnel: TunnelConfig,

    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub oc: OcConfig,

    #[serde(default)]
    pub ech: EchConfig,

    /// 额外的本地路由（域名 → host:port），追加到代理配置中
    #[serde(default)]
    pub local_routes: BTreeMap<String, String>,

    /// 可观测性配置（日志）
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// 可观测性配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ObservabilityConfig {
    /// 过滤级别
    ///
    /// 支持 EnvFilter 语法（如 "info,reqwest=warn"）。默认值 "info"。
    #[serde(default = "default_filter_level")]
    pub filter_level: String,

    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    /// 日志输出目标
    ///
    /// - "console": 仅输出到控制台（默认）
    /// - "file": 输出到文件
    #[serde(default = "default_log_output")]
    pub output: String,

    /// 日志轮转开关（按天），仅 output = "file" 时有效
    #[serde(default)]
    pub rotate: bool,

    /// 日志文件目录
    #[serde(default = "default_log_path")]
    pub path: String,

    /// 以 JSON 格式输出
    #[serde(default)]
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            filter_level: default_filter_level(),
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: default_log_output(),
            rotate: false,
            path: default_log_path(),
            json: false,
        }
    }
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/etc/kaitu")
}

fn default_k2v4_port() -> String {
    "8443".to_string()
}

fn default_log_output() -> String {
    "console".to_string()
}

fn default_log_path() -> String {
    "logs/".to_string()
}

fn default_filter_level() -> String {
    "info".to_string()
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            k2v4_port: default_k2v4_port(),
            test_node: false,
            pid: None,
            auth_cache_enabled: false,
            k2_center: K2CenterConfig::default(),
            tunnel: TunnelConfig::default(),
            node: NodeConfig::default(),
            relay: RelayConfig::default(),
            oc: OcConfig::default(),
            ech: EchConfig::default(),
            local_routes: BTreeMap::new(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl SidecarConfig {
    /// 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        if !path_ref.is_file() {
            return Err(ConfigError::FileNotFound {
                path: path_ref.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path_ref)?;
        Self::from_toml(&content)
    }

    /// 从 TOML 字符串加载配置
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// 将配置序列化为 TOML 字符串
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// 叠加环境变量覆盖
    ///
    /// - `K2V4_PORT`
    /// - `K2_JUMP_PORT_MIN` / `K2_JUMP_PORT_MAX`（仅大于 0 时生效）
    /// - `K2_AUTH_CACHE_ENABLED`（值为 "true" 时开启认证缓存）
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("K2V4_PORT")
            && !port.trim().is_empty()
        {
            self.k2v4_port = port.trim().to_string();
        }

        if let Some(min) = env_port("K2_JUMP_PORT_MIN") {
            self.tunnel.hop_port_start = min;
        }
        if let Some(max) = env_port("K2_JUMP_PORT_MAX") {
            self.tunnel.hop_port_end = max;
        }

        if std::env::var("K2_AUTH_CACHE_ENABLED").as_deref() == Ok("true") {
            self.auth_cache_enabled = true;
        }
    }

    /// 证书目录 `<config_dir>/certs`
    pub fn certs_dir(&self) -> PathBuf {
        self.config_dir.join("certs")
    }

    /// 就绪标记文件 `<config_dir>/.ready`
    pub fn ready_marker_path(&self) -> PathBuf {
        self.config_dir.join(".ready")
    }

    /// 连接 URL 文件 `<config_dir>/connect-url.txt`
    pub fn connect_url_path(&self) -> PathBuf {
        self.config_dir.join("connect-url.txt")
    }

    /// 获取 PID 文件路径
    pub fn get_pid_path(&self) -> Option<String> {
        self.pid.clone()
    }

    /// 返回可观测性配置引用
    pub fn observability_config(&self) -> &ObservabilityConfig {
        &self.observability
    }

    /// 验证配置有效性
    ///
    /// 以 "Warning:" 开头的条目为非致命警告。
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // 验证过滤级别（EnvFilter 语法）
        let main_level = self
            .observability
            .filter_level
            .split(',')
            .next()
            .unwrap_or("")
            .trim();
        if !["trace", "debug", "info", "warn", "error"].contains(&main_level) {
            errors.push(format!(
                "Invalid filter level '{}', must start with one of: trace, debug, info, warn, error",
                self.observability.filter_level
            ));
        }

        if !["console", "file"].contains(&self.observability.log.output.as_str()) {
            errors.push(format!(
                "Invalid log output '{}' (observability.log.output), must be 'console' or 'file'",
                self.observability.log.output
            ));
        }

        if self.config_dir.as_os_str().is_empty() {
            errors.push("config_dir cannot be empty".to_string());
        }

        // 中心服务
        if self.k2_center.enabled {
            let base_url = self.k2_center.base_url.trim();
            if base_url.is_empty() {
                errors.push("k2_center.base_url is required when k2_center is enabled".to_string());
            } else if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                errors.push(format!(
                    "Invalid k2_center.base_url '{base_url}', must start with http:// or https://"
                ));
            }
            if self.k2_center.secret.trim().is_empty() {
                errors.push("k2_center.secret is required when k2_center is enabled".to_string());
            }
            if self.k2_center.report_interval_secs == 0 {
                errors.push("k2_center.report_interval_secs must be greater than 0".to_string());
            }
        }

        let billing = self.k2_center.billing_start_date.trim();
        if !billing.is_empty() && chrono::NaiveDate::parse_from_str(billing, "%Y-%m-%d").is_err() {
            errors.push(format!(
                "Invalid k2_center.billing_start_date '{billing}', expected YYYY-MM-DD"
            ));
        }

        // 端口跳跃范围
        let (start, end) = (self.tunnel.hop_port_start, self.tunnel.hop_port_end);
        if (start == 0) != (end == 0) {
            errors.push(format!(
                "tunnel hop port range [{start}, {end}] must set both ends or neither"
            ));
        } else if start > end {
            errors.push(format!(
                "tunnel hop_port_start ({start}) must not exceed hop_port_end ({end})"
            ));
        }

        if self.oc.enabled {
            if self.oc.domain.trim().is_empty() {
                errors.push(
                    "Warning: oc is enabled but oc.domain is empty, access server will be skipped"
                        .to_string(),
                );
            }
            if self
                .oc
                .radius_listen
                .parse::<std::net::SocketAddr>()
                .is_err()
            {
                errors.push(format!(
                    "Invalid oc.radius_listen '{}', must be a socket address",
                    self.oc.radius_listen
                ));
            }
            if self.oc.radius_secret.is_empty() {
                errors.push("oc.radius_secret cannot be empty".to_string());
            }
        }

        if self.ech.enabled && self.ech.keys_file.as_os_str().is_empty() {
            errors.push("ech.keys_file is required when ech is enabled".to_string());
        }

        if !self.tunnel.enabled && !self.relay.enabled {
            errors.push(
                "Warning: both tunnel and relay are disabled, node will carry no traffic"
                    .to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn env_port(name: &str) -> Option<u16> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u16>().ok())
        .filter(|v| *v > 0)
}
