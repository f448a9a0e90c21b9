//! 隧道相关配置：K2 隧道、中继、OC 接入服务、ECH

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// K2 隧道配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// 隧道域名，留空时按节点 IPv4 生成 `a-b-c-d.sslip.io`
    #[serde(default)]
    pub domain: String,

    /// 对外端口
    #[serde(default = "default_port")]
    pub port: u16,

    /// 端口跳跃范围起点（0 表示关闭）
    ///
    /// 环境变量 `K2_JUMP_PORT_MIN` 大于 0 时覆盖
    #[serde(default)]
    pub hop_port_start: u16,

    /// 端口跳跃范围终点（0 表示关闭）
    ///
    /// 环境变量 `K2_JUMP_PORT_MAX` 大于 0 时覆盖
    #[serde(default)]
    pub hop_port_end: u16,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            domain: String::new(),
            port: default_port(),
            hop_port_start: 0,
            hop_port_end: 0,
        }
    }
}

/// 中继能力开关
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// OC（ocserv 接入服务）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcConfig {
    #[serde(default)]
    pub enabled: bool,

    /// 接入服务域名
    #[serde(default)]
    pub domain: String,

    /// 对外端口
    #[serde(default = "default_port")]
    pub port: u16,

    /// ocserv 实际监听端口
    #[serde(default = "default_port")]
    pub listen_port: u16,

    /// ocserv 配置目录（证书、ocserv.conf、RADIUS 客户端配置）
    #[serde(default = "default_oc_config_dir")]
    pub config_dir: PathBuf,

    /// ocserv 访问 RADIUS 时使用的主机名
    #[serde(default = "default_radius_server")]
    pub radius_server: String,

    /// RADIUS 桥接监听地址
    #[serde(default = "default_radius_listen")]
    pub radius_listen: String,

    /// RADIUS 共享密钥
    #[serde(default = "default_radius_secret")]
    pub radius_secret: String,
}

impl Default for OcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            domain: String::new(),
            port: default_port(),
            listen_port: default_port(),
            config_dir: default_oc_config_dir(),
            radius_server: default_radius_server(),
            radius_listen: default_radius_listen(),
            radius_secret: default_radius_secret(),
        }
    }
}

impl OcConfig {
    /// 接入服务是否需要部署（启用且配置了域名）
    pub fn is_active(&self) -> bool {
        self.enabled && !self.domain.trim().is_empty()
    }
}

/// ECH 密钥同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchConfig {
    #[serde(default)]
    pub enabled: bool,

    /// 密钥 YAML 输出路径
    #[serde(default = "default_ech_keys_file")]
    pub keys_file: PathBuf,

    /// 写入密钥后发送 SIGHUP 的进程 PID 文件（可选）
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
}

impl Default for EchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            keys_file: default_ech_keys_file(),
            pid_file: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    443
}

fn default_oc_config_dir() -> PathBuf {
    PathBuf::from("/etc/ocserv")
}

fn default_radius_server() -> String {
    "k2-slave-sidecar".to_string()
}

fn default_radius_listen() -> String {
    "0.0.0.0:1812".to_string()
}

fn default_radius_secret() -> String {
    "localhost-radius".to_string()
}

fn default_ech_keys_file() -> PathBuf {
    PathBuf::from("/etc/kaitu/ech_keys.yaml")
}
