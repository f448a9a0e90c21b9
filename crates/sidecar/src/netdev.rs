//! `/proc/net/dev` 网卡计数器

use crate::error::Result;
use std::path::PathBuf;

pub const PROC_NET_DEV: &str = "/proc/net/dev";

/// 单个网卡的累计计数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceStats {
    pub name: String,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_dropped: u64,
    pub tx_bytes: u64,
}

impl InterfaceStats {
    pub fn total_bytes(&self) -> u64 {
        self.rx_bytes.saturating_add(self.tx_bytes)
    }
}

/// 回环、veth 与 docker 网卡不计入统计
pub fn is_virtual_interface(name: &str) -> bool {
    name == "lo" || name.starts_with("veth") || name.starts_with("docker")
}

/// 解析 `/proc/net/dev`，跳过两行表头与字段不足的行
pub fn parse_net_dev(content: &str) -> Vec<InterfaceStats> {
    content
        .lines()
        .filter_map(|line| {
            let (name, counters) = line.split_once(':')?;
            let fields: Vec<&str> = counters.split_whitespace().collect();
            if fields.len() < 9 {
                return None;
            }
            let num = |i: usize| fields[i].parse::<u64>().unwrap_or(0);
            Some(InterfaceStats {
                name: name.trim().to_string(),
                rx_bytes: num(0),
                rx_packets: num(1),
                rx_dropped: num(3),
                tx_bytes: num(8),
            })
        })
        .collect()
}

/// 网卡计数来源
pub trait NetDevSource: Send + Sync {
    fn read_stats(&self) -> Result<Vec<InterfaceStats>>;
}

/// 从 procfs 读取
#[derive(Debug, Clone)]
pub struct ProcNetDev {
    path: PathBuf,
}

impl Default for ProcNetDev {
    fn default() -> Self {
        Self {
            path: PathBuf::from(PROC_NET_DEV),
        }
    }
}

impl ProcNetDev {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NetDevSource for ProcNetDev {
    fn read_stats(&self) -> Result<Vec<InterfaceStats>> {
        let content = std::fs::read_to_string(&self.path)?;
        Ok(parse_net_dev(&content))
    }
}
