//! 节点指标采集与上报
//!
//! 每个周期采集 CPU、内存、磁盘、网卡流量、连接数、丢包率与计费周期流量，
//! 通过 [`StatusReporter`] 上报中心。单次上报失败只记录日志，循环继续。

use crate::error::Result;
use crate::netdev::{InterfaceStats, NetDevSource, ProcNetDev, is_virtual_interface};
use crate::node::Node;
use crate::traffic::TrafficMonitor;
use crate::types::Health;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(120);

/// 外部命令（df、ss）超时
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// 状态上报
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report_status(&self, health: Health) -> Result<()>;
}

#[async_trait]
impl StatusReporter for Node {
    async fn report_status(&self, health: Health) -> Result<()> {
        Node::report_status(self, health).await
    }
}

// ========== 解析函数 ==========

/// `/proc/stat` 首行 cpu 的占用率（单次快照：(total - idle) / total）
pub fn parse_cpu_usage(stat: &str) -> f64 {
    let Some(line) = stat.lines().next() else {
        return 0.0;
    };
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 || fields[0] != "cpu" {
        return 0.0;
    }

    let values: Vec<f64> = fields[1..]
        .iter()
        .map(|v| v.parse::<f64>().unwrap_or(0.0))
        .collect();
    let total: f64 = values.iter().sum();
    let idle = values[3];
    if total == 0.0 {
        return 0.0;
    }
    (total - idle) / total * 100.0
}

/// `/proc/meminfo` 的 (MemTotal - MemAvailable) / MemTotal
pub fn parse_memory_usage(meminfo: &str) -> f64 {
    let mut total = 0.0;
    let mut available = 0.0;
    for line in meminfo.lines() {
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        let value = value.parse::<f64>().unwrap_or(0.0);
        match key {
            "MemTotal:" => total = value,
            "MemAvailable:" => available = value,
            _ => {}
        }
    }
    if total == 0.0 {
        return 0.0;
    }
    (total - available) / total * 100.0
}

/// `df -h /` 输出第二行第 5 列的百分比
pub fn parse_df_usage(output: &str) -> f64 {
    output
        .lines()
        .nth(1)
        .and_then(|line| line.split_whitespace().nth(4))
        .and_then(|col| col.trim_end_matches('%').parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// `ss -tan` 的连接数（去掉表头）
pub fn count_connections(output: &str) -> i64 {
    let lines = output.lines().filter(|l| !l.trim().is_empty()).count() as i64;
    (lines - 1).max(0)
}

/// 物理网卡的接收/发送字节总和
pub fn network_totals(stats: &[InterfaceStats]) -> (u64, u64) {
    stats
        .iter()
        .filter(|s| !is_virtual_interface(&s.name))
        .fold((0u64, 0u64), |(rx, tx), s| {
            (rx.saturating_add(s.rx_bytes), tx.saturating_add(s.tx_bytes))
        })
}

/// 接收方向丢包率（dropped / packets）
pub fn packet_loss_percent(stats: &[InterfaceStats]) -> f64 {
    let (dropped, packets) = stats
        .iter()
        .filter(|s| !is_virtual_interface(&s.name))
        .fold((0u64, 0u64), |(d, p), s| {
            (d.saturating_add(s.rx_dropped), p.saturating_add(s.rx_packets))
        });
    if packets == 0 {
        return 0.0;
    }
    dropped as f64 / packets as f64 * 100.0
}

/// 两次采样之间的速率（Mbps）
pub fn bandwidth_mbps(delta_bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    delta_bytes as f64 * 8.0 / (secs * 1_000_000.0)
}

async fn run_command(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();
    match tokio::time::timeout(COMMAND_TIMEOUT, output).await {
        Ok(Ok(out)) if out.status.success() => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
        Ok(Ok(out)) => {
            debug!("[Metrics] {} exited with {}", program, out.status);
            None
        }
        Ok(Err(e)) => {
            debug!("[Metrics] Failed to run {}: {}", program, e);
            None
        }
        Err(_) => {
            warn!("[Metrics] {} timed out after {:?}", program, COMMAND_TIMEOUT);
            None
        }
    }
}

async fn read_proc(path: &str) -> String {
    tokio::fs::read_to_string(path).await.unwrap_or_default()
}

// ========== 采集器 ==========

#[derive(Debug, Clone, Copy)]
struct NetSample {
    rx_bytes: u64,
    tx_bytes: u64,
    at: Instant,
}

pub struct Collector {
    reporter: Arc<dyn StatusReporter>,
    interval: Duration,
    net_source: Arc<dyn NetDevSource>,
    traffic: Option<TrafficMonitor>,
    last_net: Option<NetSample>,
}

impl Collector {
    pub fn new(reporter: Arc<dyn StatusReporter>, interval: Duration) -> Self {
        Self {
            reporter,
            interval,
            net_source: Arc::new(ProcNetDev::default()),
            traffic: None,
            last_net: None,
        }
    }

    pub fn with_traffic_monitor(mut self, monitor: TrafficMonitor) -> Self {
        self.traffic = Some(monitor);
        self
    }

    pub fn with_net_source(mut self, source: Arc<dyn NetDevSource>) -> Self {
        self.net_source = source;
        self
    }

    /// 采集一次指标
    pub async fn collect(&mut self) -> Health {
        let mut health = Health {
            cpu_usage: parse_cpu_usage(&read_proc("/proc/stat").await),
            memory_usage: parse_memory_usage(&read_proc("/proc/meminfo").await),
            disk_usage: run_command("df", &["-h", "/"])
                .await
                .map(|out| parse_df_usage(&out))
                .unwrap_or(0.0),
            connections: run_command("ss", &["-tan"])
                .await
                .map(|out| count_connections(&out))
                .unwrap_or(0),
            ..Default::default()
        };

        self.apply_network(&mut health);

        if let Some(traffic) = &self.traffic {
            match traffic.stats().await {
                Ok(stats) => {
                    health.billing_cycle_end_at = stats.billing_cycle_end_at;
                    health.monthly_traffic_limit_bytes = stats.monthly_traffic_limit_bytes;
                    health.used_traffic_bytes = stats.used_traffic_bytes;
                }
                Err(e) => warn!("[Metrics] Failed to get traffic stats: {}", e),
            }
        }

        health
    }

    /// 网卡字节、带宽与丢包；首次采样带宽为 0
    fn apply_network(&mut self, health: &mut Health) {
        let stats = match self.net_source.read_stats() {
            Ok(stats) => stats,
            Err(e) => {
                warn!("[Metrics] Failed to read interface counters: {}", e);
                return;
            }
        };

        let (rx_bytes, tx_bytes) = network_totals(&stats);
        let now = Instant::now();
        if let Some(last) = self.last_net {
            let elapsed = now.duration_since(last.at);
            health.bandwidth_down_mbps = bandwidth_mbps(rx_bytes.saturating_sub(last.rx_bytes), elapsed);
            health.bandwidth_up_mbps = bandwidth_mbps(tx_bytes.saturating_sub(last.tx_bytes), elapsed);
        }
        health.network_in = i64::try_from(rx_bytes).unwrap_or(i64::MAX);
        health.network_out = i64::try_from(tx_bytes).unwrap_or(i64::MAX);
        health.packet_loss_percent = packet_loss_percent(&stats);

        self.last_net = Some(NetSample {
            rx_bytes,
            tx_bytes,
            at: now,
        });
    }

    pub async fn collect_and_report(&mut self) -> Result<()> {
        let health = self.collect().await;
        info!(
            cpu = health.cpu_usage,
            memory = health.memory_usage,
            disk = health.disk_usage,
            up_mbps = health.bandwidth_up_mbps,
            down_mbps = health.bandwidth_down_mbps,
            "[Metrics] Collected metrics"
        );
        self.reporter.report_status(health).await
    }

    /// 周期采集上报，直到收到关闭信号
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("[Metrics] Starting metrics collection loop (interval {:?})", self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        // 首个 tick 立即触发，跳过
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.collect_and_report().await {
                        error!("[Metrics] Error collecting and reporting: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("[Metrics] Received shutdown signal, stopping metrics loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_cpu_snapshot() {
        // total = 1000, idle = 750
        let stat = "cpu  100 50 100 750 0 0 0 0 0 0\ncpu0 1 2 3 4\n";
        assert!((parse_cpu_usage(stat) - 25.0).abs() < 1e-9);
        assert_eq!(parse_cpu_usage(""), 0.0);
        assert_eq!(parse_cpu_usage("intr 1 2 3 4 5"), 0.0);
    }

    #[test]
    fn test_memory_usage() {
        let meminfo = "MemTotal:       2000000 kB\nMemFree:         100000 kB\nMemAvailable:    500000 kB\n";
        assert!((parse_memory_usage(meminfo) - 75.0).abs() < 1e-9);
        assert_eq!(parse_memory_usage("garbage"), 0.0);
    }

    #[test]
    fn test_df_usage() {
        let out = "Filesystem      Size  Used Avail Use% Mounted on\n/dev/vda1        40G   17G   21G  45% /\n";
        assert_eq!(parse_df_usage(out), 45.0);
        assert_eq!(parse_df_usage("Filesystem\n"), 0.0);
    }

    #[test]
    fn test_connection_count() {
        let out = "State  Recv-Q Send-Q Local Address:Port Peer Address:Port\nLISTEN 0 4096 0.0.0.0:443 0.0.0.0:*\nESTAB 0 0 10.0.0.2:443 1.2.3.4:5555\n";
        assert_eq!(count_connections(out), 2);
        assert_eq!(count_connections(""), 0);
    }

    #[test]
    fn test_bandwidth() {
        // 15 MB in 120 s = 1 Mbps
        let mbps = bandwidth_mbps(15_000_000, Duration::from_secs(120));
        assert!((mbps - 1.0).abs() < 1e-9);
        assert_eq!(bandwidth_mbps(100, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_network_and_loss_skip_virtual() {
        let stats = vec![
            InterfaceStats {
                name: "eth0".into(),
                rx_bytes: 1000,
                rx_packets: 200,
                rx_dropped: 2,
                tx_bytes: 3000,
            },
            InterfaceStats {
                name: "lo".into(),
                rx_bytes: 999_999,
                rx_packets: 999,
                rx_dropped: 999,
                tx_bytes: 999_999,
            },
        ];
        assert_eq!(network_totals(&stats), (1000, 3000));
        assert!((packet_loss_percent(&stats) - 1.0).abs() < 1e-9);
    }

    struct SteppingSource {
        readings: Mutex<Vec<u64>>,
    }

    impl NetDevSource for SteppingSource {
        fn read_stats(&self) -> Result<Vec<InterfaceStats>> {
            let mut readings = self.readings.lock().unwrap();
            let rx = if readings.len() > 1 { readings.remove(0) } else { readings[0] };
            Ok(vec![InterfaceStats {
                name: "eth0".into(),
                rx_bytes: rx,
                rx_packets: 10,
                rx_dropped: 0,
                tx_bytes: 0,
            }])
        }
    }

    struct Recorder(Mutex<Vec<Health>>);

    #[async_trait]
    impl StatusReporter for Recorder {
        async fn report_status(&self, health: Health) -> Result<()> {
            self.0.lock().unwrap().push(health);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_sample_has_zero_bandwidth() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let source = Arc::new(SteppingSource {
            readings: Mutex::new(vec![1_000_000, 16_000_000]),
        });
        let mut collector = Collector::new(recorder.clone(), DEFAULT_REPORT_INTERVAL)
            .with_net_source(source);

        let mut health = Health::default();
        collector.apply_network(&mut health);
        assert_eq!(health.bandwidth_down_mbps, 0.0);
        assert_eq!(health.network_in, 1_000_000);

        tokio::time::advance(Duration::from_secs(120)).await;
        let mut health = Health::default();
        collector.apply_network(&mut health);
        assert!((health.bandwidth_down_mbps - 1.0).abs() < 1e-6);
        assert_eq!(health.network_in, 16_000_000);
    }
}
