//! 节点代理启动与运行流程
//!
//! 启动阶段按固定顺序执行：注册 → 证书落盘 → 渲染配置 → 写就绪标记，
//! 之后并行运行认证缓存清理、RADIUS 桥接与指标上报，收到关闭信号后
//! 通知中心节点下线。
//!
//! 关闭中心（`k2_center.enabled = false`）时以独立模式运行：使用自签名
//! 证书、渲染配置并写入就绪标记，不注册也不上报。

use crate::error::{Error, Result};
use k2_common::SidecarConfig;
use k2_common::util::{region_slug, sslip_domain};
use sidecar::auth_cache::SWEEP_INTERVAL;
use sidecar::template::{self, CA_CERT_FILE};
use sidecar::{
    AuthCache, Collector, IpDetector, Node, PROTOCOL_K2OC, PROTOCOL_K2V5, RadiusServer,
    RegisterResult, SelfSignedCertConfig, SidecarError, StatusReporter, TrafficMonitor,
    TunnelConfig, clear_ready_marker, get_or_create_self_signed_cert, persist_tunnel_cert,
    read_connect_url, write_ready_marker,
};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// 下线阶段每次中心调用的超时
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// 启动阶段完成后的运行时状态
pub struct Bootstrapped {
    /// 独立模式下为 `None`
    pub node: Option<Arc<Node>>,
    pub auth_cache: Option<Arc<AuthCache>>,
    /// 已注册的隧道
    pub tunnels: Vec<TunnelConfig>,
}

pub struct Agent {
    config: SidecarConfig,
    detector: IpDetector,
}

impl Agent {
    pub fn new(config: SidecarConfig) -> Self {
        Self {
            config,
            detector: IpDetector::default(),
        }
    }

    pub fn with_detector(mut self, detector: IpDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn config(&self) -> &SidecarConfig {
        &self.config
    }

    /// 执行启动阶段，成功后写入就绪标记
    pub async fn bootstrap(&mut self) -> Result<Bootstrapped> {
        let ready_path = self.config.ready_marker_path();
        clear_ready_marker(&ready_path)?;

        let bootstrapped = if self.config.k2_center.enabled {
            self.bootstrap_registered().await?
        } else {
            self.bootstrap_standalone()?
        };

        write_ready_marker(&ready_path)?;
        Ok(bootstrapped)
    }

    fn bootstrap_standalone(&self) -> Result<Bootstrapped> {
        info!("[Agent] K2 center disabled, running standalone with self-signed certificate");

        let mut cert_config = SelfSignedCertConfig::default();
        let domain = self.config.tunnel.domain.trim();
        if !domain.is_empty() {
            // 显式 SAN 会替换默认的本地地址，这里一并补上
            cert_config.ip_addresses = vec![
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(Ipv6Addr::LOCALHOST),
            ];
            cert_config.dns_names = vec!["localhost".to_string(), domain.to_string()];
        }
        get_or_create_self_signed_cert(&self.config.certs_dir(), &cert_config)?;

        self.render_configs()?;

        Ok(Bootstrapped {
            node: None,
            auth_cache: None,
            tunnels: Vec::new(),
        })
    }

    async fn bootstrap_registered(&mut self) -> Result<Bootstrapped> {
        let center = &self.config.k2_center;
        let auth_cache = self
            .config
            .auth_cache_enabled
            .then(|| Arc::new(AuthCache::new()));

        let mut node = Node::with_timeout(center.base_url(), &center.secret, center.timeout())?;
        if let Some(cache) = &auth_cache {
            info!("[Agent] Device auth cache enabled");
            node = node.with_auth_cache(cache.clone());
        }

        self.resolve_identity(&mut node).await?;

        if self.config.tunnel.domain.trim().is_empty() {
            self.config.tunnel.domain = sslip_domain(node.ipv4());
            info!("[Agent] Tunnel domain not configured, using {}", self.config.tunnel.domain);
        }

        let (cert_pin, ech_config_list) = read_connect_url(&self.config.connect_url_path());
        let tunnels = build_tunnels(&self.config, &cert_pin, &ech_config_list);

        let result = node
            .register(tunnels.clone())
            .await
            .map_err(|e| Error::service_startup(format!("node registration failed: {e}")))?;
        self.persist_certs(&tunnels, &result)?;

        self.render_configs()?;
        if self.config.oc.is_active() {
            self.download_ca_cert().await;
        }

        if self.config.ech.enabled {
            match node
                .fetch_ech_keys_and_notify(&self.config.ech.keys_file, self.config.ech.pid_file.as_deref())
                .await
            {
                Ok(count) => info!("[Agent] Synced {} ECH keys", count),
                Err(e) => warn!("[Agent] Failed to sync ECH keys: {}", e),
            }
        }

        Ok(Bootstrapped {
            node: Some(Arc::new(node)),
            auth_cache,
            tunnels,
        })
    }

    /// 配置中同时给出 IPv4 与国家时直接使用，否则外网探测
    async fn resolve_identity(&self, node: &mut Node) -> Result<()> {
        let pinned = &self.config.node;
        if pinned.is_pinned() {
            let identity = node.identity_mut();
            identity.ipv4 = pinned.ipv4.trim().to_string();
            identity.country = pinned.country.trim().to_string();
            identity.region = region_slug(&identity.country, "");
            info!(
                "[Agent] Using configured identity: IPv4={}, Country={}",
                identity.ipv4, identity.country
            );
        } else {
            node.detect(&self.detector)
                .await
                .map_err(|e| Error::service_startup(format!("failed to detect node identity: {e}")))?;
        }

        let identity = node.identity_mut();
        if !pinned.ipv6.trim().is_empty() {
            identity.ipv6 = pinned.ipv6.trim().to_string();
        }
        if !pinned.name.trim().is_empty() {
            identity.name = pinned.name.trim().to_string();
        }
        if !pinned.region.trim().is_empty() {
            identity.region = pinned.region.trim().to_string();
        }
        Ok(())
    }

    /// k2 隧道证书写入 `<config_dir>/certs`，接入服务证书写入 ocserv 配置目录
    fn persist_certs(&self, tunnels: &[TunnelConfig], result: &RegisterResult) -> Result<()> {
        for tunnel in tunnels {
            let cert = result.tunnels.get(&tunnel.domain).ok_or_else(|| {
                SidecarError::certificate(format!("no certificate issued for tunnel {}", tunnel.domain))
            })?;
            let dir = if tunnel.protocol == PROTOCOL_K2OC {
                self.config.oc.config_dir.clone()
            } else {
                self.config.certs_dir()
            };
            persist_tunnel_cert(&dir, &tunnel.domain, cert)?;
        }
        Ok(())
    }

    fn render_configs(&self) -> Result<()> {
        let written = template::generate_configs(&self.config)?;
        info!("[Agent] Rendered {} config files", written.len());
        Ok(())
    }

    async fn download_ca_cert(&self) {
        let client = match reqwest::Client::builder()
            .timeout(self.config.k2_center.timeout())
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!("[Agent] Failed to build HTTP client for CA download: {}", e);
                return;
            }
        };

        let output = self.config.oc.config_dir.join(CA_CERT_FILE);
        if let Err(e) =
            template::download_ca_cert(&client, self.config.k2_center.base_url(), &output).await
        {
            warn!("[Agent] Failed to download CA certificate: {}", e);
        }
    }

    /// 启动并运行直到收到关闭信号
    pub async fn run(mut self, shutdown_tx: broadcast::Sender<()>) -> Result<()> {
        // 启动阶段之前订阅，避免就绪后立即到达的关闭信号丢失
        let mut shutdown_rx = shutdown_tx.subscribe();
        let sweeper_rx = shutdown_tx.subscribe();
        let radius_rx = shutdown_tx.subscribe();
        let collector_rx = shutdown_tx.subscribe();
        let boot = self.bootstrap().await?;

        let Some(node) = boot.node.clone() else {
            info!("[Agent] Standalone mode ready, waiting for shutdown signal");
            let _ = shutdown_rx.recv().await;
            return Ok(());
        };

        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        if let Some(cache) = &boot.auth_cache {
            handles.push(cache.clone().spawn_sweeper(SWEEP_INTERVAL, sweeper_rx));
        }

        if self.config.oc.is_active() {
            let oc = &self.config.oc;
            match RadiusServer::bind(&oc.radius_listen, &oc.radius_secret, node.clone()).await {
                Ok(server) => {
                    handles.push(tokio::spawn(async move {
                        if let Err(e) = server.run(radius_rx).await {
                            error!("[Agent] RADIUS server stopped with error: {}", e);
                        }
                    }));
                }
                Err(e) => error!(
                    "[Agent] Failed to start RADIUS server on {}: {}",
                    oc.radius_listen, e
                ),
            }
        }

        let collector = self.build_collector(node.clone());
        handles.push(tokio::spawn(collector.run(collector_rx)));

        info!(
            "[Agent] Node {} is running with {} tunnels",
            node.ipv4(),
            boot.tunnels.len()
        );

        let _ = shutdown_rx.recv().await;
        go_offline(&node, &boot.tunnels).await;

        for handle in handles {
            match timeout(CLEANUP_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("[Agent] Background task terminated unexpectedly: {}", e),
                Err(_) => warn!("[Agent] Background task did not stop in time"),
            }
        }

        info!("[Agent] Shutdown complete");
        Ok(())
    }

    fn build_collector(&self, node: Arc<Node>) -> Collector {
        let center = &self.config.k2_center;
        let reporter: Arc<dyn StatusReporter> = node;
        let collector = Collector::new(reporter, center.report_interval());

        let billing_start_date = center.billing_start_date.trim();
        if billing_start_date.is_empty() {
            return collector;
        }

        let limit_gb = i64::try_from(center.traffic_limit_gb).unwrap_or(i64::MAX);
        match TrafficMonitor::new(billing_start_date, limit_gb) {
            Ok(monitor) => collector.with_traffic_monitor(monitor),
            Err(e) => {
                warn!("[Agent] Traffic monitor disabled: {}", e);
                collector
            }
        }
    }
}

/// 启动时注册的隧道
///
/// 总是包含 k2 隧道；接入服务启用且配置了域名时追加 k2oc 隧道。
pub fn build_tunnels(config: &SidecarConfig, cert_pin: &str, ech_config_list: &str) -> Vec<TunnelConfig> {
    let mut tunnels = vec![TunnelConfig {
        domain: config.tunnel.domain.trim().to_string(),
        protocol: PROTOCOL_K2V5.to_string(),
        port: config.tunnel.port,
        hop_port_start: config.tunnel.hop_port_start,
        hop_port_end: config.tunnel.hop_port_end,
        is_test: config.test_node,
        has_relay: config.relay.enabled,
        has_tunnel: config.tunnel.enabled,
        cert_pin: cert_pin.to_string(),
        ech_config_list: ech_config_list.to_string(),
    }];

    if config.oc.is_active() {
        tunnels.push(TunnelConfig {
            domain: config.oc.domain.trim().to_string(),
            protocol: PROTOCOL_K2OC.to_string(),
            port: config.oc.port,
            is_test: config.test_node,
            ..Default::default()
        });
    }

    tunnels
}

async fn bounded<F>(what: &str, call: F)
where
    F: Future<Output = sidecar::Result<()>>,
{
    match timeout(CLEANUP_TIMEOUT, call).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("[Agent] Failed to {}: {}", what, e),
        Err(_) => warn!("[Agent] Timed out trying to {}", what),
    }
}

/// 通知中心节点下线并注销全部隧道，失败只记录日志
pub async fn go_offline(node: &Node, tunnels: &[TunnelConfig]) {
    info!("[Agent] Shutting down, marking node {} offline", node.ipv4());
    bounded("mark node offline", node.mark_offline()).await;

    for tunnel in tunnels {
        bounded(&format!("remove tunnel {}", tunnel.domain), node.remove_tunnel(&tunnel.domain)).await;
    }
}
