//! SSH 独立主机驱动
//!
//! 协调端节点表中没有对应云实例的主机被视为独立实例，
//! 流量通过 SSH 读取 vnstat 获得，额度来自主机上的 YAML 配置文件。

mod executor;
mod store;
mod traffic_config;
pub mod vnstat;

pub use executor::{HostExecutor, OpenSshExecutor};
pub use store::{NodeRecord, NodeStore};
pub use traffic_config::{DEFAULT_TRAFFIC_TOTAL_BYTES, TRAFFIC_CONFIG_PATH, TrafficConfig};

use crate::error::{ProviderError, Result};
use crate::provider::Provider;
use crate::types::{
    ChangeIpOptions, CreateInstanceOptions, ImageInfo, InstanceStatus, OperationResult, PlanInfo,
    PROVIDER_SSH_STANDALONE, RegionInfo, state,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_INTERFACE: &str = "eth0";

pub struct SshStandaloneProvider {
    account: String,
    store: NodeStore,
    executor: Arc<dyn HostExecutor>,
    interface: String,
}

impl SshStandaloneProvider {
    pub fn new(account: impl Into<String>, pool: SqlitePool, executor: Arc<dyn HostExecutor>) -> Self {
        Self {
            account: account.into(),
            store: NodeStore::new(pool),
            executor,
            interface: DEFAULT_INTERFACE.to_string(),
        }
    }

    /// vnstat 统计的网卡，默认 eth0
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// 读取主机上的流量配置，不存在或非法时写入默认配置
    ///
    /// 写入失败也返回默认值，下次同步时重试。
    pub async fn fetch_traffic_config(&self, ipv4: &str) -> TrafficConfig {
        match self.executor.exec(ipv4, &traffic_config::read_command()).await {
            Ok(stdout) => {
                if let Some(config) = TrafficConfig::parse(&stdout) {
                    return config;
                }
                debug!("[SSH] {} traffic config missing or invalid, recreating", ipv4);
            }
            Err(e) => debug!("[SSH] {} failed to read traffic config: {}", ipv4, e),
        }

        let config = TrafficConfig::with_defaults(Utc::now().timestamp());
        if let Err(e) = self.executor.exec(ipv4, &config.write_command()).await {
            warn!("[SSH] {} failed to write default traffic config: {}", ipv4, e);
        }
        config
    }

    /// 覆盖主机上的流量配置
    pub async fn update_traffic_config(&self, ipv4: &str, config: &TrafficConfig) -> Result<()> {
        self.executor
            .exec(ipv4, &config.write_command())
            .await
            .map_err(|e| ProviderError::transport(format!("write config: {e}")))?;
        info!(
            "[SSH] {} traffic config updated: total={} reset_at={}",
            ipv4, config.traffic_total_bytes, config.traffic_reset_at
        );
        Ok(())
    }

    async fn fetch_status(&self, record: &NodeRecord) -> InstanceStatus {
        let config = self.fetch_traffic_config(&record.ipv4).await;

        let usage = match self
            .executor
            .exec(&record.ipv4, &vnstat::command(&self.interface))
            .await
        {
            Ok(stdout) => vnstat::monthly_usage(&stdout, &self.interface, Utc::now()),
            Err(e) => Err(e),
        };

        let (used, state) = match usage {
            Ok(bytes) => (bytes, state::RUNNING),
            Err(e) => {
                warn!("[SSH] {} traffic query failed: {}", record.ipv4, e);
                (0, state::ERROR)
            }
        };

        InstanceStatus {
            instance_id: record.ipv4.clone(),
            name: record.name.clone(),
            ip_address: record.ipv4.clone(),
            ipv6_address: record.ipv6.clone(),
            region: record.region.clone(),
            traffic_used_bytes: used,
            traffic_total_bytes: config.traffic_total_bytes,
            traffic_reset_at: Utc.timestamp_opt(config.traffic_reset_at, 0).single(),
            expires_at: None,
            state: state.to_string(),
        }
    }
}

#[async_trait]
impl Provider for SshStandaloneProvider {
    fn name(&self) -> &str {
        PROVIDER_SSH_STANDALONE
    }

    /// `instance_id` 即节点 IPv4
    async fn get_instance_status(&self, instance_id: &str) -> Result<InstanceStatus> {
        let record = self.store.get_orphan(instance_id).await?;
        Ok(self.fetch_status(&record).await)
    }

    async fn list_instances(&self) -> Result<Vec<InstanceStatus>> {
        let records = self.store.list_orphans().await?;
        debug!("[SSH] {} orphan nodes for account {}", records.len(), self.account);

        let mut statuses = Vec::with_capacity(records.len());
        for record in &records {
            statuses.push(self.fetch_status(record).await);
        }
        Ok(statuses)
    }

    async fn change_ip(&self, _instance_id: &str, _opts: &ChangeIpOptions) -> Result<OperationResult> {
        Err(ProviderError::unsupported(PROVIDER_SSH_STANDALONE, "ChangeIP"))
    }

    async fn create_instance(&self, _opts: &CreateInstanceOptions) -> Result<OperationResult> {
        Err(ProviderError::unsupported(PROVIDER_SSH_STANDALONE, "CreateInstance"))
    }

    async fn delete_instance(&self, _instance_id: &str) -> Result<OperationResult> {
        Err(ProviderError::unsupported(PROVIDER_SSH_STANDALONE, "DeleteInstance"))
    }

    async fn list_regions(&self) -> Result<Vec<RegionInfo>> {
        Ok(Vec::new())
    }

    async fn list_plans(&self, _region: &str) -> Result<Vec<PlanInfo>> {
        Ok(Vec::new())
    }

    async fn list_images(&self, _region: &str) -> Result<Vec<ImageInfo>> {
        Ok(Vec::new())
    }
}
