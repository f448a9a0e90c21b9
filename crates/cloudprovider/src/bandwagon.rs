//! BandwagonHost（KiwiVM）驱动
//!
//! 一个 VEID 对应一台实例，更换 IP 通过机房迁移实现。

use crate::error::{ProviderError, Result};
use crate::http::{DEFAULT_TIMEOUT, build_client, read_response};
use crate::provider::Provider;
use crate::types::{
    ChangeIpOptions, CreateInstanceOptions, ImageInfo, InstanceStatus, OperationResult, PlanInfo,
    PROVIDER_BANDWAGON, RegionInfo, state,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const DEFAULT_ENDPOINT: &str = "https://api.64clouds.com/v1";

/// 迁移流程的轮询参数
#[derive(Debug, Clone, Copy)]
pub struct MigrationTiming {
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
    pub migrate_timeout: Duration,
}

impl Default for MigrationTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(2 * 60),
            migrate_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// 单个 VEID 的驱动
pub struct BandwagonProvider {
    veid: String,
    api_key: String,
    client: reqwest::Client,
    endpoint: String,
    timing: MigrationTiming,
}

// ========== 响应结构 ==========

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct KiwiError {
    error: i64,
    message: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ServiceInfo {
    hostname: String,
    node_datacenter: String,
    ip_addresses: Vec<String>,
    data_counter: i64,
    plan_monthly_data: i64,
    monthly_data_multiplier: i64,
    data_next_reset: i64,
    suspended: bool,
    ve_status: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MigrateResponse {
    new_ips: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MigrateLocations {
    locations: Vec<String>,
    descriptions: HashMap<String, String>,
}

/// 第一个不含 ':' 的为 IPv4，第一个含 ':' 的为 IPv6
fn split_addresses(addresses: &[String]) -> (String, String) {
    let v4 = addresses.iter().find(|ip| !ip.contains(':'));
    let v6 = addresses.iter().find(|ip| ip.contains(':'));
    (
        v4.cloned().unwrap_or_default(),
        v6.cloned().unwrap_or_default(),
    )
}

impl BandwagonProvider {
    pub fn new(veid: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            veid: veid.to_string(),
            api_key: api_key.to_string(),
            client: build_client(DEFAULT_TIMEOUT)?,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timing: MigrationTiming::default(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timing(mut self, timing: MigrationTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn veid(&self) -> &str {
        &self.veid
    }

    async fn call<T: DeserializeOwned>(&self, api: &str, extra: &[(&str, &str)]) -> Result<T> {
        let mut query = vec![("veid", self.veid.as_str()), ("api_key", self.api_key.as_str())];
        query.extend_from_slice(extra);

        debug!("[BANDWAGON] {} veid={}", api, self.veid);
        let response = self
            .client
            .get(format!("{}/{api}", self.endpoint))
            .query(&query)
            .send()
            .await
            .map_err(|e| ProviderError::transport(format!("bandwagon API request failed: {e}")))?;
        let (status, body) = read_response(response).await?;

        if !(200..300).contains(&status) {
            return Err(ProviderError::Http { status, body });
        }
        let err: KiwiError = serde_json::from_str(&body)?;
        if err.error != 0 {
            return Err(ProviderError::vendor(err.error.to_string(), err.message));
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn to_status(&self, info: ServiceInfo, state: String) -> InstanceStatus {
        let (ipv4, ipv6) = split_addresses(&info.ip_addresses);

        let mut used = info.data_counter;
        let mut total = info.plan_monthly_data;
        if info.monthly_data_multiplier > 1 {
            used *= info.monthly_data_multiplier;
            total *= info.monthly_data_multiplier;
        }

        InstanceStatus {
            instance_id: self.veid.clone(),
            name: info.hostname,
            ip_address: ipv4,
            ipv6_address: ipv6,
            region: info.node_datacenter,
            traffic_used_bytes: used,
            traffic_total_bytes: total,
            traffic_reset_at: Utc.timestamp_opt(info.data_next_reset, 0).single(),
            expires_at: None,
            state,
        }
    }

    /// 实时状态，含真实的 running / stopped
    ///
    /// KiwiVM 的 live 接口可能需要十几秒。
    pub async fn get_live_status(&self) -> Result<InstanceStatus> {
        let info: ServiceInfo = self.call("getLiveServiceInfo", &[]).await?;
        let state = if info.suspended {
            state::SUSPENDED.to_string()
        } else if info.ve_status.is_empty() {
            state::UNKNOWN.to_string()
        } else {
            info.ve_status.to_lowercase()
        };
        Ok(self.to_status(info, state))
    }

    async fn wait_for_state(&self, target: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match self.get_live_status().await {
                Ok(status) if status.state == target => return Ok(()),
                Ok(_) => {}
                Err(e) => warn!("[BANDWAGON] Error checking status: {}", e),
            }
            tokio::time::sleep(self.timing.poll_interval).await;
        }
        Err(ProviderError::Timeout(format!(
            "timeout waiting for state: {target}"
        )))
    }
}

#[async_trait]
impl Provider for BandwagonProvider {
    fn name(&self) -> &str {
        PROVIDER_BANDWAGON
    }

    async fn get_instance_status(&self, _instance_id: &str) -> Result<InstanceStatus> {
        let info: ServiceInfo = self.call("getServiceInfo", &[]).await?;
        // 基础接口不含 ve_status，未暂停即视为运行中
        let state = if info.suspended {
            state::SUSPENDED
        } else {
            state::RUNNING
        };
        Ok(self.to_status(info, state.to_string()))
    }

    async fn list_instances(&self) -> Result<Vec<InstanceStatus>> {
        let status = self.get_instance_status(&self.veid).await?;
        Ok(vec![status])
    }

    /// 停机 → 等待 stopped → 发起迁移 → 等待 running
    ///
    /// 调用方丢弃 future 即取消轮询。
    async fn change_ip(&self, _instance_id: &str, opts: &ChangeIpOptions) -> Result<OperationResult> {
        if opts.target_region.is_empty() {
            return Err(ProviderError::config(
                "target_region is required for BandwagonHost migration",
            ));
        }

        info!(
            "[BANDWAGON] Starting migration: veid={}, target={}",
            self.veid, opts.target_region
        );

        // 错误原样上抛，保留其类别
        let _: serde_json::Value = self
            .call("stop", &[])
            .await
            .inspect_err(|e| error!("[BANDWAGON] Failed to stop instance {}: {}", self.veid, e))?;

        self.wait_for_state(state::STOPPED, self.timing.stop_timeout)
            .await
            .inspect_err(|e| warn!("[BANDWAGON] Instance {} did not stop: {}", self.veid, e))?;

        let migrate: MigrateResponse = self
            .call("migrate/start", &[("location", opts.target_region.as_str())])
            .await
            .inspect_err(|e| error!("[BANDWAGON] Migration failed for {}: {}", self.veid, e))?;

        if let Err(e) = self
            .wait_for_state(state::RUNNING, self.timing.migrate_timeout)
            .await
        {
            warn!("[BANDWAGON] Migration may still be in progress: {}", e);
        }

        let new_ip = match migrate.new_ips.into_iter().next() {
            Some(ip) => ip,
            None => self
                .get_instance_status(&self.veid)
                .await
                .map(|s| s.ip_address)
                .unwrap_or_default(),
        };

        info!("[BANDWAGON] Migration completed: new_ip={}", new_ip);
        Ok(OperationResult::success("Migration completed successfully")
            .with("new_ip", new_ip)
            .with("region", opts.target_region.clone()))
    }

    async fn create_instance(&self, _opts: &CreateInstanceOptions) -> Result<OperationResult> {
        Err(ProviderError::unsupported(PROVIDER_BANDWAGON, "CreateInstance"))
    }

    async fn delete_instance(&self, _instance_id: &str) -> Result<OperationResult> {
        Err(ProviderError::unsupported(PROVIDER_BANDWAGON, "DeleteInstance"))
    }

    /// 可迁移的目标机房
    async fn list_regions(&self) -> Result<Vec<RegionInfo>> {
        let locations: MigrateLocations = match self.call("migrate/getLocations", &[]).await {
            Ok(l) => l,
            Err(e) => {
                debug!("[BANDWAGON] getLocations failed: {}", e);
                return Err(ProviderError::unsupported(PROVIDER_BANDWAGON, "ListRegions"));
            }
        };

        Ok(locations
            .locations
            .iter()
            .map(|loc| {
                let desc = locations.descriptions.get(loc).unwrap_or(loc);
                RegionInfo {
                    slug: loc.clone(),
                    name_en: desc.clone(),
                    name_zh: desc.clone(),
                    country: String::new(),
                    provider_id: loc.clone(),
                    available: true,
                }
            })
            .collect())
    }

    async fn list_plans(&self, _region: &str) -> Result<Vec<PlanInfo>> {
        Err(ProviderError::unsupported(PROVIDER_BANDWAGON, "ListPlans"))
    }

    async fn list_images(&self, _region: &str) -> Result<Vec<ImageInfo>> {
        Err(ProviderError::unsupported(PROVIDER_BANDWAGON, "ListImages"))
    }
}

/// 单个 VEID 的凭证
#[derive(Debug, Clone, Default, serde::Serialize, Deserialize)]
pub struct BandwagonInstanceConfig {
    pub veid: String,
    pub api_key: String,
}

/// 同一账号下的多台 Bandwagon 实例，按 VEID 路由
pub struct MultiBandwagonProvider {
    instances: Vec<BandwagonProvider>,
}

impl MultiBandwagonProvider {
    /// veid 或 api_key 为空的条目被忽略
    pub fn new(configs: &[BandwagonInstanceConfig]) -> Result<Self> {
        let instances = configs
            .iter()
            .filter(|c| !c.veid.is_empty() && !c.api_key.is_empty())
            .map(|c| BandwagonProvider::new(&c.veid, &c.api_key))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { instances })
    }

    pub fn from_providers(instances: Vec<BandwagonProvider>) -> Self {
        Self { instances }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn find(&self, veid: &str) -> Result<&BandwagonProvider> {
        self.instances
            .iter()
            .find(|p| p.veid == veid)
            .ok_or_else(|| ProviderError::instance_not_found(veid))
    }
}

#[async_trait]
impl Provider for MultiBandwagonProvider {
    fn name(&self) -> &str {
        PROVIDER_BANDWAGON
    }

    async fn get_instance_status(&self, instance_id: &str) -> Result<InstanceStatus> {
        self.find(instance_id)?.get_instance_status(instance_id).await
    }

    async fn list_instances(&self) -> Result<Vec<InstanceStatus>> {
        let mut all = Vec::with_capacity(self.instances.len());
        for p in &self.instances {
            match p.list_instances().await {
                Ok(statuses) => all.extend(statuses),
                Err(e) => warn!(
                    "[BANDWAGON] Failed to list instances for veid={}: {}",
                    p.veid, e
                ),
            }
        }
        Ok(all)
    }

    async fn change_ip(&self, instance_id: &str, opts: &ChangeIpOptions) -> Result<OperationResult> {
        self.find(instance_id)?.change_ip(instance_id, opts).await
    }

    async fn create_instance(&self, _opts: &CreateInstanceOptions) -> Result<OperationResult> {
        Err(ProviderError::unsupported(PROVIDER_BANDWAGON, "CreateInstance"))
    }

    async fn delete_instance(&self, _instance_id: &str) -> Result<OperationResult> {
        Err(ProviderError::unsupported(PROVIDER_BANDWAGON, "DeleteInstance"))
    }

    async fn list_regions(&self) -> Result<Vec<RegionInfo>> {
        match self.instances.first() {
            Some(p) => p.list_regions().await,
            None => Err(ProviderError::unsupported(PROVIDER_BANDWAGON, "ListRegions")),
        }
    }

    async fn list_plans(&self, _region: &str) -> Result<Vec<PlanInfo>> {
        Err(ProviderError::unsupported(PROVIDER_BANDWAGON, "ListPlans"))
    }

    async fn list_images(&self, _region: &str) -> Result<Vec<ImageInfo>> {
        Err(ProviderError::unsupported(PROVIDER_BANDWAGON, "ListImages"))
    }
}
