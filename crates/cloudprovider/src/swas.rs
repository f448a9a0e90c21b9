//! 阿里云轻量应用服务器（SWAS）驱动
//!
//! 国内站与国际站 API 完全相同，只是标签与区域池不同，
//! 因此用同一个驱动、以标签参数化。

use crate::error::{ProviderError, Result};
use crate::http::{DEFAULT_TIMEOUT, build_client, read_response};
use crate::provider::Provider;
use crate::region::RegionRegistry;
use crate::signer::rpc::RpcSigner;
use crate::types::{
    ChangeIpOptions, CreateInstanceOptions, ImageInfo, InstanceStatus, OperationResult, PlanInfo,
    RegionInfo, parse_vendor_time, state,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// SWAS 单区域驱动
pub struct SwasProvider {
    tag: &'static str,
    region: String,
    signer: RpcSigner,
    client: reqwest::Client,
    endpoint: Option<String>,
}

// ========== 响应结构 ==========

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct ErrorEnvelope {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct ListInstancesResponse {
    instances: Vec<SwasInstance>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct SwasInstance {
    instance_id: String,
    instance_name: String,
    public_ip_address: String,
    ipv6_address: String,
    status: String,
    expired_time: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct TrafficPackagesResponse {
    instance_traffic_package_usages: Vec<TrafficUsage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct TrafficUsage {
    instance_id: String,
    traffic_used: i64,
    traffic_package_total: i64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct CreateInstancesResponse {
    instance_ids: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct ListRegionsResponse {
    regions: Vec<SwasRegion>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct SwasRegion {
    region_id: String,
    local_name: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct ListPlansResponse {
    plans: Vec<SwasPlan>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct SwasPlan {
    plan_id: String,
    core: u32,
    /// GB
    memory: f64,
    /// 月流量，GB
    flow: f64,
    disk_size: u32,
    origin_price: f64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct ListImagesResponse {
    images: Vec<SwasImage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct SwasImage {
    image_id: String,
    image_name: String,
    image_type: String,
    os_type: String,
    platform: String,
    description: String,
}

impl SwasProvider {
    /// 创建驱动，`tag` 为 `aliyun_swas` 或 `alibaba_swas`
    pub fn new(
        tag: &'static str,
        access_key_id: &str,
        access_key_secret: &str,
        region: &str,
    ) -> Result<Self> {
        Ok(Self {
            tag,
            region: region.to_string(),
            signer: RpcSigner::new(access_key_id, access_key_secret),
            client: build_client(DEFAULT_TIMEOUT)?,
            endpoint: None,
        })
    }

    /// 覆盖 API 端点，所有区域共用
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into().trim_end_matches('/').to_string());
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn endpoint_for(&self, region: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://swas.{region}.aliyuncs.com"),
        }
    }

    /// 发起一次签名 GET 请求
    async fn call<T: DeserializeOwned>(
        &self,
        region: &str,
        action: &str,
        params: BTreeMap<String, String>,
    ) -> Result<T> {
        let nonce = uuid::Uuid::new_v4().to_string();
        let query = self.signer.signed_query(action, &params, &nonce, Utc::now());
        let url = format!("{}/?{query}", self.endpoint_for(region));

        debug!("[SWAS] {} {} region={}", self.tag, action, region);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::transport(format!("{action} request failed: {e}")))?;
        let (status, body) = read_response(response).await?;

        if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body)
            && !envelope.code.is_empty()
        {
            return Err(ProviderError::vendor(envelope.code, envelope.message));
        }
        if !(200..300).contains(&status) {
            return Err(ProviderError::Http { status, body });
        }

        Ok(serde_json::from_str(&body)?)
    }

    fn base_params(&self, region: &str) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("RegionId".to_string(), region.to_string());
        params
    }

    async fn fetch_instances(&self, instance_id: Option<&str>) -> Result<Vec<SwasInstance>> {
        let mut params = self.base_params(&self.region);
        params.insert("PageSize".into(), "100".into());
        params.insert("PageNumber".into(), "1".into());
        if let Some(id) = instance_id {
            params.insert("InstanceIds".into(), serde_json::to_string(&[id])?);
        }

        let resp: ListInstancesResponse = self.call(&self.region, "ListInstances", params).await?;
        Ok(resp.instances)
    }

    /// 查询流量包使用情况，返回 (已用, 总量)
    async fn fetch_traffic(&self, instance_id: &str) -> Result<(i64, i64)> {
        let mut params = self.base_params(&self.region);
        params.insert("InstanceIds".into(), serde_json::to_string(&[instance_id])?);

        let resp: TrafficPackagesResponse = self
            .call(&self.region, "ListInstancesTrafficPackages", params)
            .await?;
        Ok(resp
            .instance_traffic_package_usages
            .into_iter()
            .find(|u| u.instance_id == instance_id)
            .map(|u| (u.traffic_used, u.traffic_package_total))
            .unwrap_or((0, 0)))
    }

    fn target_region<'a>(&'a self, region: &'a str) -> &'a str {
        if region.is_empty() { &self.region } else { region }
    }
}

#[async_trait]
impl Provider for SwasProvider {
    fn name(&self) -> &str {
        self.tag
    }

    async fn get_instance_status(&self, instance_id: &str) -> Result<InstanceStatus> {
        let instance = self
            .fetch_instances(Some(instance_id))
            .await?
            .into_iter()
            .find(|i| i.instance_id == instance_id)
            .ok_or_else(|| ProviderError::instance_not_found(instance_id))?;

        let (used, total) = match self.fetch_traffic(instance_id).await {
            Ok(traffic) => traffic,
            Err(e) => {
                warn!("[SWAS] Failed to get traffic for {}: {}", instance_id, e);
                (0, 0)
            }
        };

        let status = if instance.status.is_empty() {
            state::UNKNOWN.to_string()
        } else {
            instance.status.to_lowercase()
        };

        Ok(InstanceStatus {
            instance_id: instance.instance_id,
            name: instance.instance_name,
            ip_address: instance.public_ip_address,
            ipv6_address: instance.ipv6_address,
            region: self.region.clone(),
            traffic_used_bytes: used,
            traffic_total_bytes: total,
            traffic_reset_at: None,
            expires_at: parse_vendor_time(&instance.expired_time),
            state: status,
        })
    }

    async fn list_instances(&self) -> Result<Vec<InstanceStatus>> {
        let instances = self.fetch_instances(None).await?;

        let mut result = Vec::with_capacity(instances.len());
        for instance in instances {
            match self.get_instance_status(&instance.instance_id).await {
                Ok(status) => result.push(status),
                Err(e) => warn!(
                    "[SWAS] Failed to get status for {}: {}",
                    instance.instance_id, e
                ),
            }
        }
        Ok(result)
    }

    async fn change_ip(&self, _instance_id: &str, _opts: &ChangeIpOptions) -> Result<OperationResult> {
        Err(ProviderError::unsupported(self.tag, "ChangeIP"))
    }

    async fn create_instance(&self, opts: &CreateInstanceOptions) -> Result<OperationResult> {
        let region = self.target_region(&opts.region).to_string();
        let mut params = self.base_params(&region);
        params.insert("PlanId".into(), opts.plan.clone());
        params.insert("ImageId".into(), opts.image_id.clone());
        params.insert("Period".into(), "1".into());
        params.insert("AutoRenew".into(), "true".into());

        let resp: CreateInstancesResponse = self.call(&region, "CreateInstances", params).await?;
        let instance_id = resp
            .instance_ids
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::vendor("EmptyResult", "no instance created"))?;

        Ok(OperationResult::success("Instance created successfully")
            .with("instance_id", instance_id))
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<OperationResult> {
        let mut params = self.base_params(&self.region);
        params.insert("InstanceIds".into(), serde_json::to_string(&[instance_id])?);

        let _: serde_json::Value = self.call(&self.region, "DeleteInstances", params).await?;
        Ok(OperationResult::success("Instance deleted successfully")
            .with("instance_id", instance_id))
    }

    async fn list_regions(&self) -> Result<Vec<RegionInfo>> {
        let resp: ListRegionsResponse = self
            .call(&self.region, "ListRegions", BTreeMap::new())
            .await?;

        let registry = RegionRegistry::global();
        Ok(resp
            .regions
            .iter()
            .map(|r| registry.region_info(self.tag, &r.region_id, &r.local_name))
            .collect())
    }

    async fn list_plans(&self, region: &str) -> Result<Vec<PlanInfo>> {
        let region = self.target_region(region).to_string();
        let resp: ListPlansResponse = self
            .call(&region, "ListPlans", self.base_params(&region))
            .await?;

        Ok(resp
            .plans
            .into_iter()
            .map(|p| PlanInfo {
                name: format!("{} Core / {} GB RAM", p.core, p.memory),
                id: p.plan_id,
                cpu: p.core,
                memory_mb: (p.memory * 1024.0) as u32,
                storage_gb: p.disk_size,
                transfer_tb: p.flow / 1024.0,
                price_monthly: p.origin_price,
            })
            .collect())
    }

    async fn list_images(&self, region: &str) -> Result<Vec<ImageInfo>> {
        let region = self.target_region(region).to_string();
        let resp: ListImagesResponse = self
            .call(&region, "ListImages", self.base_params(&region))
            .await?;

        Ok(resp
            .images
            .into_iter()
            .filter(|i| i.image_type == "system")
            .map(|i| ImageInfo {
                id: i.image_id,
                name: i.image_name,
                os: i.os_type.to_lowercase(),
                platform: i.platform,
                description: i.description,
            })
            .collect())
    }
}
