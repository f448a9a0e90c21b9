//! 腾讯云轻量应用服务器（Lighthouse）驱动
//!
//! 国际站 `tencent_lighthouse` 与国内站 `qcloud_lighthouse` 共用同一 API，
//! 只在标签与区域池上区分。

use crate::error::{ProviderError, Result};
use crate::http::{DEFAULT_TIMEOUT, build_client, host_of, read_response};
use crate::provider::Provider;
use crate::region::RegionRegistry;
use crate::signer::tc3::{CONTENT_TYPE, Tc3Signer};
use crate::types::{
    ChangeIpOptions, CreateInstanceOptions, ImageInfo, InstanceStatus, OperationResult, PlanInfo,
    RegionInfo, parse_vendor_time, state,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

const API_VERSION: &str = "2020-03-24";
const DEFAULT_ENDPOINT: &str = "https://lighthouse.tencentcloudapi.com";

/// Lighthouse 单区域驱动
pub struct LighthouseProvider {
    tag: &'static str,
    region: String,
    signer: Tc3Signer,
    client: reqwest::Client,
    endpoint: String,
}

// ========== 响应结构 ==========

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Envelope<T> {
    response: T,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct ApiError {
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct ApiErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct DescribeInstancesResponse {
    instance_set: Vec<LhInstance>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct LhInstance {
    instance_id: String,
    instance_name: String,
    public_addresses: Vec<String>,
    public_ipv6_addresses: Vec<String>,
    instance_state: String,
    expired_time: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct TrafficPackagesResponse {
    instance_traffic_package_set: Vec<InstanceTrafficPackages>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct InstanceTrafficPackages {
    instance_id: String,
    traffic_package_set: Vec<TrafficPackage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct TrafficPackage {
    traffic_used: i64,
    traffic_package_total: i64,
    deadline: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct CreateInstancesResponse {
    instance_id_set: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct DescribeRegionsResponse {
    region_set: Vec<LhRegion>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct LhRegion {
    region: String,
    region_name: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct DescribeBundlesResponse {
    bundle_set: Vec<LhBundle>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct LhBundle {
    bundle_id: String,
    bundle_display_label: String,
    support_linux_unix_platform: bool,
    monthly_traffic: Option<i64>,
    internet_max_bandwidth_out: Option<i64>,
    #[serde(rename = "CPU")]
    cpu: u32,
    /// GB
    memory: u32,
    system_disk_size: u32,
    price: LhPrice,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct LhPrice {
    instance_price: LhInstancePrice,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct LhInstancePrice {
    original_bundle_price: f64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct DescribeBlueprintsResponse {
    blueprint_set: Vec<LhBlueprint>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct LhBlueprint {
    blueprint_id: String,
    display_title: String,
    os_name: String,
    platform: String,
    description: String,
}

impl LighthouseProvider {
    /// `tag` 为 `tencent_lighthouse` 或 `qcloud_lighthouse`
    pub fn new(tag: &'static str, secret_id: &str, secret_key: &str, region: &str) -> Result<Self> {
        Ok(Self {
            tag,
            region: region.to_string(),
            signer: Tc3Signer::new(secret_id, secret_key, "lighthouse"),
            client: build_client(DEFAULT_TIMEOUT)?,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn call<T: DeserializeOwned>(&self, action: &str, payload: Value) -> Result<T> {
        let body = payload.to_string();
        let now = Utc::now();
        let authorization = self
            .signer
            .authorization(&host_of(&self.endpoint), &body, now);

        debug!("[TENCENT] {} {} region={}", self.tag, action, self.region);
        let response = self
            .client
            .post(format!("{}/", self.endpoint))
            .header("Content-Type", CONTENT_TYPE)
            .header("Authorization", authorization)
            .header("X-TC-Action", action)
            .header("X-TC-Timestamp", now.timestamp().to_string())
            .header("X-TC-Version", API_VERSION)
            .header("X-TC-Region", &self.region)
            .body(body)
            .send()
            .await
            .map_err(|e| ProviderError::transport(format!("{action} request failed: {e}")))?;
        let (status, body) = read_response(response).await?;

        if let Ok(Envelope { response: err }) = serde_json::from_str::<Envelope<ApiError>>(&body)
            && let Some(err) = err.error
        {
            return Err(ProviderError::vendor(err.code, err.message));
        }
        if !(200..300).contains(&status) {
            return Err(ProviderError::Http { status, body });
        }

        let envelope: Envelope<T> = serde_json::from_str(&body)?;
        Ok(envelope.response)
    }

    /// 汇总实例的全部流量包，返回 (已用, 总量, 重置时间)
    async fn fetch_traffic(&self, instance_id: &str) -> Result<(i64, i64, Option<DateTime<Utc>>)> {
        let resp: TrafficPackagesResponse = self
            .call(
                "DescribeInstancesTrafficPackages",
                json!({ "InstanceIds": [instance_id] }),
            )
            .await?;

        let mut used = 0;
        let mut total = 0;
        let mut reset_at = None;
        if let Some(pkg) = resp
            .instance_traffic_package_set
            .iter()
            .find(|p| p.instance_id == instance_id)
        {
            for traffic in &pkg.traffic_package_set {
                used += traffic.traffic_used;
                total += traffic.traffic_package_total;
                if let Some(deadline) = parse_vendor_time(&traffic.deadline) {
                    reset_at = Some(deadline);
                }
            }
        }
        Ok((used, total, reset_at))
    }

    fn to_status(&self, instance: LhInstance) -> InstanceStatus {
        let state = if instance.instance_state.is_empty() {
            state::UNKNOWN.to_string()
        } else {
            instance.instance_state.to_lowercase()
        };
        InstanceStatus {
            name: instance.instance_name,
            ip_address: instance.public_addresses.into_iter().next().unwrap_or_default(),
            ipv6_address: instance
                .public_ipv6_addresses
                .into_iter()
                .next()
                .unwrap_or_default(),
            region: self.region.clone(),
            traffic_used_bytes: 0,
            traffic_total_bytes: 0,
            traffic_reset_at: None,
            expires_at: parse_vendor_time(&instance.expired_time),
            state,
            instance_id: instance.instance_id,
        }
    }
}

#[async_trait]
impl Provider for LighthouseProvider {
    fn name(&self) -> &str {
        self.tag
    }

    async fn get_instance_status(&self, instance_id: &str) -> Result<InstanceStatus> {
        let resp: DescribeInstancesResponse = self
            .call("DescribeInstances", json!({ "InstanceIds": [instance_id] }))
            .await?;
        let instance = resp
            .instance_set
            .into_iter()
            .find(|i| i.instance_id == instance_id)
            .ok_or_else(|| ProviderError::instance_not_found(instance_id))?;

        let mut status = self.to_status(instance);
        match self.fetch_traffic(instance_id).await {
            Ok((used, total, reset_at)) => {
                status.traffic_used_bytes = used;
                status.traffic_total_bytes = total;
                status.traffic_reset_at = reset_at;
            }
            Err(e) => warn!("[TENCENT] Failed to get traffic packages: {}", e),
        }
        Ok(status)
    }

    async fn list_instances(&self) -> Result<Vec<InstanceStatus>> {
        let resp: DescribeInstancesResponse = self
            .call("DescribeInstances", json!({ "Limit": 100 }))
            .await?;

        let mut result = Vec::with_capacity(resp.instance_set.len());
        for instance in resp.instance_set {
            match self.get_instance_status(&instance.instance_id).await {
                Ok(status) => result.push(status),
                Err(e) => warn!(
                    "[TENCENT] Failed to get status for {}: {}",
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
        info!(
            "[TENCENT] Creating instance: region={}, plan={}, image={}, name={}",
            self.region, opts.plan, opts.image_id, opts.name
        );
        let resp: CreateInstancesResponse = self
            .call(
                "CreateInstances",
                json!({
                    "BundleId": opts.plan,
                    "BlueprintId": opts.image_id,
                    "InstanceName": opts.name,
                    "InstanceCount": 1,
                    "InstanceChargePrepaid": { "Period": 1 },
                }),
            )
            .await?;

        let instance_id = resp
            .instance_id_set
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::vendor("EmptyResult", "no instance created"))?;

        Ok(OperationResult::success("Instance created successfully")
            .with("instance_id", instance_id))
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<OperationResult> {
        let _: Value = self
            .call("TerminateInstances", json!({ "InstanceIds": [instance_id] }))
            .await?;
        Ok(OperationResult::success("Instance terminated successfully")
            .with("instance_id", instance_id))
    }

    async fn list_regions(&self) -> Result<Vec<RegionInfo>> {
        let resp: DescribeRegionsResponse = self.call("DescribeRegions", json!({})).await?;

        let registry = RegionRegistry::global();
        Ok(resp
            .region_set
            .iter()
            .map(|r| registry.region_info(self.tag, &r.region, &r.region_name))
            .collect())
    }

    async fn list_plans(&self, _region: &str) -> Result<Vec<PlanInfo>> {
        let resp: DescribeBundlesResponse = self.call("DescribeBundles", json!({})).await?;

        Ok(resp
            .bundle_set
            .into_iter()
            .filter(|b| b.support_linux_unix_platform)
            .map(|b| {
                // 没有月流量时按带宽估算
                let transfer_gb = b
                    .monthly_traffic
                    .or(b.internet_max_bandwidth_out.map(|bw| bw * 1024))
                    .unwrap_or(0);
                PlanInfo {
                    id: b.bundle_id,
                    name: b.bundle_display_label,
                    cpu: b.cpu,
                    memory_mb: b.memory * 1024,
                    storage_gb: b.system_disk_size,
                    transfer_tb: transfer_gb as f64 / 1024.0,
                    price_monthly: b.price.instance_price.original_bundle_price,
                }
            })
            .collect())
    }

    async fn list_images(&self, _region: &str) -> Result<Vec<ImageInfo>> {
        let resp: DescribeBlueprintsResponse = self
            .call(
                "DescribeBlueprints",
                json!({ "Filters": [{ "Name": "blueprint-type", "Values": ["PURE_OS"] }] }),
            )
            .await?;

        Ok(resp
            .blueprint_set
            .into_iter()
            .map(|b| ImageInfo {
                os: if b.os_name.to_lowercase().contains("windows") {
                    "windows".to_string()
                } else {
                    "linux".to_string()
                },
                id: b.blueprint_id,
                name: b.display_title,
                platform: b.platform,
                description: b.description,
            })
            .collect())
    }
}
