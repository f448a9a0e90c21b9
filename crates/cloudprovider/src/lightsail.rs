//! AWS Lightsail 驱动（JSON 1.1 协议 + SigV4）

use crate::error::{ProviderError, Result};
use crate::http::{DEFAULT_TIMEOUT, build_client, host_of, read_response};
use crate::provider::Provider;
use crate::region::RegionRegistry;
use crate::signer::sigv4::{CONTENT_TYPE, SigV4Signer};
use crate::types::{
    ChangeIpOptions, CreateInstanceOptions, ImageInfo, InstanceStatus, OperationResult, PlanInfo,
    PROVIDER_AWS_LIGHTSAIL, RegionInfo, state,
};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

const TARGET_PREFIX: &str = "Lightsail_20161128";
const GIB: i64 = 1 << 30;

/// Lightsail 单区域驱动
pub struct LightsailProvider {
    region: String,
    signer: SigV4Signer,
    client: reqwest::Client,
    endpoint: String,
}

// ========== 响应结构 ==========

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AwsError {
    #[serde(rename = "__type")]
    kind: String,
    message: String,
    #[serde(rename = "Message")]
    message_upper: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct LsInstance {
    name: String,
    public_ip_address: String,
    ipv6_addresses: Vec<String>,
    is_static_ip: bool,
    location: LsLocation,
    state: LsState,
    networking: LsNetworking,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct LsLocation {
    region_name: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct LsState {
    name: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct LsNetworking {
    monthly_transfer: LsMonthlyTransfer,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct LsMonthlyTransfer {
    gb_per_month_allocated: i64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct GetInstanceResponse {
    instance: LsInstance,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct GetInstancesResponse {
    instances: Vec<LsInstance>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct MetricDataResponse {
    metric_data: Vec<MetricDatapoint>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MetricDatapoint {
    sum: f64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct StaticIp {
    name: String,
    ip_address: String,
    attached_to: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct GetStaticIpsResponse {
    static_ips: Vec<StaticIp>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct GetStaticIpResponse {
    static_ip: StaticIp,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct OperationsResponse {
    operations: Vec<Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct GetRegionsResponse {
    regions: Vec<LsRegion>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct LsRegion {
    name: String,
    display_name: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct GetBundlesResponse {
    bundles: Vec<LsBundle>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct LsBundle {
    bundle_id: String,
    name: String,
    cpu_count: u32,
    ram_size_in_gb: f64,
    disk_size_in_gb: u32,
    transfer_per_month_in_gb: f64,
    price: f64,
    supported_platforms: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct GetBlueprintsResponse {
    blueprints: Vec<LsBlueprint>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct LsBlueprint {
    blueprint_id: String,
    name: String,
    group: String,
    #[serde(rename = "type")]
    kind: String,
    platform: String,
    description: String,
}

/// 下个月 1 日 00:00 UTC
fn next_month_start(now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}

fn month_start(now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0).single()
}

impl LightsailProvider {
    pub fn new(access_key_id: &str, secret_access_key: &str, region: &str) -> Result<Self> {
        Ok(Self {
            region: region.to_string(),
            signer: SigV4Signer::new(access_key_id, secret_access_key, region, "lightsail"),
            client: build_client(DEFAULT_TIMEOUT)?,
            endpoint: format!("https://lightsail.{region}.amazonaws.com"),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn call<T: DeserializeOwned>(&self, op: &str, payload: Value) -> Result<T> {
        let body = payload.to_string();
        let target = format!("{TARGET_PREFIX}.{op}");
        let signed = self
            .signer
            .sign(&host_of(&self.endpoint), &target, &body, Utc::now());

        debug!("[AWS] {} region={}", op, self.region);
        let response = self
            .client
            .post(format!("{}/", self.endpoint))
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Amz-Date", &signed.amz_date)
            .header("X-Amz-Target", &target)
            .header("Authorization", &signed.authorization)
            .body(body)
            .send()
            .await
            .map_err(|e| ProviderError::transport(format!("{op} request failed: {e}")))?;
        let (status, body) = read_response(response).await?;

        if !(200..300).contains(&status) {
            return Err(match serde_json::from_str::<AwsError>(&body) {
                Ok(err) if !err.kind.is_empty() => {
                    // "com.amazonaws...#NotFoundException" 形式只取 # 之后
                    let code = err.kind.rsplit('#').next().unwrap_or(&err.kind).to_string();
                    let message = if err.message.is_empty() {
                        err.message_upper
                    } else {
                        err.message
                    };
                    ProviderError::vendor(code, message)
                }
                _ => ProviderError::Http { status, body },
            });
        }
        if body.trim().is_empty() {
            return Ok(serde_json::from_str("{}")?);
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn get_instance(&self, instance_id: &str) -> Result<LsInstance> {
        match self
            .call::<GetInstanceResponse>("GetInstance", json!({ "instanceName": instance_id }))
            .await
        {
            Ok(resp) if !resp.instance.name.is_empty() => Ok(resp.instance),
            Ok(_) => Err(ProviderError::instance_not_found(instance_id)),
            Err(ProviderError::Vendor { code, .. }) if code == "NotFoundException" => {
                Err(ProviderError::instance_not_found(instance_id))
            }
            Err(e) => Err(e),
        }
    }

    /// 本月 1 日至今的出方向流量总和
    async fn monthly_network_out(&self, instance_id: &str, now: DateTime<Utc>) -> Result<i64> {
        let start = month_start(now).unwrap_or(now);
        let resp: MetricDataResponse = self
            .call(
                "GetInstanceMetricData",
                json!({
                    "instanceName": instance_id,
                    "metricName": "NetworkOut",
                    "period": 86400,
                    "startTime": start.timestamp(),
                    "endTime": now.timestamp(),
                    "unit": "Bytes",
                    "statistics": ["Sum"],
                }),
            )
            .await?;
        Ok(resp.metric_data.iter().map(|d| d.sum).sum::<f64>() as i64)
    }

    async fn release_static_ip(&self, name: &str) -> Result<()> {
        let _: Value = self
            .call("ReleaseStaticIp", json!({ "staticIpName": name }))
            .await?;
        Ok(())
    }

    /// 摘除并释放当前绑定在实例上的静态 IP
    async fn detach_existing_static_ip(&self, instance_id: &str) -> Result<()> {
        // 查询失败时跳过摘除，继续分配新 IP
        let resp: GetStaticIpsResponse = match self.call("GetStaticIps", json!({})).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("[AWS] Failed to get static IPs: {}", e);
                return Ok(());
            }
        };
        for ip in resp.static_ips.iter().filter(|ip| ip.attached_to == instance_id) {
            info!("[AWS] Detaching static IP {} from {}", ip.name, instance_id);
            let _: Value = self
                .call("DetachStaticIp", json!({ "staticIpName": ip.name }))
                .await
                .map_err(|e| {
                    ProviderError::transport(format!("failed to detach static IP: {e}"))
                })?;

            if let Err(e) = self.release_static_ip(&ip.name).await {
                warn!("[AWS] Failed to release old static IP {}: {}", ip.name, e);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for LightsailProvider {
    fn name(&self) -> &str {
        PROVIDER_AWS_LIGHTSAIL
    }

    async fn get_instance_status(&self, instance_id: &str) -> Result<InstanceStatus> {
        let instance = self.get_instance(instance_id).await?;
        let now = Utc::now();

        let traffic_used = match self.monthly_network_out(instance_id, now).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("[AWS] Failed to get traffic metrics for {}: {}", instance_id, e);
                0
            }
        };

        let state = if instance.state.name.is_empty() {
            state::UNKNOWN.to_string()
        } else {
            instance.state.name.to_lowercase()
        };

        Ok(InstanceStatus {
            instance_id: instance_id.to_string(),
            name: instance_id.to_string(),
            ip_address: instance.public_ip_address,
            ipv6_address: instance.ipv6_addresses.into_iter().next().unwrap_or_default(),
            region: instance.location.region_name,
            traffic_used_bytes: traffic_used,
            traffic_total_bytes: instance.networking.monthly_transfer.gb_per_month_allocated * GIB,
            traffic_reset_at: next_month_start(now),
            expires_at: None,
            state,
        })
    }

    async fn list_instances(&self) -> Result<Vec<InstanceStatus>> {
        let resp: GetInstancesResponse = self.call("GetInstances", json!({})).await?;

        let mut result = Vec::with_capacity(resp.instances.len());
        for instance in resp.instances {
            match self.get_instance_status(&instance.name).await {
                Ok(status) => result.push(status),
                Err(e) => warn!("[AWS] Failed to get status for {}: {}", instance.name, e),
            }
        }
        Ok(result)
    }

    async fn change_ip(&self, instance_id: &str, _opts: &ChangeIpOptions) -> Result<OperationResult> {
        info!("[AWS] Changing IP for instance {}", instance_id);
        let instance = self.get_instance(instance_id).await?;

        if instance.is_static_ip {
            self.detach_existing_static_ip(instance_id).await?;
        }

        let new_ip_name = format!("{}-ip-{}", instance_id, Utc::now().timestamp());
        let _: Value = self
            .call("AllocateStaticIp", json!({ "staticIpName": new_ip_name }))
            .await
            .map_err(|e| ProviderError::transport(format!("failed to allocate static IP: {e}")))?;

        let attach: Result<Value> = self
            .call(
                "AttachStaticIp",
                json!({ "staticIpName": new_ip_name, "instanceName": instance_id }),
            )
            .await;
        if let Err(e) = attach {
            if let Err(release_err) = self.release_static_ip(&new_ip_name).await {
                warn!(
                    "[AWS] Failed to release static IP {} after attach failure: {}",
                    new_ip_name, release_err
                );
            }
            return Err(ProviderError::transport(format!(
                "failed to attach static IP: {e}"
            )));
        }

        let new_ip = match self
            .call::<GetStaticIpResponse>("GetStaticIp", json!({ "staticIpName": new_ip_name }))
            .await
        {
            Ok(resp) => resp.static_ip.ip_address,
            Err(e) => {
                warn!("[AWS] Failed to read new static IP {}: {}", new_ip_name, e);
                String::new()
            }
        };

        info!("[AWS] IP changed for {}: {}", instance_id, new_ip);
        Ok(OperationResult::success("IP changed successfully")
            .with("new_ip", new_ip)
            .with("static_ip_id", new_ip_name))
    }

    async fn create_instance(&self, opts: &CreateInstanceOptions) -> Result<OperationResult> {
        info!(
            "[AWS] Creating instance: name={}, region={}, plan={}",
            opts.name, self.region, opts.plan
        );

        // Lightsail 需要可用区，取区域的第一个可用区
        let resp: OperationsResponse = self
            .call(
                "CreateInstances",
                json!({
                    "instanceNames": [opts.name],
                    "availabilityZone": format!("{}a", self.region),
                    "blueprintId": opts.image_id,
                    "bundleId": opts.plan,
                }),
            )
            .await?;

        if resp.operations.is_empty() {
            return Err(ProviderError::vendor("EmptyResult", "no operations returned"));
        }

        Ok(OperationResult::success("Instance creation initiated")
            .with("instance_id", opts.name.clone())
            .with("instance_name", opts.name.clone()))
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<OperationResult> {
        let _: OperationsResponse = self
            .call("DeleteInstance", json!({ "instanceName": instance_id }))
            .await?;
        Ok(OperationResult::success("Instance deleted successfully")
            .with("instance_id", instance_id))
    }

    async fn list_regions(&self) -> Result<Vec<RegionInfo>> {
        let resp: GetRegionsResponse = self
            .call("GetRegions", json!({ "includeAvailabilityZones": false }))
            .await?;

        let registry = RegionRegistry::global();
        Ok(resp
            .regions
            .iter()
            .map(|r| registry.region_info(PROVIDER_AWS_LIGHTSAIL, &r.name, &r.display_name))
            .collect())
    }

    async fn list_plans(&self, _region: &str) -> Result<Vec<PlanInfo>> {
        let resp: GetBundlesResponse = self.call("GetBundles", json!({})).await?;

        Ok(resp
            .bundles
            .into_iter()
            .filter(|b| b.supported_platforms.iter().any(|p| p == "LINUX_UNIX"))
            .map(|b| PlanInfo {
                id: b.bundle_id,
                name: b.name,
                cpu: b.cpu_count,
                memory_mb: (b.ram_size_in_gb * 1024.0) as u32,
                storage_gb: b.disk_size_in_gb,
                transfer_tb: b.transfer_per_month_in_gb / 1024.0,
                price_monthly: b.price,
            })
            .collect())
    }

    async fn list_images(&self, _region: &str) -> Result<Vec<ImageInfo>> {
        let resp: GetBlueprintsResponse = self.call("GetBlueprints", json!({})).await?;

        Ok(resp
            .blueprints
            .into_iter()
            .filter(|b| b.kind == "os")
            .map(|b| ImageInfo {
                os: if b.platform == "LINUX_UNIX" {
                    "linux".to_string()
                } else {
                    "windows".to_string()
                },
                id: b.blueprint_id,
                name: b.name,
                platform: b.group,
                description: b.description,
            })
            .collect())
    }
}
