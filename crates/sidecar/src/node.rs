//! 节点注册与中心服务交互
//!
//! 节点生命周期：`New → Detecting → Registered → Reporting → Offline`。
//! 所有请求使用 HTTP Basic 认证（`ipv4:secret`），响应为统一信封
//! `{code, message, data}`。
//!
//! 设备认证分两层：Basic 认证证明调用方是合法节点，
//! [`Node::check_device_auth`] 再校验用户设备的 UDID 与 token。

use crate::auth_cache::{AuthCache, NEGATIVE_TTL, POSITIVE_TTL};
use crate::ech::{self, EchKeysListData};
use crate::error::{Result, SidecarError};
use crate::ip::{IpDetector, IpFamily};
use crate::types::*;
use k2_common::util::region_slug;
use rand::Rng;
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 中心请求默认超时
pub const DEFAULT_CENTER_TIMEOUT: Duration = Duration::from_secs(10);

/// 节点状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeState {
    New = 0,
    Detecting = 1,
    Registered = 2,
    Reporting = 3,
    Offline = 4,
}

impl From<u8> for NodeState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Detecting,
            2 => Self::Registered,
            3 => Self::Reporting,
            4 => Self::Offline,
            _ => Self::New,
        }
    }
}

/// 节点身份
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeIdentity {
    pub ipv4: String,
    pub ipv6: String,
    /// ISO 国家代码
    pub country: String,
    pub region: String,
    /// 显示名称，为空时使用 IPv4
    pub name: String,
}

impl NodeIdentity {
    fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.ipv4
        } else {
            &self.name
        }
    }
}

/// UDID 可能带 `@user_id` 后缀，只取 `@` 之前的部分
pub fn normalize_udid(raw: &str) -> &str {
    raw.split_once('@').map(|(udid, _)| udid).unwrap_or(raw)
}

/// 生成隧道名称：`<国家> <4 位随机数>`
pub fn generate_tunnel_name(country: &str) -> String {
    let country = if country.is_empty() { "XX" } else { country };
    let n: u32 = rand::rng().random_range(0..10000);
    format!("{country} {n:04}")
}

/// 中心服务中的节点
pub struct Node {
    center_url: String,
    secret: String,
    identity: NodeIdentity,
    client: reqwest::Client,
    state: AtomicU8,
    auth_cache: Option<Arc<AuthCache>>,
}

impl Node {
    /// 中心地址与密钥均不能为空
    pub fn new(center_url: &str, secret: &str) -> Result<Self> {
        Self::with_timeout(center_url, secret, DEFAULT_CENTER_TIMEOUT)
    }

    pub fn with_timeout(center_url: &str, secret: &str, timeout: Duration) -> Result<Self> {
        if center_url.trim().is_empty() {
            return Err(SidecarError::config("center url is required"));
        }
        if secret.is_empty() {
            return Err(SidecarError::config("secret is required"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SidecarError::transport(format!("build client: {e}")))?;

        Ok(Self {
            center_url: center_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
            identity: NodeIdentity::default(),
            client,
            state: AtomicU8::new(NodeState::New as u8),
            auth_cache: None,
        })
    }

    /// 启用设备认证缓存
    pub fn with_auth_cache(mut self, cache: Arc<AuthCache>) -> Self {
        self.auth_cache = Some(cache);
        self
    }

    /// 直接指定身份，跳过探测
    pub fn with_identity(mut self, identity: NodeIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn identity_mut(&mut self) -> &mut NodeIdentity {
        &mut self.identity
    }

    pub fn ipv4(&self) -> &str {
        &self.identity.ipv4
    }

    pub fn center_url(&self) -> &str {
        &self.center_url
    }

    pub fn state(&self) -> NodeState {
        NodeState::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: NodeState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// 探测出口地址与地理信息
    ///
    /// IPv4 与国家代码必需，IPv6 可选。
    pub async fn detect(&mut self, detector: &IpDetector) -> Result<()> {
        self.set_state(NodeState::Detecting);

        let v4 = detector
            .detect(IpFamily::V4)
            .await
            .map_err(|e| SidecarError::transport(format!("failed to get IPv4: {e}")))?;
        if v4.country_code.is_empty() {
            return Err(SidecarError::config(format!(
                "failed to detect country code for IPv4: {}",
                v4.ip
            )));
        }

        self.identity.region = region_slug(&v4.country_code, &v4.location);
        self.identity.country = v4.country_code;
        self.identity.ipv4 = v4.ip;
        info!(
            "[Node] Detected IPv4: {}, Country: {}, Region: {}",
            self.identity.ipv4, self.identity.country, self.identity.region
        );

        match detector.detect(IpFamily::V6).await {
            Ok(v6) => {
                info!("[Node] Detected IPv6: {}", v6.ip);
                self.identity.ipv6 = v6.ip;
            }
            Err(e) => debug!("[Node] No IPv6: {}", e),
        }

        if self.identity.name.is_empty() {
            self.identity.name = self.identity.ipv4.clone();
        }
        Ok(())
    }

    fn require_ipv4(&self) -> Result<()> {
        if self.identity.ipv4.is_empty() {
            return Err(SidecarError::config("IPv4 is required, call detect() first"));
        }
        Ok(())
    }

    fn require_identity(&self) -> Result<()> {
        self.require_ipv4()?;
        if self.identity.country.is_empty() {
            return Err(SidecarError::config("Country is required, call detect() first"));
        }
        Ok(())
    }

    fn upsert_request(&self, is_alive: Option<bool>, tunnels: Vec<TunnelConfig>) -> NodeUpsertRequest {
        NodeUpsertRequest {
            country: self.identity.country.clone(),
            region: self.identity.region.clone(),
            name: self.identity.display_name().to_string(),
            ipv6: self.identity.ipv6.clone(),
            secret_token: self.secret.clone(),
            is_alive,
            tunnels,
        }
    }

    fn node_path(&self) -> String {
        format!("/slave/nodes/{}", self.identity.ipv4)
    }

    fn tunnel_path(&self, domain: &str) -> String {
        format!("/slave/nodes/{}/tunnels/{}", self.identity.ipv4, domain)
    }

    /// 只注册节点本身，返回节点 secret token
    pub async fn register_node(&self) -> Result<String> {
        self.require_identity()?;
        info!(
            "[Node] Registering node: IPv4={}, Country={}, Name={}",
            self.identity.ipv4,
            self.identity.country,
            self.identity.display_name()
        );

        let body = self
            .request_with_auth(Method::PUT, &self.node_path(), Some(&self.upsert_request(None, vec![])))
            .await?;
        let data: NodeUpsertResponse = parse_envelope(&body, "node registration")?;

        self.set_state(NodeState::Registered);
        info!(
            "[Node] Node registered successfully: IPv4={}, Created={}",
            data.ipv4, data.created
        );
        Ok(data.secret_token)
    }

    /// 一次调用注册节点与全部隧道
    ///
    /// 返回每个隧道域名对应的证书，任何失败都视为注册失败。
    pub async fn register(&self, tunnels: Vec<TunnelConfig>) -> Result<RegisterResult> {
        self.require_identity()?;
        info!(
            "[Node] Registering node with {} tunnels: IPv4={}, Country={}",
            tunnels.len(),
            self.identity.ipv4,
            self.identity.country
        );

        let request = self.upsert_request(None, tunnels);
        let body = self
            .request_with_auth(Method::PUT, &self.node_path(), Some(&request))
            .await?;
        let data: NodeUpsertResponse = parse_envelope(&body, "registration")?;

        let mut result = RegisterResult {
            ipv4: data.ipv4,
            node_created: data.created,
            ..Default::default()
        };
        for tunnel in data.tunnels {
            info!(
                "[Node] Tunnel registered: Domain={}, Protocol={}, Created={}",
                tunnel.domain, tunnel.protocol, tunnel.created
            );
            result.tunnels.insert(
                tunnel.domain,
                TunnelCertificate {
                    ssl_cert: tunnel.ssl_cert,
                    ssl_key: tunnel.ssl_key,
                },
            );
        }

        self.set_state(NodeState::Registered);
        info!(
            "[Node] Registration completed: IPv4={}, NodeCreated={}, Tunnels={}",
            result.ipv4,
            result.node_created,
            result.tunnels.len()
        );
        Ok(result)
    }

    /// 为当前节点添加单条隧道
    ///
    /// 隧道名称自动生成为 `<国家> <4 位随机数>`。
    pub async fn add_tunnel(
        &self,
        domain: &str,
        port: u16,
        protocol: &str,
        version: u32,
        hop_port_start: u16,
        hop_port_end: u16,
    ) -> Result<TunnelCertificate> {
        self.require_ipv4()?;
        if domain.is_empty() {
            return Err(SidecarError::config("domain is required"));
        }

        let request = TunnelUpsertRequest {
            name: generate_tunnel_name(&self.identity.country),
            protocol: protocol.to_string(),
            port,
            version,
            hop_port_start,
            hop_port_end,
        };
        info!(
            "[Node] Adding tunnel: Domain={}, Port={}, Protocol={}, Version={}, HopPorts={}-{}, Name={}",
            domain, port, protocol, version, hop_port_start, hop_port_end, request.name
        );

        let body = self
            .request_with_auth(Method::PUT, &self.tunnel_path(domain), Some(&request))
            .await?;
        let data: TunnelUpsertResponse = parse_envelope(&body, "add tunnel")?;

        info!(
            "[Node] Tunnel added successfully: Domain={}, TunnelID={}, Created={}",
            data.domain, data.tunnel_id, data.created
        );
        Ok(TunnelCertificate {
            ssl_cert: data.ssl_cert,
            ssl_key: data.ssl_key,
        })
    }

    pub async fn remove_tunnel(&self, domain: &str) -> Result<()> {
        self.require_ipv4()?;
        if domain.is_empty() {
            return Err(SidecarError::config("domain is required"));
        }

        info!("[Node] Removing tunnel: Domain={}", domain);
        self.request_with_auth::<()>(Method::DELETE, &self.tunnel_path(domain), None)
            .await?;
        info!("[Node] Tunnel removed successfully: Domain={}", domain);
        Ok(())
    }

    /// 通知中心节点下线，避免客户端继续连接
    pub async fn mark_offline(&self) -> Result<()> {
        self.require_identity()?;
        info!("[Node] Marking node offline: IPv4={}", self.identity.ipv4);

        let request = self.upsert_request(Some(false), vec![]);
        self.request_with_auth(Method::PUT, &self.node_path(), Some(&request))
            .await?;

        self.set_state(NodeState::Offline);
        info!("[Node] Node marked offline successfully: IPv4={}", self.identity.ipv4);
        Ok(())
    }

    /// 上报健康状态
    pub async fn report_status(&self, health: Health) -> Result<()> {
        self.require_ipv4()?;
        info!(
            "[Node] Reporting: CPU={:.1}% Mem={:.1}% Disk={:.1}% Conn={} Speed={:.2}/{:.2}Mbps Loss={:.2}% Traffic={}/{}",
            health.cpu_usage,
            health.memory_usage,
            health.disk_usage,
            health.connections,
            health.bandwidth_up_mbps,
            health.bandwidth_down_mbps,
            health.packet_loss_percent,
            health.network_in,
            health.network_out
        );

        let request = ReportRequest {
            updated_at: chrono::Utc::now().timestamp(),
            health,
        };
        let body = self
            .request_with_auth(Method::POST, "/slave/report/status", Some(&request))
            .await?;

        if self.state() != NodeState::Offline {
            self.set_state(NodeState::Reporting);
        }
        debug!("[Node] Status reported successfully, response: {}", body);
        Ok(())
    }

    /// 向中心校验设备 UDID 与 token（不走缓存）
    ///
    /// 业务码 401 / 402 原样返回，其余错误一律归为未知错误。
    pub async fn check_device_auth(&self, udid: &str, token: &str) -> AuthResult {
        let started = Instant::now();
        let request = DeviceCheckAuthRequest {
            udid: udid.to_string(),
            token: token.to_string(),
        };

        let body = match self
            .request_with_auth(Method::POST, "/slave/device-check-auth", Some(&request))
            .await
        {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    "[Node] Auth failed: UDID={} elapsed={:?} error={}",
                    udid,
                    started.elapsed(),
                    e
                );
                return AuthResult::fail(AuthErrorCode::Unknown, format!("API request failed: {e}"));
            }
        };

        let resp: CenterResponse<DeviceCheckAuthResponse> = match serde_json::from_str(&body) {
            Ok(resp) => resp,
            Err(e) => {
                warn!(
                    "[Node] Auth failed: UDID={} error=parse_failed body={}",
                    udid, body
                );
                return AuthResult::fail(
                    AuthErrorCode::Unknown,
                    format!("failed to parse response: {e}"),
                );
            }
        };

        if resp.code != 0 {
            info!(
                "[Node] Auth failed: UDID={} elapsed={:?} code={} message={}",
                udid,
                started.elapsed(),
                resp.code,
                resp.message
            );
            return AuthResult::fail(AuthErrorCode::from_center_code(resp.code), resp.message);
        }

        let Some(data) = resp.data else {
            warn!("[Node] Auth failed: UDID={} error=nil_data", udid);
            return AuthResult::fail(AuthErrorCode::Unknown, "nil response data");
        };

        if data.udid != udid {
            warn!(
                "[Node] Auth failed: UDID mismatch expected={} got={}",
                udid, data.udid
            );
            return AuthResult::fail(
                AuthErrorCode::InvalidToken,
                format!("UDID mismatch: expected={}, got={}", udid, data.udid),
            );
        }

        info!(
            "[Node] Auth success: UDID={} UserID={} elapsed={:?}",
            udid,
            data.user_id,
            started.elapsed()
        );
        AuthResult::ok()
    }

    /// 带缓存的设备认证
    ///
    /// - 成功结果缓存 30 分钟
    /// - 401 缓存 5 分钟
    /// - 402 与未知错误不缓存（用户可能随时续费，网络错误下次重试）
    pub async fn check_auth_with_result(&self, udid: &str, token: &str) -> AuthResult {
        let udid = normalize_udid(udid);
        if udid.is_empty() || token.is_empty() {
            debug!("[Auth] Format validation failed: empty credentials");
            return AuthResult::fail(AuthErrorCode::InvalidToken, "invalid credential format");
        }

        if let Some(cache) = &self.auth_cache {
            let cached = cache.get_result(udid, token).await;
            if cached.found {
                if cached.is_valid {
                    return AuthResult::ok();
                }
                debug!(
                    "[Auth] Cached auth failure for UDID={} code={}",
                    udid,
                    cached.error_code.code()
                );
                return AuthResult::fail(cached.error_code, "cached auth failure");
            }
        }

        let result = self.check_device_auth(udid, token).await;

        if let Some(cache) = &self.auth_cache {
            if result.success {
                cache.set_success(udid, token, POSITIVE_TTL).await;
            } else if result.error_code == AuthErrorCode::InvalidToken {
                cache
                    .set_failure(udid, token, NEGATIVE_TTL, result.error_code)
                    .await;
                debug!("[Auth] Negative cache set for UDID={}", udid);
            }
        }

        result
    }

    pub async fn check_auth(&self, udid: &str, token: &str) -> bool {
        self.check_auth_with_result(udid, token).await.success
    }

    /// 拉取 ECH 密钥写入 YAML 文件，返回密钥数量
    ///
    /// 中心没有返回密钥时不写文件。
    pub async fn fetch_ech_keys(&self, output_path: &Path) -> Result<usize> {
        self.require_ipv4()?;
        info!("[Node] Fetching ECH keys from Center...");

        let body = self
            .request_with_auth::<()>(Method::GET, "/slave/ech/keys", None)
            .await?;
        let resp: CenterResponse<EchKeysListData> = serde_json::from_str(&body)?;
        if resp.code != 0 {
            return Err(SidecarError::coordinator(
                "ECH keys fetch",
                resp.code,
                resp.message,
            ));
        }

        let items = resp.data.map(|d| d.items).unwrap_or_default();
        if items.is_empty() {
            info!("[Node] No ECH keys returned from Center");
            return Ok(0);
        }
        ech::write_keys_file(output_path, items)
    }

    /// 拉取 ECH 密钥后通知 PID 文件对应的进程重新加载
    ///
    /// 信号发送失败只记录警告。
    pub async fn fetch_ech_keys_and_notify(
        &self,
        output_path: &Path,
        pid_file: Option<&Path>,
    ) -> Result<usize> {
        let count = self.fetch_ech_keys(output_path).await?;
        if count > 0
            && let Some(pid_file) = pid_file
            && let Err(e) = ech::send_sighup(pid_file)
        {
            warn!("[Node] Failed to send SIGHUP: {}", e);
        }
        Ok(count)
    }

    /// 发送带 Basic 认证的请求，返回响应体
    async fn request_with_auth<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<String> {
        let url = format!("{}{}", self.center_url, path);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .basic_auth(&self.identity.ipv4, Some(&self.secret));
        if let Some(body) = body {
            request = request.json(body);
        }

        let started = Instant::now();
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    "[Node] Center request failed: {} {} elapsed={:?} error={}",
                    method,
                    path,
                    started.elapsed(),
                    e
                );
                return Err(e.into());
            }
        };

        let status = response.status();
        let text = response.text().await?;
        if status.as_u16() >= 300 {
            warn!(
                "[Node] Center request failed: {} {} status={} elapsed={:?} body={}",
                method,
                path,
                status.as_u16(),
                started.elapsed(),
                text
            );
            return Err(SidecarError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        debug!(
            "[Node] Center request ok: {} {} status={} elapsed={:?}",
            method,
            path,
            status.as_u16(),
            started.elapsed()
        );
        Ok(text)
    }
}

/// 解析信封，非零业务码或空 data 视为失败
fn parse_envelope<T: DeserializeOwned>(body: &str, context: &str) -> Result<T> {
    let resp: CenterResponse<T> = serde_json::from_str(body)?;
    match resp.data {
        Some(data) if resp.code == 0 => Ok(data),
        _ => Err(SidecarError::coordinator(context, resp.code, resp.message)),
    }
}
