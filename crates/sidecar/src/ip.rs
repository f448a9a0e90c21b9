//! 外网 IP 与地理信息探测
//!
//! 依次尝试多个公共 IP 信息服务，HTTP 客户端绑定到请求的地址族，
//! 保证拿到的是本机对应地址族的出口地址。

use crate::error::{Result, SidecarError};
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const DETECT_TIMEOUT: Duration = Duration::from_secs(30);

/// 地址族
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V4 => "ipv4",
            Self::V6 => "ipv6",
        }
    }

    /// 判断地址字面量是否属于该地址族
    ///
    /// IPv4 映射的 IPv6 地址（`::ffff:a.b.c.d`）按 IPv4 处理。
    pub fn matches(&self, ip: &str) -> bool {
        detect_version(ip) == Some(*self)
    }

    fn unspecified(&self) -> IpAddr {
        match self {
            Self::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Self::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IpFamily {
    type Err = SidecarError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ipv4" => Ok(Self::V4),
            "ipv6" => Ok(Self::V6),
            other => Err(SidecarError::config(format!(
                "unknown ip version: {other} (must be 'ipv4' or 'ipv6')"
            ))),
        }
    }
}

fn detect_version(ip: &str) -> Option<IpFamily> {
    match ip.parse::<IpAddr>().ok()? {
        IpAddr::V4(_) => Some(IpFamily::V4),
        IpAddr::V6(v6) if v6.to_ipv4_mapped().is_some() => Some(IpFamily::V4),
        IpAddr::V6(_) => Some(IpFamily::V6),
    }
}

fn version_label(ip: &str) -> &'static str {
    detect_version(ip).map(|f| f.as_str()).unwrap_or("invalid")
}

/// 探测结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpData {
    pub ip: String,
    /// 城市，缺失时为地区
    pub location: String,
    /// ISO 国家代码
    pub country_code: String,
}

/// IP 信息服务
#[derive(Debug, Clone)]
pub enum IpService {
    /// ipify 只返回地址，国家信息再查 `{info_base}/{ip}/json`
    Ipify { url: String, info_base: String },
    IpInfo { url: String },
    /// ipwhois 要求 `success = true`
    IpWhois { url: String },
}

impl IpService {
    fn name(&self) -> &'static str {
        match self {
            Self::Ipify { .. } => "ipify",
            Self::IpInfo { .. } => "ipinfo.io",
            Self::IpWhois { .. } => "ipwhois.app",
        }
    }

    pub fn defaults() -> Vec<IpService> {
        vec![
            Self::Ipify {
                url: "https://api64.ipify.org?format=json".into(),
                info_base: "https://ipinfo.io".into(),
            },
            Self::IpInfo {
                url: "https://ipinfo.io/json".into(),
            },
            Self::IpWhois {
                url: "https://ipwhois.app/json/".into(),
            },
        ]
    }
}

#[derive(Debug, Default, Deserialize)]
struct IpifyResponse {
    #[serde(default)]
    ip: String,
}

#[derive(Debug, Default, Deserialize)]
struct IpInfoResponse {
    #[serde(default)]
    ip: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    region: String,
}

#[derive(Debug, Default, Deserialize)]
struct IpWhoisResponse {
    #[serde(default)]
    ip: String,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    country_code: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    region: String,
}

fn first_non_empty(fields: &[&str]) -> String {
    fields
        .iter()
        .find(|f| !f.is_empty())
        .map(|f| f.to_string())
        .unwrap_or_default()
}

/// 外网 IP 探测器
#[derive(Debug, Clone)]
pub struct IpDetector {
    services: Vec<IpService>,
    timeout: Duration,
}

impl Default for IpDetector {
    fn default() -> Self {
        Self {
            services: IpService::defaults(),
            timeout: DETECT_TIMEOUT,
        }
    }
}

impl IpDetector {
    pub fn new(services: Vec<IpService>) -> Self {
        Self {
            services,
            timeout: DETECT_TIMEOUT,
        }
    }

    /// 探测指定地址族的出口地址
    ///
    /// 返回第一个地址族匹配且带国家代码的结果；全部失败时返回最后一个错误。
    pub async fn detect(&self, family: IpFamily) -> Result<IpData> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .local_address(family.unspecified())
            .build()
            .map_err(|e| SidecarError::transport(format!("build client: {e}")))?;

        let mut last_error: Option<String> = None;
        for service in &self.services {
            match query(&client, service, family).await {
                Ok(Some(data)) => {
                    info!(
                        "Detected {} via {}: {} ({} {})",
                        family,
                        service.name(),
                        data.ip,
                        data.country_code,
                        data.location
                    );
                    return Ok(data);
                }
                Ok(None) => debug!("{} returned no {} address", service.name(), family),
                Err(e) => {
                    debug!("{} failed for {}: {}", service.name(), family, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(SidecarError::transport(match last_error {
            Some(e) => format!("all {family} services failed: {e}"),
            None => format!("all {family} services failed"),
        }))
    }
}

async fn fetch<T: for<'de> Deserialize<'de>>(client: &reqwest::Client, url: &str) -> Result<T> {
    Ok(client.get(url).send().await?.json::<T>().await?)
}

/// 查询单个服务
///
/// 服务返回空地址时得到 `Ok(None)`，继续尝试下一个服务。
async fn query(
    client: &reqwest::Client,
    service: &IpService,
    family: IpFamily,
) -> Result<Option<IpData>> {
    let name = service.name();
    let wrong_family = |ip: &str| {
        SidecarError::transport(format!(
            "{name} returned wrong IP version: got {}, want {family}",
            version_label(ip)
        ))
    };
    let no_country =
        |ip: &str| SidecarError::transport(format!("{name} failed to get country code for IP: {ip}"));

    let data = match service {
        IpService::Ipify { url, info_base } => {
            let resp: IpifyResponse = fetch(client, url).await?;
            if resp.ip.is_empty() {
                return Ok(None);
            }
            if !family.matches(&resp.ip) {
                return Err(wrong_family(&resp.ip));
            }

            let info_url = format!("{}/{}/json", info_base.trim_end_matches('/'), resp.ip);
            let info: IpInfoResponse = fetch(client, &info_url).await.unwrap_or_default();
            if info.country.is_empty() {
                return Err(no_country(&resp.ip));
            }
            IpData {
                location: first_non_empty(&[&info.city, &info.region]),
                country_code: info.country,
                ip: resp.ip,
            }
        }

        IpService::IpInfo { url } => {
            let resp: IpInfoResponse = fetch(client, url).await?;
            if resp.ip.is_empty() {
                return Ok(None);
            }
            if !family.matches(&resp.ip) {
                return Err(wrong_family(&resp.ip));
            }
            if resp.country.is_empty() {
                return Err(no_country(&resp.ip));
            }
            IpData {
                location: first_non_empty(&[&resp.city, &resp.region]),
                country_code: resp.country,
                ip: resp.ip,
            }
        }

        IpService::IpWhois { url } => {
            let resp: IpWhoisResponse = fetch(client, url).await?;
            if !resp.success || resp.ip.is_empty() {
                return Ok(None);
            }
            if !family.matches(&resp.ip) {
                return Err(wrong_family(&resp.ip));
            }
            if resp.country_code.is_empty() {
                return Err(no_country(&resp.ip));
            }
            IpData {
                location: first_non_empty(&[&resp.city, &resp.region]),
                country_code: resp.country_code,
                ip: resp.ip,
            }
        }
    };

    Ok(Some(data))
}
