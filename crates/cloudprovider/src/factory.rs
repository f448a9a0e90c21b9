//! 按配置构造 Provider
//!
//! 配置了区域则构造单区域驱动，区域为空则构造覆盖该厂商全部已知区域的组合驱动。

use crate::bandwagon::{BandwagonInstanceConfig, BandwagonProvider, MultiBandwagonProvider};
use crate::error::{ProviderError, Result};
use crate::lighthouse::LighthouseProvider;
use crate::lightsail::LightsailProvider;
use crate::multi::{MultiRegionProvider, RegionalProvider};
use crate::provider::Provider;
use crate::region::RegionRegistry;
use crate::swas::SwasProvider;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// 厂商账号配置
///
/// 各厂商的凭证字段不同：
/// - SWAS：`access_key_id` + `access_key_secret`
/// - Lightsail：`access_key_id` + `secret_access_key`
/// - Lighthouse：`secret_id` + `secret_key`（兼容 `access_key_id` + `access_key_secret`）
/// - Bandwagon：`instances[]`，或旧版单个 `veid` + `api_key`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub provider: String,
    pub access_key_id: String,
    pub access_key_secret: String,
    pub secret_access_key: String,
    pub secret_id: String,
    pub secret_key: String,
    pub region: String,
    pub instances: Vec<BandwagonInstanceConfig>,
    pub veid: String,
    pub api_key: String,
}

/// 根据配置构造 Provider
pub fn new_provider(cfg: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    match cfg.provider.as_str() {
        PROVIDER_BANDWAGON => new_bandwagon(cfg),

        PROVIDER_AWS_LIGHTSAIL => {
            if cfg.access_key_id.is_empty() || cfg.secret_access_key.is_empty() {
                return Err(ProviderError::config(
                    "aws_lightsail requires access_key_id and secret_access_key",
                ));
            }
            if cfg.region.is_empty() {
                return multi_region(PROVIDER_AWS_LIGHTSAIL, |region| {
                    LightsailProvider::new(&cfg.access_key_id, &cfg.secret_access_key, region)
                        .map(|p| Arc::new(p) as Arc<dyn Provider>)
                });
            }
            Ok(Arc::new(LightsailProvider::new(
                &cfg.access_key_id,
                &cfg.secret_access_key,
                &cfg.region,
            )?))
        }

        tag @ (PROVIDER_ALIYUN_SWAS | PROVIDER_ALIBABA_SWAS) => {
            let tag = if tag == PROVIDER_ALIYUN_SWAS {
                PROVIDER_ALIYUN_SWAS
            } else {
                PROVIDER_ALIBABA_SWAS
            };
            if cfg.access_key_id.is_empty() || cfg.access_key_secret.is_empty() {
                return Err(ProviderError::config(format!(
                    "{tag} requires access_key_id and access_key_secret"
                )));
            }
            if cfg.region.is_empty() {
                return multi_region(tag, |region| {
                    SwasProvider::new(tag, &cfg.access_key_id, &cfg.access_key_secret, region)
                        .map(|p| Arc::new(p) as Arc<dyn Provider>)
                });
            }
            Ok(Arc::new(SwasProvider::new(
                tag,
                &cfg.access_key_id,
                &cfg.access_key_secret,
                &cfg.region,
            )?))
        }

        tag @ (PROVIDER_TENCENT_LIGHTHOUSE | PROVIDER_QCLOUD_LIGHTHOUSE) => {
            let tag = if tag == PROVIDER_TENCENT_LIGHTHOUSE {
                PROVIDER_TENCENT_LIGHTHOUSE
            } else {
                PROVIDER_QCLOUD_LIGHTHOUSE
            };
            let (secret_id, secret_key) = lighthouse_credentials(cfg);
            if secret_id.is_empty() || secret_key.is_empty() {
                return Err(ProviderError::config(format!(
                    "{tag} requires secret_id and secret_key (or access_key_id and access_key_secret)"
                )));
            }
            if cfg.region.is_empty() {
                return multi_region(tag, |region| {
                    LighthouseProvider::new(tag, secret_id, secret_key, region)
                        .map(|p| Arc::new(p) as Arc<dyn Provider>)
                });
            }
            Ok(Arc::new(LighthouseProvider::new(
                tag,
                secret_id,
                secret_key,
                &cfg.region,
            )?))
        }

        PROVIDER_SSH_STANDALONE => Err(ProviderError::config(
            "ssh_standalone provider requires SshStandaloneProvider::new(account, pool, executor)",
        )),

        other => Err(ProviderError::config(format!("unknown provider: {other}"))),
    }
}

fn lighthouse_credentials(cfg: &ProviderConfig) -> (&str, &str) {
    if !cfg.secret_id.is_empty() || !cfg.secret_key.is_empty() {
        (&cfg.secret_id, &cfg.secret_key)
    } else {
        (&cfg.access_key_id, &cfg.access_key_secret)
    }
}

/// 为厂商的每个已知区域构造子驱动
///
/// 单个区域构造失败只记录警告，全部失败才返回错误。
fn multi_region<F>(tag: &'static str, build: F) -> Result<Arc<dyn Provider>>
where
    F: Fn(&str) -> Result<Arc<dyn Provider>>,
{
    let codes = RegionRegistry::global().provider_region_codes(tag);
    let mut children: Vec<RegionalProvider> = Vec::with_capacity(codes.len());
    for code in codes {
        match build(code) {
            Ok(p) => children.push((code.to_string(), p)),
            Err(e) => warn!("[{}] Failed to create provider for region {}: {}", tag, code, e),
        }
    }

    info!("🌐 {} multi-region provider with {} regions", tag, children.len());
    Ok(Arc::new(MultiRegionProvider::new(tag, children)?))
}

/// 优先使用 `instances[]`，否则回退到单个 veid / api_key
fn new_bandwagon(cfg: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    if !cfg.instances.is_empty() {
        return Ok(Arc::new(MultiBandwagonProvider::new(&cfg.instances)?));
    }
    if !cfg.veid.is_empty() && !cfg.api_key.is_empty() {
        return Ok(Arc::new(BandwagonProvider::new(&cfg.veid, &cfg.api_key)?));
    }
    Err(ProviderError::config(
        "bandwagon requires either instances[] or veid+api_key",
    ))
}
