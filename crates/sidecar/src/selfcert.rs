//! 自签名证书
//!
//! 独立模式（不接入中心）下没有中心签发的证书，生成 ECDSA P-256 自签名证书。
//! 磁盘上已有证书且剩余有效期超过 30 天时直接复用。

use crate::cert::{SERVER_CERT_FILE, SERVER_KEY_FILE};
use crate::error::{Result, SidecarError};
use crate::types::TunnelCertificate;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType, SerialNumber,
};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use tracing::{info, warn};

/// 复用已有证书所需的最短剩余有效期
const MIN_REMAINING_SECS: i64 = 30 * 24 * 3600;

#[derive(Debug, Clone)]
pub struct SelfSignedCertConfig {
    pub common_name: String,
    pub organization: String,
    pub valid_days: u32,
    /// IP 与 DNS SAN 都为空时使用 127.0.0.1、::1 与 localhost
    pub ip_addresses: Vec<IpAddr>,
    pub dns_names: Vec<String>,
}

impl Default for SelfSignedCertConfig {
    fn default() -> Self {
        Self {
            common_name: "kaitu-slave".to_string(),
            organization: "Kaitu Self-Hosted".to_string(),
            valid_days: 3650,
            ip_addresses: Vec::new(),
            dns_names: Vec::new(),
        }
    }
}

fn cert_err(context: &str) -> impl Fn(rcgen::Error) -> SidecarError + '_ {
    move |e| SidecarError::certificate(format!("{context}: {e}"))
}

/// 生成自签名证书（PEM）
pub fn generate_self_signed_cert(config: &SelfSignedCertConfig) -> Result<TunnelCertificate> {
    let (ip_addresses, dns_names) = if config.ip_addresses.is_empty() && config.dns_names.is_empty()
    {
        (
            vec![
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(Ipv6Addr::LOCALHOST),
            ],
            vec!["localhost".to_string()],
        )
    } else {
        (config.ip_addresses.clone(), config.dns_names.clone())
    };

    let mut params =
        CertificateParams::new(dns_names).map_err(cert_err("invalid DNS name"))?;
    params
        .subject_alt_names
        .extend(ip_addresses.into_iter().map(SanType::IpAddress));

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, config.common_name.as_str());
    dn.push(DnType::OrganizationName, config.organization.as_str());
    params.distinguished_name = dn;

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(i64::from(config.valid_days));
    params.serial_number = Some(SerialNumber::from_slice(&rand::random::<[u8; 16]>()));
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    // 默认算法即 ECDSA P-256
    let key_pair = KeyPair::generate().map_err(cert_err("failed to generate private key"))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(cert_err("failed to create certificate"))?;

    info!(
        "[SelfCert] Generated self-signed certificate: CN={}, Valid={} days",
        config.common_name, config.valid_days
    );
    Ok(TunnelCertificate {
        ssl_cert: cert.pem(),
        ssl_key: key_pair.serialize_pem(),
    })
}

/// 证书是否可以继续使用：在有效期内且剩余超过 30 天
pub fn is_certificate_valid(cert_pem: &str) -> bool {
    let Ok((_, pem)) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes()) else {
        return false;
    };
    let Ok(cert) = pem.parse_x509() else {
        return false;
    };

    let now = chrono::Utc::now().timestamp();
    let validity = cert.validity();
    let not_before = validity.not_before.timestamp();
    let not_after = validity.not_after.timestamp();
    now >= not_before && now < not_after && not_after - now > MIN_REMAINING_SECS
}

/// 加载目录中的自签名证书，不存在或即将过期时重新生成并保存
pub fn get_or_create_self_signed_cert(
    dir: &Path,
    config: &SelfSignedCertConfig,
) -> Result<TunnelCertificate> {
    let cert_path = dir.join(SERVER_CERT_FILE);
    let key_path = dir.join(SERVER_KEY_FILE);

    if cert_path.is_file() && key_path.is_file() {
        match (
            std::fs::read_to_string(&cert_path),
            std::fs::read_to_string(&key_path),
        ) {
            (Ok(ssl_cert), Ok(ssl_key)) if is_certificate_valid(&ssl_cert) => {
                info!("[SelfCert] Loaded existing self-signed certificate from {}", dir.display());
                return Ok(TunnelCertificate { ssl_cert, ssl_key });
            }
            (Ok(_), Ok(_)) => info!("[SelfCert] Existing certificate expired or invalid, will regenerate"),
            (Err(e), _) | (_, Err(e)) => {
                warn!("[SelfCert] Failed to load existing certificate: {}, will regenerate", e)
            }
        }
    }

    let cert = generate_self_signed_cert(config)?;
    cert.save_to_files(dir, SERVER_CERT_FILE, SERVER_KEY_FILE)?;
    info!("[SelfCert] Self-signed certificate saved to {}", dir.display());
    Ok(cert)
}
