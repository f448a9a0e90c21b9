//! 配置模板渲染
//!
//! 由类型化的数据记录渲染出各服务进程读取的配置文件：
//! - `k2v5-config.yaml`：前端代理（监听、证书、远程认证、本地路由）
//! - `config.yaml`：旧版 k2v4 服务配置
//! - `ocserv.conf` / `radius-client.conf` / `radius-servers`：OC 接入服务
//!
//! 模板以严格模式渲染：引用了上下文中不存在的变量时报错，
//! 必填字段为空同样报错，不会输出空白值。

use crate::cert::{SERVER_CERT_FILE, SERVER_KEY_FILE};
use crate::error::{Result, SidecarError};
use crate::fs::{ensure_dir, write_with_mode};
use k2_common::SidecarConfig;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tera::{Context, Tera, Value};
use tracing::info;

pub const K2V5_CONFIG_FILE: &str = "k2v5-config.yaml";
pub const LEGACY_CONFIG_FILE: &str = "config.yaml";
pub const OCSERV_CONF_FILE: &str = "ocserv.conf";
pub const RADIUS_CLIENT_CONF_FILE: &str = "radius-client.conf";
pub const RADIUS_SERVERS_FILE: &str = "radius-servers";
pub const CA_CERT_FILE: &str = "root-ca-cert.pem";

pub const DEFAULT_K2OC_PORT: &str = "10001";
pub const DEFAULT_LOG_LEVEL: &str = "info";

const CONFIG_MODE: u32 = 0o644;

const K2V5_CONFIG_TEMPLATE: &str = r#"listen: ":443"
tls:
  cert: {{ cert_path | yaml_str }}
  key: {{ key_path | yaml_str }}
{%- set remote_url = center_url ~ "/slave/device-check-auth" %}
auth:
  remote_url: {{ remote_url | yaml_str }}
  cache_ttl: 5m
local_routes:
{%- for route in local_routes %}
  {{ route.domain | yaml_str }}: {{ route.target | yaml_str }}
{%- endfor %}
log:
  level: {{ log_level | yaml_str }}
"#;

const LEGACY_CONFIG_TEMPLATE: &str = r#"k2_center:
  enabled: true
  base_url: {{ center_url | yaml_str }}
  timeout: "10s"
  secret: {{ center_secret | yaml_str }}
tunnel:
  enabled: true
  domain: {{ domain | yaml_str }}
  port: 443
config_dir: {{ config_dir | yaml_str }}
"#;

const OCSERV_CONF_TEMPLATE: &str = r#"auth = "radius [config={{ ocserv_config_dir }}/radius-client.conf,groupconfig=true]"

default-domain={{ tunnel_domain }}

tcp-port = {{ listen_port }}
udp-port = {{ listen_port }}

cert-user-oid = 0.9.2342.19200300.100.1.1

run-as-user = nobody
run-as-group = daemon

socket-file = /var/run/ocserv-socket

server-cert = {{ ocserv_config_dir }}/server-cert.pem
server-key = {{ ocserv_config_dir }}/server-key.pem
ca-cert = {{ ocserv_config_dir }}/root-ca-cert.pem

isolate-workers = false
max-clients = 2000
max-same-clients = 1

server-stats-reset-time = 604800
keepalive = 32400
dpd = 90
mobile-dpd = 1800
switch-to-tcp-timeout = 25
try-mtu-discovery = true

compression = true
tls-priorities = "NORMAL:%SERVER_PRECEDENCE:%COMPAT:-VERS-SSL3.0"
auth-timeout = 240
idle-timeout = 1200
mobile-idle-timeout = 2400
min-reauth-time = 1
max-ban-score = 50
ban-reset-time = 300
cookie-timeout = 172800
persistent-cookies = true
deny-roaming = false
rekey-time = 172800
rekey-method = ssl

use-occtl = true
pid-file = /var/run/ocserv.pid
net-priority = 5
device = vpns
predictable-ips = true
ipv4-network = 10.3.0.0
ipv4-netmask = 255.255.0.0
tunnel-all-dns = true
dns = 8.8.8.8
dns = 8.8.4.4

ping-leases = false
mtu = 1420

cisco-client-compat = true
stats-report-time = 60

no-route = 192.168.0.0/255.255.0.0
no-route = 172.16.0.0/255.240.0.0
no-route = 10.0.0.0/255.0.0.0
route = default
"#;

const RADIUS_CLIENT_CONF_TEMPLATE: &str = "nas-identifier {{ tunnel_domain }}:ocserv-slave

authserver \t{{ radius_server }}:1812

servers\t\t{{ ocserv_config_dir }}/radius-servers

dictionary \t/usr/share/radcli/dictionary

default_realm
radius_timeout\t10
radius_retries\t3
bindaddr\t*
";

const RADIUS_SERVERS_TEMPLATE: &str = "{{ radius_server }} {{ radius_secret }}\n";

/// 模板数据记录
pub trait TemplateData: Serialize {
    /// 渲染前必须非空的字段（字段名，值）
    fn required_fields(&self) -> Vec<(&'static str, &str)>;
}

/// 渲染模板
pub fn render<T: TemplateData>(name: &str, template: &str, data: &T) -> Result<String> {
    if let Some((field, _)) = data
        .required_fields()
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
    {
        return Err(SidecarError::template(name, field));
    }

    let context = Context::from_serialize(data)
        .map_err(|e| SidecarError::template(name, format!("invalid data: {e}")))?;

    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    tera.register_filter("yaml_str", yaml_str);
    tera.add_raw_template(name, template)
        .map_err(|e| SidecarError::template(name, missing_variable(&e)))?;
    tera.render(name, &context)
        .map_err(|e| SidecarError::template(name, missing_variable(&e)))
}

/// 输出 YAML 双引号标量，转义引号、反斜杠与控制字符
///
/// JSON 字符串字面量同时是合法的 YAML 双引号标量。
fn yaml_str(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    serde_json::to_string(&raw)
        .map(Value::String)
        .map_err(|e| tera::Error::msg(format!("yaml_str: {e}")))
}

/// 渲染模板并写入文件（0644）
pub fn render_to_file<T: TemplateData>(
    name: &str,
    template: &str,
    data: &T,
    output: &Path,
) -> Result<()> {
    let content = render(name, template, data)?;
    if let Some(parent) = output.parent() {
        ensure_dir(parent)?;
    }
    write_with_mode(output, content.as_bytes(), CONFIG_MODE)?;
    info!("[Template] Generated config file: {}", output.display());
    Ok(())
}

/// 从 tera 错误链中取出未定义的变量名，取不到时返回完整错误
fn missing_variable(err: &tera::Error) -> String {
    let mut source: Option<&dyn std::error::Error> = Some(err);
    while let Some(e) = source {
        let msg = e.to_string();
        if let Some(rest) = msg.strip_prefix("Variable `")
            && let Some(end) = rest.find('`')
        {
            return rest[..end].to_string();
        }
        source = e.source();
    }

    let mut full = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        full.push_str(": ");
        full.push_str(&e.to_string());
        source = e.source();
    }
    full
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

// ========== k2v5 代理配置 ==========

/// 本地路由：SNI 域名 → 本地服务地址
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalRoute {
    pub domain: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct K2v5ConfigData {
    pub cert_path: String,
    pub key_path: String,
    pub center_url: String,
    pub local_routes: Vec<LocalRoute>,
    pub log_level: String,
}

impl K2v5ConfigData {
    /// 由配置构建；路由顺序为隧道域名、OC 域名、额外路由
    pub fn from_config(config: &SidecarConfig, k2oc_port: &str, log_level: &str) -> Self {
        let certs_dir = config.certs_dir();

        let mut local_routes = vec![LocalRoute {
            domain: config.tunnel.domain.clone(),
            target: format!("127.0.0.1:{}", config.k2v4_port),
        }];
        if !config.oc.domain.trim().is_empty() {
            local_routes.push(LocalRoute {
                domain: config.oc.domain.clone(),
                target: format!("127.0.0.1:{k2oc_port}"),
            });
        }
        for (domain, target) in &config.local_routes {
            if local_routes.iter().any(|r| &r.domain == domain) {
                continue;
            }
            local_routes.push(LocalRoute {
                domain: domain.clone(),
                target: target.clone(),
            });
        }

        Self {
            cert_path: path_str(&certs_dir.join(SERVER_CERT_FILE)),
            key_path: path_str(&certs_dir.join(SERVER_KEY_FILE)),
            center_url: config.k2_center.base_url().to_string(),
            local_routes,
            log_level: log_level.to_string(),
        }
    }

    /// 由配置构建，`K2OC_PORT` 与 `K2_LOG_LEVEL` 取自环境变量
    pub fn from_env(config: &SidecarConfig) -> Self {
        Self::from_config(
            config,
            &env_or("K2OC_PORT", DEFAULT_K2OC_PORT),
            &env_or("K2_LOG_LEVEL", DEFAULT_LOG_LEVEL),
        )
    }
}

impl TemplateData for K2v5ConfigData {
    fn required_fields(&self) -> Vec<(&'static str, &str)> {
        let mut fields = vec![
            ("cert_path", self.cert_path.as_str()),
            ("key_path", self.key_path.as_str()),
            ("center_url", self.center_url.as_str()),
            ("log_level", self.log_level.as_str()),
        ];
        for route in &self.local_routes {
            fields.push(("local_routes.domain", route.domain.as_str()));
            fields.push(("local_routes.target", route.target.as_str()));
        }
        fields
    }
}

// ========== 旧版配置 ==========

#[derive(Debug, Clone, Serialize)]
pub struct LegacyConfigData {
    pub center_url: String,
    pub center_secret: String,
    pub domain: String,
    pub config_dir: String,
}

impl LegacyConfigData {
    pub fn from_config(config: &SidecarConfig) -> Self {
        Self {
            center_url: config.k2_center.base_url().to_string(),
            center_secret: config.k2_center.secret.clone(),
            domain: config.tunnel.domain.clone(),
            config_dir: path_str(&config.config_dir),
        }
    }
}

impl TemplateData for LegacyConfigData {
    fn required_fields(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("center_url", self.center_url.as_str()),
            ("center_secret", self.center_secret.as_str()),
            ("domain", self.domain.as_str()),
            ("config_dir", self.config_dir.as_str()),
        ]
    }
}

// ========== OC 接入服务 ==========

#[derive(Debug, Clone, Serialize)]
pub struct OcservConfigData {
    pub ocserv_config_dir: String,
    pub tunnel_domain: String,
    pub listen_port: u16,
    pub radius_server: String,
    pub radius_secret: String,
}

impl OcservConfigData {
    pub fn from_config(config: &SidecarConfig) -> Self {
        Self {
            ocserv_config_dir: path_str(&config.oc.config_dir),
            tunnel_domain: config.oc.domain.clone(),
            listen_port: config.oc.listen_port,
            radius_server: config.oc.radius_server.clone(),
            radius_secret: config.oc.radius_secret.clone(),
        }
    }
}

impl TemplateData for OcservConfigData {
    fn required_fields(&self) -> Vec<(&'static str, &str)> {
        let mut fields = vec![
            ("ocserv_config_dir", self.ocserv_config_dir.as_str()),
            ("tunnel_domain", self.tunnel_domain.as_str()),
            ("radius_server", self.radius_server.as_str()),
            ("radius_secret", self.radius_secret.as_str()),
        ];
        if self.listen_port == 0 {
            fields.push(("listen_port", ""));
        }
        fields
    }
}

// ========== 生成入口 ==========

/// 生成 `k2v5-config.yaml`
pub fn generate_k2v5_config(config: &SidecarConfig) -> Result<PathBuf> {
    let output = config.config_dir.join(K2V5_CONFIG_FILE);
    let data = K2v5ConfigData::from_env(config);
    render_to_file(K2V5_CONFIG_FILE, K2V5_CONFIG_TEMPLATE, &data, &output)?;
    Ok(output)
}

/// 生成旧版 `config.yaml`
pub fn generate_legacy_config(config: &SidecarConfig) -> Result<PathBuf> {
    let output = config.config_dir.join(LEGACY_CONFIG_FILE);
    let data = LegacyConfigData::from_config(config);
    render_to_file(LEGACY_CONFIG_FILE, LEGACY_CONFIG_TEMPLATE, &data, &output)?;
    Ok(output)
}

/// 生成 OC 接入服务的三个配置文件
pub fn generate_ocserv_configs(config: &SidecarConfig) -> Result<Vec<PathBuf>> {
    let dir = config.oc.config_dir.as_path();
    ensure_dir(dir).map_err(|e| {
        SidecarError::config(format!("failed to create ocserv config dir: {e}"))
    })?;

    let data = OcservConfigData::from_config(config);
    let mut written = Vec::with_capacity(3);
    for (name, template) in [
        (OCSERV_CONF_FILE, OCSERV_CONF_TEMPLATE),
        (RADIUS_CLIENT_CONF_FILE, RADIUS_CLIENT_CONF_TEMPLATE),
        (RADIUS_SERVERS_FILE, RADIUS_SERVERS_TEMPLATE),
    ] {
        let output = dir.join(name);
        render_to_file(name, template, &data, &output)?;
        written.push(output);
    }

    info!("[Template] Generated ocserv configuration files in {}", dir.display());
    Ok(written)
}

/// 按配置生成全部需要的文件
///
/// - 隧道启用且域名非空：`k2v5-config.yaml`，接入中心时再加旧版 `config.yaml`
/// - OC 接入服务启用：ocserv 三件套
pub fn generate_configs(config: &SidecarConfig) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    if config.tunnel.enabled && !config.tunnel.domain.trim().is_empty() {
        written.push(generate_k2v5_config(config)?);
        if config.k2_center.enabled {
            written.push(generate_legacy_config(config)?);
        }
    }

    if config.oc.is_active() {
        written.extend(generate_ocserv_configs(config)?);
    }

    Ok(written)
}

/// 下载中心 CA 证书（公开接口，无需认证）
pub async fn download_ca_cert(
    client: &reqwest::Client,
    center_url: &str,
    output: &Path,
) -> Result<()> {
    let url = format!("{}/api/ca", center_url.trim_end_matches('/'));
    let resp = client.get(&url).send().await?;

    let status = resp.status().as_u16();
    let body = resp.text().await?;
    if status != 200 {
        return Err(SidecarError::Http { status, body });
    }

    if !body.starts_with("-----BEGIN") {
        let preview: String = body.chars().take(100).collect();
        return Err(SidecarError::certificate(format!(
            "invalid CA cert response: expected PEM certificate, got: {preview}"
        )));
    }

    if let Some(parent) = output.parent() {
        ensure_dir(parent)?;
    }
    write_with_mode(output, body.as_bytes(), CONFIG_MODE)?;
    info!("[Template] Downloaded CA certificate to: {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config(dir: &Path) -> SidecarConfig {
        let mut config = SidecarConfig::default();
        config.config_dir = dir.to_path_buf();
        config.k2v4_port = "8443".to_string();
        config.k2_center.base_url = "https://center.example.com/".to_string();
        config.k2_center.secret = "s3cret".to_string();
        config.tunnel.domain = "1-2-3-4.sslip.io".to_string();
        config
    }

    #[test]
    fn test_k2v5_routes_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample_config(dir.path());
        config.oc.domain = "oc.example.com".to_string();
        config
            .local_routes
            .insert("extra.example.com".to_string(), "127.0.0.1:9000".to_string());
        config
            .local_routes
            .insert("1-2-3-4.sslip.io".to_string(), "127.0.0.1:1".to_string());

        let data = K2v5ConfigData::from_config(&config, "10001", "debug");
        let out = render(K2V5_CONFIG_FILE, K2V5_CONFIG_TEMPLATE, &data).unwrap();

        let expected_cert = format!("  cert: \"{}/certs/server-cert.pem\"", dir.path().display());
        assert!(out.starts_with("listen: \":443\"\n"));
        assert!(out.contains(&expected_cert));
        assert!(out.contains(
            "  remote_url: \"https://center.example.com/slave/device-check-auth\"\n"
        ));
        assert!(out.contains(
            "local_routes:\n  \"1-2-3-4.sslip.io\": \"127.0.0.1:8443\"\n  \"oc.example.com\": \"127.0.0.1:10001\"\n  \"extra.example.com\": \"127.0.0.1:9000\"\nlog:\n  level: \"debug\"\n"
        ));

        let parsed: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(parsed["auth"]["cache_ttl"].as_str(), Some("5m"));
        assert_eq!(parsed["local_routes"].as_mapping().unwrap().len(), 3);
    }

    #[test]
    fn test_k2v5_without_oc() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config(dir.path());
        let data = K2v5ConfigData::from_config(&config, "10001", "info");
        let out = render(K2V5_CONFIG_FILE, K2V5_CONFIG_TEMPLATE, &data).unwrap();
        assert!(!out.contains("10001"));
    }

    #[test]
    fn test_empty_required_field_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample_config(dir.path());
        config.tunnel.domain.clear();

        let data = LegacyConfigData::from_config(&config);
        let err = render(LEGACY_CONFIG_FILE, LEGACY_CONFIG_TEMPLATE, &data).unwrap_err();
        match err {
            SidecarError::Template { template, field } => {
                assert_eq!(template, "config.yaml");
                assert_eq!(field, "domain");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_undefined_variable_rejected() {
        let data = LegacyConfigData::from_config(&sample_config(Path::new("/etc/kaitu")));
        let err = render("broken", "value: {{ missing_value }}\n", &data).unwrap_err();
        match err {
            SidecarError::Template { template, field } => {
                assert_eq!(template, "broken");
                assert!(field.contains("missing_value"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_legacy_config() {
        let data = LegacyConfigData::from_config(&sample_config(Path::new("/etc/kaitu")));
        let out = render(LEGACY_CONFIG_FILE, LEGACY_CONFIG_TEMPLATE, &data).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(parsed["k2_center"]["base_url"].as_str(), Some("https://center.example.com"));
        assert_eq!(parsed["k2_center"]["timeout"].as_str(), Some("10s"));
        assert_eq!(parsed["k2_center"]["secret"].as_str(), Some("s3cret"));
        assert_eq!(parsed["tunnel"]["port"].as_u64(), Some(443));
        assert_eq!(parsed["config_dir"].as_str(), Some("/etc/kaitu"));
    }

    #[test]
    fn test_ocserv_triad() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample_config(dir.path());
        config.oc.enabled = true;
        config.oc.domain = "oc.example.com".to_string();
        config.oc.listen_port = 4443;
        config.oc.config_dir = dir.path().join("ocserv");

        let written = generate_ocserv_configs(&config).unwrap();
        assert_eq!(written.len(), 3);

        let oc_dir = dir.path().join("ocserv");
        let conf = std::fs::read_to_string(oc_dir.join(OCSERV_CONF_FILE)).unwrap();
        assert!(conf.contains("tcp-port = 4443\nudp-port = 4443\n"));
        assert!(conf.contains("default-domain=oc.example.com\n"));
        assert!(conf.contains("%SERVER_PRECEDENCE:%COMPAT"));
        assert!(conf.contains(&format!("ca-cert = {}/root-ca-cert.pem", oc_dir.display())));

        let client = std::fs::read_to_string(oc_dir.join(RADIUS_CLIENT_CONF_FILE)).unwrap();
        assert!(client.starts_with("nas-identifier oc.example.com:ocserv-slave\n"));
        assert!(client.contains("authserver \tk2-slave-sidecar:1812\n"));
        assert!(client.contains("radius_retries\t3\n"));

        let servers = std::fs::read_to_string(oc_dir.join(RADIUS_SERVERS_FILE)).unwrap();
        assert_eq!(servers, "k2-slave-sidecar localhost-radius\n");
    }

    #[test]
    fn test_generate_configs_selection() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample_config(dir.path());
        config.k2_center.enabled = false;

        let written = generate_configs(&config).unwrap();
        assert_eq!(written, vec![dir.path().join(K2V5_CONFIG_FILE)]);

        config.k2_center.enabled = true;
        let written = generate_configs(&config).unwrap();
        assert_eq!(written.len(), 2);
        assert!(dir.path().join(LEGACY_CONFIG_FILE).is_file());
    }

    #[test]
    fn test_yaml_values_are_escaped() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample_config(dir.path());
        config.k2_center.secret = r#"pa"ss\word: #1"#.to_string();
        config.tunnel.domain = "odd\"domain.example".to_string();
        config
            .local_routes
            .insert("quote\"d.example".to_string(), "127.0.0.1:9\\0".to_string());

        let out = render(
            LEGACY_CONFIG_FILE,
            LEGACY_CONFIG_TEMPLATE,
            &LegacyConfigData::from_config(&config),
        )
        .unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(parsed["k2_center"]["secret"].as_str(), Some(config.k2_center.secret.as_str()));
        assert_eq!(parsed["tunnel"]["domain"].as_str(), Some("odd\"domain.example"));

        let data = K2v5ConfigData::from_config(&config, "10001", "info");
        let out = render(K2V5_CONFIG_FILE, K2V5_CONFIG_TEMPLATE, &data).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(
            parsed["local_routes"]["odd\"domain.example"].as_str(),
            Some("127.0.0.1:8443")
        );
        assert_eq!(
            parsed["local_routes"]["quote\"d.example"].as_str(),
            Some("127.0.0.1:9\\0")
        );
    }
}
