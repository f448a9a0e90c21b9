//! 通用工具函数

/// 生成 URL 安全的 slug
///
/// 空格替换为 `-`，其余字符转为小写；对已是 slug 的输入幂等。
pub fn slugify(s: &str) -> String {
    s.replace(' ', "-").to_lowercase()
}

/// 为没有配置域名的节点生成 sslip.io 域名
///
/// `1.2.3.4` → `1-2-3-4.sslip.io`
pub fn sslip_domain(ipv4: &str) -> String {
    format!("{}.sslip.io", ipv4.replace('.', "-"))
}

/// 由国家代码和位置生成区域 slug
///
/// 两者都存在时为 `slugify("<country>-<location>")`，否则只用国家代码。
pub fn region_slug(country: &str, location: &str) -> String {
    if !country.is_empty() && !location.is_empty() {
        slugify(&format!("{country}-{location}"))
    } else {
        slugify(country)
    }
}
