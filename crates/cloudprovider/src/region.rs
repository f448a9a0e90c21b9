//! 统一区域注册表
//!
//! 静态区域表在首次访问时构建两张索引：按 slug 查找，以及按
//! (厂商, 厂商区域代码) 查找。查找失败返回 `None`，由调用方回退到厂商数据。

use crate::types::{
    PROVIDER_ALIBABA_SWAS as ALIBABA, PROVIDER_ALIYUN_SWAS as ALIYUN,
    PROVIDER_AWS_LIGHTSAIL as AWS, PROVIDER_QCLOUD_LIGHTHOUSE as QCLOUD,
    PROVIDER_TENCENT_LIGHTHOUSE as TENCENT, RegionInfo,
};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// 与厂商无关的区域
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// URL 安全的唯一标识，例如 "us-virginia"
    pub slug: &'static str,
    pub name_en: &'static str,
    pub name_zh: &'static str,
    /// ISO 国家代码
    pub country: &'static str,
    /// 厂商标签 → 厂商区域代码
    pub providers: &'static [(&'static str, &'static str)],
}

impl Region {
    /// 该区域在指定厂商下的区域代码
    pub fn provider_code(&self, provider: &str) -> Option<&'static str> {
        self.providers
            .iter()
            .find(|(p, _)| *p == provider)
            .map(|(_, code)| *code)
    }

    /// 转换为目录记录
    pub fn to_info(&self, provider_id: &str) -> RegionInfo {
        RegionInfo {
            slug: self.slug.to_string(),
            name_en: self.name_en.to_string(),
            name_zh: self.name_zh.to_string(),
            country: self.country.to_string(),
            provider_id: provider_id.to_string(),
            available: true,
        }
    }
}

macro_rules! region {
    ($slug:literal, $en:literal, $zh:literal, $country:literal, [$($p:expr => $code:literal),+ $(,)?]) => {
        Region {
            slug: $slug,
            name_en: $en,
            name_zh: $zh,
            country: $country,
            providers: &[$(($p, $code)),+],
        }
    };
}

/// 内置区域表
pub static ALL_REGIONS: &[Region] = &[
    // 北美
    region!("us-virginia", "US East (Virginia)", "美国东部（弗吉尼亚）", "US", [AWS => "us-east-1", ALIBABA => "us-east-1"]),
    region!("us-ohio", "US East (Ohio)", "美国东部（俄亥俄）", "US", [AWS => "us-east-2"]),
    region!("us-oregon", "US West (Oregon)", "美国西部（俄勒冈）", "US", [AWS => "us-west-2"]),
    region!("us-siliconvalley", "US West (Silicon Valley)", "美国西部（硅谷）", "US", [ALIBABA => "us-west-1", TENCENT => "na-siliconvalley"]),
    region!("ca-central", "Canada (Central)", "加拿大（中部）", "CA", [AWS => "ca-central-1"]),
    // 欧洲
    region!("eu-ireland", "Europe (Ireland)", "欧洲（爱尔兰）", "IE", [AWS => "eu-west-1"]),
    region!("eu-london", "Europe (London)", "欧洲（伦敦）", "GB", [AWS => "eu-west-2", ALIBABA => "eu-west-1"]),
    region!("eu-paris", "Europe (Paris)", "欧洲（巴黎）", "FR", [AWS => "eu-west-3"]),
    region!("eu-frankfurt", "Europe (Frankfurt)", "欧洲（法兰克福）", "DE", [AWS => "eu-central-1", ALIBABA => "eu-central-1", TENCENT => "eu-frankfurt"]),
    region!("eu-stockholm", "Europe (Stockholm)", "欧洲（斯德哥尔摩）", "SE", [AWS => "eu-north-1"]),
    // 中东
    region!("me-dubai", "Middle East (UAE)", "中东（阿联酋）", "AE", [ALIBABA => "me-east-1"]),
    region!("me-riyadh", "Middle East (Saudi Arabia)", "中东（沙特阿拉伯）", "SA", [ALIBABA => "me-central-1"]),
    // 亚太
    region!("ap-tokyo", "Asia Pacific (Tokyo)", "亚太（东京）", "JP", [AWS => "ap-northeast-1", ALIBABA => "ap-northeast-1", TENCENT => "ap-tokyo"]),
    region!("ap-seoul", "Asia Pacific (Seoul)", "亚太（首尔）", "KR", [AWS => "ap-northeast-2", ALIBABA => "ap-northeast-2", TENCENT => "ap-seoul"]),
    region!("ap-singapore", "Asia Pacific (Singapore)", "亚太（新加坡）", "SG", [AWS => "ap-southeast-1", ALIBABA => "ap-southeast-1", TENCENT => "ap-singapore"]),
    region!("ap-sydney", "Asia Pacific (Sydney)", "亚太（悉尼）", "AU", [AWS => "ap-southeast-2", ALIBABA => "ap-southeast-2"]),
    region!("ap-jakarta", "Asia Pacific (Jakarta)", "亚太（雅加达）", "ID", [AWS => "ap-southeast-3", ALIBABA => "ap-southeast-5", TENCENT => "ap-jakarta"]),
    region!("ap-mumbai", "Asia Pacific (Mumbai)", "亚太（孟买）", "IN", [AWS => "ap-south-1", ALIBABA => "ap-south-1", TENCENT => "ap-mumbai"]),
    region!("ap-bangkok", "Asia Pacific (Bangkok)", "亚太（曼谷）", "TH", [ALIBABA => "ap-southeast-7", TENCENT => "ap-bangkok"]),
    region!("ap-kualalumpur", "Asia Pacific (Kuala Lumpur)", "亚太（吉隆坡）", "MY", [ALIBABA => "ap-southeast-3"]),
    region!("ap-manila", "Asia Pacific (Manila)", "亚太（马尼拉）", "PH", [ALIBABA => "ap-southeast-6"]),
    // 港台
    region!("cn-hongkong", "Hong Kong", "香港", "HK", [AWS => "ap-east-1", ALIBABA => "cn-hongkong", ALIYUN => "cn-hongkong", TENCENT => "ap-hongkong"]),
    region!("cn-taiwan", "Taiwan (Taipei)", "台湾（台北）", "TW", [ALIBABA => "ap-northeast-3"]),
    // 中国大陆
    region!("cn-shanghai", "China (Shanghai)", "中国（上海）", "CN", [ALIYUN => "cn-shanghai", QCLOUD => "ap-shanghai"]),
    region!("cn-beijing", "China (Beijing)", "中国（北京）", "CN", [ALIYUN => "cn-beijing", QCLOUD => "ap-beijing"]),
    region!("cn-shenzhen", "China (Shenzhen)", "中国（深圳）", "CN", [ALIYUN => "cn-shenzhen"]),
    region!("cn-hangzhou", "China (Hangzhou)", "中国（杭州）", "CN", [ALIYUN => "cn-hangzhou"]),
    region!("cn-guangzhou", "China (Guangzhou)", "中国（广州）", "CN", [QCLOUD => "ap-guangzhou"]),
    region!("cn-chengdu", "China (Chengdu)", "中国（成都）", "CN", [QCLOUD => "ap-chengdu"]),
    region!("cn-nanjing", "China (Nanjing)", "中国（南京）", "CN", [QCLOUD => "ap-nanjing"]),
    // 南美
    region!("sa-saopaulo", "South America (São Paulo)", "南美（圣保罗）", "BR", [AWS => "sa-east-1"]),
];

/// 区域注册表及其查找索引
#[derive(Debug)]
pub struct RegionRegistry {
    regions: Vec<Region>,
    by_slug: HashMap<&'static str, usize>,
    by_provider: HashMap<&'static str, HashMap<&'static str, usize>>,
}

static GLOBAL: Lazy<RegionRegistry> = Lazy::new(|| RegionRegistry::new(ALL_REGIONS.to_vec()));

impl RegionRegistry {
    /// 由区域列表构建索引
    pub fn new(regions: Vec<Region>) -> Self {
        let mut by_slug = HashMap::with_capacity(regions.len());
        let mut by_provider: HashMap<&'static str, HashMap<&'static str, usize>> = HashMap::new();

        for (idx, region) in regions.iter().enumerate() {
            by_slug.insert(region.slug, idx);
            for (provider, code) in region.providers {
                by_provider.entry(*provider).or_default().insert(*code, idx);
            }
        }

        Self {
            regions,
            by_slug,
            by_provider,
        }
    }

    /// 进程级内置注册表
    pub fn global() -> &'static RegionRegistry {
        &GLOBAL
    }

    pub fn all(&self) -> &[Region] {
        &self.regions
    }

    pub fn by_slug(&self, slug: &str) -> Option<&Region> {
        self.by_slug.get(slug).map(|idx| &self.regions[*idx])
    }

    pub fn by_provider(&self, provider: &str, provider_region: &str) -> Option<&Region> {
        self.by_provider
            .get(provider)
            .and_then(|m| m.get(provider_region))
            .map(|idx| &self.regions[*idx])
    }

    /// slug → 厂商区域代码
    pub fn provider_region(&self, slug: &str, provider: &str) -> Option<&'static str> {
        self.by_slug(slug).and_then(|r| r.provider_code(provider))
    }

    /// 支持指定厂商的区域（按表顺序）
    pub fn regions_for_provider(&self, provider: &str) -> Vec<&Region> {
        self.regions
            .iter()
            .filter(|r| r.provider_code(provider).is_some())
            .collect()
    }

    /// 指定厂商的全部区域代码（按表顺序）
    pub fn provider_region_codes(&self, provider: &str) -> Vec<&'static str> {
        self.regions
            .iter()
            .filter_map(|r| r.provider_code(provider))
            .collect()
    }

    /// 把厂商区域代码翻译为目录记录
    ///
    /// 注册表不认识的代码用厂商自己的名称合成，slug 取厂商代码。
    pub fn region_info(&self, provider: &str, code: &str, vendor_name: &str) -> RegionInfo {
        match self.by_provider(provider, code) {
            Some(region) => region.to_info(code),
            None => {
                let name = if vendor_name.is_empty() {
                    code
                } else {
                    vendor_name
                };
                RegionInfo {
                    slug: code.to_string(),
                    name_en: name.to_string(),
                    name_zh: name.to_string(),
                    country: String::new(),
                    provider_id: code.to_string(),
                    available: true,
                }
            }
        }
    }
}

// 便捷函数，基于内置注册表

pub fn region_by_slug(slug: &str) -> Option<&'static Region> {
    RegionRegistry::global().by_slug(slug)
}

pub fn region_by_provider(provider: &str, provider_region: &str) -> Option<&'static Region> {
    RegionRegistry::global().by_provider(provider, provider_region)
}

pub fn provider_region(slug: &str, provider: &str) -> Option<&'static str> {
    RegionRegistry::global().provider_region(slug, provider)
}

pub fn regions_for_provider(provider: &str) -> Vec<&'static Region> {
    RegionRegistry::global().regions_for_provider(provider)
}

pub fn provider_region_codes(provider: &str) -> Vec<&'static str> {
    RegionRegistry::global().provider_region_codes(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_slug() {
        let region = region_by_slug("ap-tokyo").unwrap();
        assert_eq!(region.country, "JP");
        assert_eq!(region.provider_code(AWS), Some("ap-northeast-1"));
        assert!(region_by_slug("mars-olympus").is_none());
    }

    #[test]
    fn test_lookup_by_provider() {
        let region = region_by_provider(ALIBABA, "ap-southeast-5").unwrap();
        assert_eq!(region.slug, "ap-jakarta");
        assert!(region_by_provider(ALIBABA, "ap-southeast-99").is_none());
        assert!(region_by_provider("unknown_vendor", "us-east-1").is_none());
    }

    #[test]
    fn test_same_code_different_vendors() {
        // us-east-1 同时是 AWS 与阿里云国际的代码
        assert_eq!(region_by_provider(AWS, "us-east-1").unwrap().slug, "us-virginia");
        assert_eq!(region_by_provider(ALIBABA, "us-east-1").unwrap().slug, "us-virginia");
        // eu-west-1 在两家指向不同区域
        assert_eq!(region_by_provider(AWS, "eu-west-1").unwrap().slug, "eu-ireland");
        assert_eq!(region_by_provider(ALIBABA, "eu-west-1").unwrap().slug, "eu-london");
    }

    #[test]
    fn test_provider_region_codes() {
        let aliyun = provider_region_codes(ALIYUN);
        assert_eq!(
            aliyun,
            vec!["cn-hongkong", "cn-shanghai", "cn-beijing", "cn-shenzhen", "cn-hangzhou"]
        );
        assert!(provider_region_codes(AWS).contains(&"sa-east-1"));
        assert_eq!(regions_for_provider(QCLOUD).len(), 5);
    }

    #[test]
    fn test_region_info_synthesized() {
        let registry = RegionRegistry::global();
        let known = registry.region_info(TENCENT, "ap-tokyo", "Tokyo");
        assert_eq!(known.slug, "ap-tokyo");
        assert_eq!(known.name_zh, "亚太（东京）");

        let unknown = registry.region_info(TENCENT, "ap-moon", "Moon Base");
        assert_eq!(unknown.slug, "ap-moon");
        assert_eq!(unknown.name_en, "Moon Base");
        assert_eq!(unknown.country, "");
        assert!(unknown.available);
    }

    #[test]
    fn test_custom_registry() {
        let registry = RegionRegistry::new(vec![region!(
            "xx-test",
            "Test",
            "测试",
            "XX",
            ["mock" => "t-1"]
        )]);
        assert_eq!(registry.provider_region("xx-test", "mock"), Some("t-1"));
        assert!(registry.by_slug("ap-tokyo").is_none());
    }
}
