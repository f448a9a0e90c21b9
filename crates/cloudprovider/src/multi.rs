//! 多区域组合驱动
//!
//! 每个区域持有一个子驱动：列表类操作并发扇出，
//! 按实例 id 的操作依次定位，创建与目录查询按区域直达。

use crate::error::{ProviderError, Result};
use crate::provider::Provider;
use crate::region::RegionRegistry;
use crate::types::{
    ChangeIpOptions, CreateInstanceOptions, ImageInfo, InstanceStatus, OperationResult, PlanInfo,
    RegionInfo,
};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// 区域代码与子驱动
pub type RegionalProvider = (String, Arc<dyn Provider>);

pub struct MultiRegionProvider {
    tag: String,
    children: Vec<RegionalProvider>,
    registry: &'static RegionRegistry,
}

impl MultiRegionProvider {
    /// 至少需要一个子驱动
    pub fn new(tag: impl Into<String>, children: Vec<RegionalProvider>) -> Result<Self> {
        if children.is_empty() {
            return Err(ProviderError::config("failed to create any regional providers"));
        }
        Ok(Self {
            tag: tag.into(),
            children,
            registry: RegionRegistry::global(),
        })
    }

    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|(region, _)| region.as_str())
    }

    /// 先按厂商代码精确匹配，再按统一 slug 映射
    pub fn provider_for(&self, region: &str) -> Option<&Arc<dyn Provider>> {
        if region.is_empty() {
            return None;
        }
        let by_code = |code: &str| {
            self.children
                .iter()
                .find(|(r, _)| r == code)
                .map(|(_, p)| p)
        };

        by_code(region).or_else(|| {
            self.registry
                .provider_region(region, &self.tag)
                .and_then(by_code)
        })
    }

    /// 依次在各区域查找实例，返回第一个找到它的子驱动
    async fn locate(&self, instance_id: &str) -> Result<(&Arc<dyn Provider>, InstanceStatus)> {
        for (region, provider) in &self.children {
            match provider.get_instance_status(instance_id).await {
                Ok(status) => return Ok((provider, status)),
                Err(e) if e.is_not_found() => {
                    debug!("{} not in region {}", instance_id, region);
                }
                Err(e) => warn!(
                    "[{}] Failed to query {} in region {}: {}",
                    self.tag, instance_id, region, e
                ),
            }
        }
        Err(ProviderError::instance_not_found(instance_id))
    }

    /// 目录类查询：能解析区域则直达，否则任取一个子驱动
    fn catalog_provider(&self, region: &str) -> &Arc<dyn Provider> {
        match self.provider_for(region) {
            Some(p) => p,
            // new() 保证非空
            None => &self.children[0].1,
        }
    }
}

#[async_trait]
impl Provider for MultiRegionProvider {
    fn name(&self) -> &str {
        &self.tag
    }

    async fn get_instance_status(&self, instance_id: &str) -> Result<InstanceStatus> {
        self.locate(instance_id).await.map(|(_, status)| status)
    }

    async fn list_instances(&self) -> Result<Vec<InstanceStatus>> {
        let results = join_all(self.children.iter().map(|(region, provider)| async move {
            (region, provider.list_instances().await)
        }))
        .await;

        let mut all = Vec::new();
        let mut succeeded = 0;
        for (region, result) in results {
            match result {
                Ok(statuses) => {
                    succeeded += 1;
                    all.extend(statuses);
                }
                Err(e) => {
                    warn!(
                        "[{}] Failed to list instances in region {}: {}",
                        self.tag, region, e
                    );
                }
            }
        }

        if succeeded == 0 {
            return Err(ProviderError::config("no regional providers"));
        }
        Ok(all)
    }

    async fn change_ip(&self, instance_id: &str, opts: &ChangeIpOptions) -> Result<OperationResult> {
        let (provider, _) = self.locate(instance_id).await?;
        provider.change_ip(instance_id, opts).await
    }

    async fn create_instance(&self, opts: &CreateInstanceOptions) -> Result<OperationResult> {
        let provider = self
            .provider_for(&opts.region)
            .ok_or_else(|| ProviderError::config(format!("unknown region: {}", opts.region)))?;
        provider.create_instance(opts).await
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<OperationResult> {
        let (provider, _) = self.locate(instance_id).await?;
        provider.delete_instance(instance_id).await
    }

    /// 各区域返回同一份区域目录，取第一个子驱动
    async fn list_regions(&self) -> Result<Vec<RegionInfo>> {
        self.children[0].1.list_regions().await
    }

    async fn list_plans(&self, region: &str) -> Result<Vec<PlanInfo>> {
        self.catalog_provider(region).list_plans(region).await
    }

    async fn list_images(&self, region: &str) -> Result<Vec<ImageInfo>> {
        self.catalog_provider(region).list_images(region).await
    }
}
