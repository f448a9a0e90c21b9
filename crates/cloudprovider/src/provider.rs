//! Provider 能力集合

use crate::error::Result;
use crate::types::{
    ChangeIpOptions, CreateInstanceOptions, ImageInfo, InstanceStatus, OperationResult, PlanInfo,
    RegionInfo,
};
use async_trait::async_trait;

/// 云厂商统一接口
///
/// 每个厂商驱动、多区域组合以及 SSH 独立主机驱动都实现此 trait。
/// 不支持的操作返回 [`crate::ProviderError::Unsupported`]。
#[async_trait]
pub trait Provider: Send + Sync {
    /// 稳定的厂商标签，例如 "aws_lightsail"
    fn name(&self) -> &str;

    /// 查询实例最新状态，流量获取失败时置零并记录警告
    async fn get_instance_status(&self, instance_id: &str) -> Result<InstanceStatus>;

    /// 列出驱动管理范围内的全部实例
    ///
    /// 单个作用域或单个实例的失败只记录日志，不影响整体结果。
    async fn list_instances(&self) -> Result<Vec<InstanceStatus>>;

    async fn change_ip(&self, instance_id: &str, opts: &ChangeIpOptions)
    -> Result<OperationResult>;

    /// 创建实例，结果 data 中携带实例 id
    async fn create_instance(&self, opts: &CreateInstanceOptions) -> Result<OperationResult>;

    async fn delete_instance(&self, instance_id: &str) -> Result<OperationResult>;

    async fn list_regions(&self) -> Result<Vec<RegionInfo>>;

    async fn list_plans(&self, region: &str) -> Result<Vec<PlanInfo>>;

    /// 只返回系统 / 纯 OS 镜像
    async fn list_images(&self, region: &str) -> Result<Vec<ImageInfo>>;
}
