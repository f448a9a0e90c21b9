//! 多区域组合驱动的定位语义

use async_trait::async_trait;
use cloudprovider::{
    ChangeIpOptions, CreateInstanceOptions, ImageInfo, InstanceStatus, MultiRegionProvider,
    OperationResult, PlanInfo, Provider, ProviderError, RegionInfo, Result,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 按预设结果响应的子驱动
struct FixedProvider {
    status: Option<InstanceStatus>,
    transport_error: bool,
    calls: AtomicUsize,
}

impl FixedProvider {
    fn missing() -> Arc<Self> {
        Arc::new(Self {
            status: None,
            transport_error: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn broken() -> Arc<Self> {
        Arc::new(Self {
            status: None,
            transport_error: true,
            calls: AtomicUsize::new(0),
        })
    }

    fn found(id: &str, region: &str) -> Arc<Self> {
        let mut status = InstanceStatus::new(id);
        status.region = region.to_string();
        status.ip_address = "203.0.113.7".to_string();
        Arc::new(Self {
            status: Some(status),
            transport_error: false,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Provider for FixedProvider {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn get_instance_status(&self, instance_id: &str) -> Result<InstanceStatus> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.transport_error {
            return Err(ProviderError::transport("connection reset"));
        }
        match &self.status {
            Some(s) if s.instance_id == instance_id => Ok(s.clone()),
            _ => Err(ProviderError::instance_not_found(instance_id)),
        }
    }

    async fn list_instances(&self) -> Result<Vec<InstanceStatus>> {
        Ok(self.status.clone().into_iter().collect())
    }

    async fn change_ip(&self, _: &str, _: &ChangeIpOptions) -> Result<OperationResult> {
        Err(ProviderError::unsupported("fixed", "ChangeIP"))
    }

    async fn create_instance(&self, _: &CreateInstanceOptions) -> Result<OperationResult> {
        Err(ProviderError::unsupported("fixed", "CreateInstance"))
    }

    async fn delete_instance(&self, _: &str) -> Result<OperationResult> {
        Ok(OperationResult::success("deleted"))
    }

    async fn list_regions(&self) -> Result<Vec<RegionInfo>> {
        Ok(vec![])
    }

    async fn list_plans(&self, _: &str) -> Result<Vec<PlanInfo>> {
        Ok(vec![])
    }

    async fn list_images(&self, _: &str) -> Result<Vec<ImageInfo>> {
        Ok(vec![])
    }
}

#[tokio::test]
async fn test_locate_in_second_region() {
    let a = FixedProvider::missing();
    let b = FixedProvider::found("i-xyz", "b");
    let multi = MultiRegionProvider::new(
        "fixed",
        vec![
            ("a".into(), a.clone() as Arc<dyn Provider>),
            ("b".into(), b.clone() as Arc<dyn Provider>),
        ],
    )
    .unwrap();

    let status = multi.get_instance_status("i-xyz").await.unwrap();
    assert_eq!(status.region, "b");
    assert_eq!(status.ip_address, "203.0.113.7");
    assert_eq!(a.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_not_found_everywhere() {
    let multi = MultiRegionProvider::new(
        "fixed",
        vec![
            ("a".into(), FixedProvider::missing() as Arc<dyn Provider>),
            ("b".into(), FixedProvider::missing() as Arc<dyn Provider>),
        ],
    )
    .unwrap();

    let err = multi.get_instance_status("i-xyz").await.unwrap_err();
    match err {
        ProviderError::NotFound { kind, id } => {
            assert_eq!(kind, "instance");
            assert_eq!(id, "i-xyz");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn test_first_child_error_does_not_leak() {
    // 第一个区域网络错误，也应返回 NotFound 而非该错误
    let multi = MultiRegionProvider::new(
        "fixed",
        vec![
            ("a".into(), FixedProvider::broken() as Arc<dyn Provider>),
            ("b".into(), FixedProvider::missing() as Arc<dyn Provider>),
        ],
    )
    .unwrap();

    assert!(multi.get_instance_status("i-xyz").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_unsupported_passes_through_after_locate() {
    let multi = MultiRegionProvider::new(
        "fixed",
        vec![("b".into(), FixedProvider::found("i-1", "b") as Arc<dyn Provider>)],
    )
    .unwrap();

    let err = multi
        .change_ip("i-1", &ChangeIpOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_unsupported());
    assert!(multi.delete_instance("i-1").await.unwrap().success);
}
