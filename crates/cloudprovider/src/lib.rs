//! 多云 VPS 统一抽象层
//!
//! 提供以下能力：
//! 1. 统一区域注册表，slug 与各厂商区域代码双向映射
//! 2. 阿里云 SWAS、AWS Lightsail、腾讯云 Lighthouse、BandwagonHost 驱动
//! 3. 覆盖厂商全部区域的多区域组合驱动
//! 4. 协调端数据库中孤立主机的 SSH 独立驱动

pub mod bandwagon;
pub mod error;
pub mod factory;
mod http;
pub mod lighthouse;
pub mod lightsail;
pub mod multi;
pub mod provider;
pub mod region;
pub mod signer;
pub mod ssh_standalone;
pub mod swas;
pub mod types;

pub use bandwagon::{BandwagonInstanceConfig, BandwagonProvider, MigrationTiming, MultiBandwagonProvider};
pub use error::{ProviderError, Result};
pub use factory::{ProviderConfig, new_provider};
pub use lighthouse::LighthouseProvider;
pub use lightsail::LightsailProvider;
pub use multi::{MultiRegionProvider, RegionalProvider};
pub use provider::Provider;
pub use region::{Region, RegionRegistry};
pub use ssh_standalone::{HostExecutor, OpenSshExecutor, SshStandaloneProvider, TrafficConfig};
pub use swas::SwasProvider;
pub use types::*;
