//! 动态服务桥接
//!
//! 包含：
//! - 外部服务注册表抽象与进程内实现
//! - 服务定位器与常量描述符
//! - 注册表到定位器的跟踪回调
//! - 定位器的创建、销毁与有序关闭

pub mod habitat;
pub mod locator;
pub mod registry;
pub mod tracker;

// 重导出常用类型
pub use habitat::{register_module_startup, HabitatInfo, HabitatManager, ModuleStartup};
pub use locator::{ActiveDescriptor, CommitSummary, DynamicConfiguration, ServiceLocator, ServiceObject};
pub use registry::{
    InProcessServiceRegistry, ServiceFactory, ServiceFilter, ServiceProperties, ServiceReference,
    ServiceRegistration, ServiceRegistry, ServiceSource, ServiceTracker, ServiceTrackerCustomizer,
    TrackedObject,
};
pub use tracker::LocatorBridge;
