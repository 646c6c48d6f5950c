//! 注册表到定位器的桥接
//!
//! 外部注册表中出现的服务以常量描述符的形式进入定位器，服务消失时再把
//! 同一个描述符解绑。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::bridge::locator::{ActiveDescriptor, ServiceLocator};
use crate::bridge::registry::{
    ServiceReference, ServiceRegistry, ServiceTrackerCustomizer, TrackedObject,
};

/// 定位器桥接回调
#[derive(Debug, Clone)]
pub struct LocatorBridge {
    locator: Arc<ServiceLocator>,
}

impl LocatorBridge {
    /// 为定位器创建桥接
    pub fn new(locator: Arc<ServiceLocator>) -> Self {
        Self { locator }
    }

    /// 目标定位器
    pub fn locator(&self) -> &Arc<ServiceLocator> {
        &self.locator
    }
}

#[async_trait]
impl ServiceTrackerCustomizer for LocatorBridge {
    async fn adding_service(
        &self,
        registry: &dyn ServiceRegistry,
        reference: &ServiceReference,
    ) -> Option<TrackedObject> {
        let Some(object) = registry.get_service(reference).await else {
            info!(
                service_id = reference.id(),
                locator = %self.locator.name(),
                "服务对象不可用，跳过"
            );
            return None;
        };

        let mut descriptor = ActiveDescriptor::constant(object);
        if reference.contracts().is_empty() {
            let type_name = descriptor.instance().type_name();
            descriptor.add_contract(type_name);
        } else {
            for contract in reference.contracts() {
                descriptor.add_contract(contract.clone());
            }
        }
        if let Some(name) = reference.display_name() {
            descriptor.set_name(name);
        }

        let mut config = self.locator.create_dynamic_configuration();
        let descriptor = config.add_active_descriptor(descriptor);
        if let Err(e) = config.commit() {
            error!(
                service_id = reference.id(),
                locator = %self.locator.name(),
                error = %e,
                error_code = e.error_code(),
                "服务加入定位器失败"
            );
            return None;
        }

        debug!(
            service_id = reference.id(),
            descriptor_id = descriptor.id(),
            contracts = ?descriptor.contracts(),
            "服务已加入定位器"
        );
        Some(descriptor)
    }

    async fn removed_service(
        &self,
        _registry: &dyn ServiceRegistry,
        reference: &ServiceReference,
        tracked: TrackedObject,
    ) {
        let Ok(added) = tracked.downcast::<ActiveDescriptor>() else {
            warn!(service_id = reference.id(), "跟踪对象不是描述符，忽略");
            return;
        };

        let mut config = self.locator.create_dynamic_configuration();
        let target = added.clone();
        config.add_unbind_filter(move |d| {
            d.id() == target.id() && d.instance().same_instance(target.instance())
        });

        match config.commit() {
            Ok(summary) => debug!(
                service_id = reference.id(),
                descriptor_id = added.id(),
                removed = summary.removed,
                "服务已移出定位器"
            ),
            Err(e) => error!(
                service_id = reference.id(),
                locator = %self.locator.name(),
                error = %e,
                error_code = e.error_code(),
                "服务移出定位器失败"
            ),
        }
    }
}
