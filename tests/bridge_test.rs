//! 服务桥接集成测试
//!
//! 覆盖：
//! - 添加/移除的对称性
//! - 服务对象不可用时的容错
//! - 定位器的创建、销毁与关闭顺序

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chips_habitat::bridge::habitat::LOCATOR_NAME;
use chips_habitat::bridge::registry::{COMPONENT_NAME, SERVICE_OWNER};
use chips_habitat::bridge::{
    register_module_startup, ActiveDescriptor, HabitatManager, InProcessServiceRegistry,
    LocatorBridge, ModuleStartup, ServiceFilter, ServiceLocator, ServiceObject,
    ServiceProperties, ServiceReference, ServiceRegistration, ServiceRegistry, ServiceSource,
    ServiceTracker, ServiceTrackerCustomizer, TrackedObject,
};
use chips_habitat::{BridgeConfig, CoreError, Result};

// ============================================================================
// 测试辅助结构
// ============================================================================

/// 测试用服务
#[derive(Debug, PartialEq)]
struct Greeter {
    language: &'static str,
}

/// 记录注销与关闭顺序的注册表包装
#[derive(Clone, Default)]
struct RecordingRegistry {
    inner: InProcessServiceRegistry,
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingRegistry {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

struct RecordingRegistration {
    inner: Box<dyn ServiceRegistration>,
    label: String,
    events: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ServiceRegistration for RecordingRegistration {
    fn reference(&self) -> &ServiceReference {
        self.inner.reference()
    }

    async fn unregister(&self) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("unregister:{}", self.label));
        self.inner.unregister().await
    }
}

struct RecordingTracker {
    inner: Box<dyn ServiceTracker>,
    events: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ServiceTracker for RecordingTracker {
    async fn close(&self) {
        self.events.lock().unwrap().push("close".to_string());
        self.inner.close().await;
    }

    fn tracking_count(&self) -> usize {
        self.inner.tracking_count()
    }
}

#[async_trait]
impl ServiceRegistry for RecordingRegistry {
    async fn register_service(
        &self,
        contracts: Vec<String>,
        source: ServiceSource,
        properties: ServiceProperties,
    ) -> Result<Box<dyn ServiceRegistration>> {
        let label = properties
            .get_first(LOCATOR_NAME)
            .unwrap_or("service")
            .to_string();
        let inner = self
            .inner
            .register_service(contracts, source, properties)
            .await?;
        Ok(Box::new(RecordingRegistration {
            inner,
            label,
            events: self.events.clone(),
        }))
    }

    async fn get_service(&self, reference: &ServiceReference) -> Option<ServiceObject> {
        self.inner.get_service(reference).await
    }

    async fn open_tracker(
        &self,
        filter: ServiceFilter,
        customizer: Arc<dyn ServiceTrackerCustomizer>,
    ) -> Result<Box<dyn ServiceTracker>> {
        let inner = self.inner.open_tracker(filter, customizer).await?;
        Ok(Box::new(RecordingTracker {
            inner,
            events: self.events.clone(),
        }))
    }

    async fn references(&self, filter: &ServiceFilter) -> Vec<ServiceReference> {
        self.inner.references(filter).await
    }
}

/// 停止时记录自身名字的启动服务
struct NamedStartup {
    name: &'static str,
    events: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl ModuleStartup for NamedStartup {
    fn stop(&self) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("stop:{}", self.name));
        if self.fail {
            return Err(anyhow::anyhow!("stop failed").into());
        }
        Ok(())
    }
}

#[test]
fn test_startup_hook_error_is_wrapped() {
    let startup = NamedStartup {
        name: "broken",
        events: Arc::new(Mutex::new(Vec::new())),
        fail: true,
    };
    assert!(matches!(startup.stop(), Err(CoreError::Other(_))));
}

async fn bridged_locator(
    registry: &InProcessServiceRegistry,
) -> (Arc<ServiceLocator>, Box<dyn ServiceTracker>) {
    let locator = Arc::new(ServiceLocator::new("default"));
    let tracker = registry
        .open_tracker(
            ServiceFilter::all(),
            Arc::new(LocatorBridge::new(locator.clone())),
        )
        .await
        .unwrap();
    (locator, tracker)
}

// ============================================================================
// 对称性
// ============================================================================

#[tokio::test]
async fn test_added_then_removed_is_symmetric() {
    let registry = InProcessServiceRegistry::new();
    let (locator, tracker) = bridged_locator(&registry).await;

    let greeter = Arc::new(Greeter { language: "en" });
    let registration = registry
        .register_service(
            vec!["A".into(), "B".into()],
            ServiceSource::Object(ServiceObject::from_arc(greeter.clone())),
            ServiceProperties::new(),
        )
        .await
        .unwrap();

    let found = locator.get_service::<Greeter>("A", None).unwrap();
    assert!(Arc::ptr_eq(&found, &greeter));
    assert!(locator.get_service::<Greeter>("B", None).is_some());
    assert_eq!(tracker.tracking_count(), 1);

    registration.unregister().await.unwrap();

    assert!(locator.get_service::<Greeter>("A", None).is_none());
    assert!(locator.lookup("B").is_empty());
    assert_eq!(tracker.tracking_count(), 0);
}

#[tokio::test]
async fn test_unrelated_removal_never_matches() {
    let registry = InProcessServiceRegistry::new();
    let (locator, _tracker) = bridged_locator(&registry).await;

    // 直接提交到定位器、从未经过桥接的对象
    let mut config = locator.create_dynamic_configuration();
    config.add_active_descriptor(
        ActiveDescriptor::constant(ServiceObject::new(Greeter { language: "fr" }))
            .with_contract("A"),
    );
    config.commit().unwrap();

    let registration = registry
        .register_service(
            vec!["A".into()],
            ServiceSource::Object(ServiceObject::new(Greeter { language: "en" })),
            ServiceProperties::new(),
        )
        .await
        .unwrap();
    assert_eq!(locator.lookup("A").len(), 2);

    registration.unregister().await.unwrap();

    let remaining = locator.get_service::<Greeter>("A", None).unwrap();
    assert_eq!(remaining.language, "fr");
    assert_eq!(locator.descriptor_count(), 1);
}

#[tokio::test]
async fn test_foreign_tracked_object_removes_nothing() {
    let registry = InProcessServiceRegistry::new();
    let locator = Arc::new(ServiceLocator::new("default"));
    let bridge = LocatorBridge::new(locator.clone());

    let registration = registry
        .register_service(
            vec!["A".into()],
            ServiceSource::Object(ServiceObject::new(1u32)),
            ServiceProperties::new(),
        )
        .await
        .unwrap();
    let reference = registration.reference().clone();

    let tracked = bridge.adding_service(&registry, &reference).await.unwrap();
    assert_eq!(locator.descriptor_count(), 1);

    // 描述符 ID 不同的对象
    let stranger: TrackedObject =
        Arc::new(ActiveDescriptor::constant(ServiceObject::new(1u32)).with_contract("A"));
    bridge.removed_service(&registry, &reference, stranger).await;
    assert_eq!(locator.descriptor_count(), 1);

    // 不是描述符的对象
    bridge
        .removed_service(&registry, &reference, Arc::new("noise"))
        .await;
    assert_eq!(locator.descriptor_count(), 1);

    bridge.removed_service(&registry, &reference, tracked).await;
    assert_eq!(locator.descriptor_count(), 0);
}

#[tokio::test]
async fn test_display_name_is_carried() {
    let registry = InProcessServiceRegistry::new();
    let (locator, _tracker) = bridged_locator(&registry).await;

    registry
        .register_service(
            vec!["Greeting".into()],
            ServiceSource::Object(ServiceObject::new(Greeter { language: "en" })),
            ServiceProperties::new().with(COMPONENT_NAME, "english"),
        )
        .await
        .unwrap();

    assert!(locator
        .get_service::<Greeter>("Greeting", Some("english"))
        .is_some());
    assert!(locator.lookup_named("Greeting", "german").is_none());
}

// ============================================================================
// 容错
// ============================================================================

#[tokio::test]
async fn test_missing_object_commits_nothing() {
    let registry = InProcessServiceRegistry::new();
    let (locator, tracker) = bridged_locator(&registry).await;

    let registration = registry
        .register_service(
            vec!["A".into()],
            ServiceSource::factory(|_| None),
            ServiceProperties::new(),
        )
        .await
        .unwrap();

    assert_eq!(locator.descriptor_count(), 0);
    assert_eq!(tracker.tracking_count(), 0);

    // 未跟踪的服务注销时也不会有回调
    registration.unregister().await.unwrap();
    assert_eq!(locator.descriptor_count(), 0);
}

#[tokio::test]
async fn test_factory_object_is_bridged() {
    let registry = InProcessServiceRegistry::new();
    let (locator, _tracker) = bridged_locator(&registry).await;

    registry
        .register_service(
            vec!["A".into()],
            ServiceSource::factory(|reference| Some(ServiceObject::new(reference.id()))),
            ServiceProperties::new(),
        )
        .await
        .unwrap();

    assert!(locator.get_service::<u64>("A", None).is_some());
}

// ============================================================================
// 定位器管理
// ============================================================================

#[tokio::test]
async fn test_locator_imports_foreign_services_only() {
    let registry = InProcessServiceRegistry::new();
    let config = BridgeConfig::default();

    registry
        .register_service(
            vec!["Foreign".into()],
            ServiceSource::Object(ServiceObject::new(1u8)),
            ServiceProperties::new().with(SERVICE_OWNER, "plugin"),
        )
        .await
        .unwrap();
    registry
        .register_service(
            vec!["Own".into()],
            ServiceSource::Object(ServiceObject::new(2u8)),
            ServiceProperties::new().with(SERVICE_OWNER, config.owner.clone()),
        )
        .await
        .unwrap();

    let manager = HabitatManager::new(Arc::new(registry.clone()), config);
    let locator = manager
        .create_locator("default", ServiceProperties::new())
        .await
        .unwrap();

    assert_eq!(locator.lookup("Foreign").len(), 1);
    assert!(locator.lookup("Own").is_empty());

    // 之后出现的服务同样进入定位器
    registry
        .register_service(
            vec!["Later".into()],
            ServiceSource::Object(ServiceObject::new(3u8)),
            ServiceProperties::new(),
        )
        .await
        .unwrap();
    assert_eq!(locator.lookup("Later").len(), 1);
    assert_eq!(manager.get(locator.id()).await.unwrap().tracking_count(), 2);
}

#[tokio::test]
async fn test_destroy_unregisters_before_closing() {
    let registry = RecordingRegistry::default();
    let manager = HabitatManager::new(Arc::new(registry.clone()), BridgeConfig::default());

    let locator = manager
        .create_locator("only", ServiceProperties::new())
        .await
        .unwrap();
    assert!(manager.destroy_locator(locator.id()).await);
    assert!(!manager.destroy_locator(locator.id()).await);

    assert_eq!(registry.events(), vec!["unregister:only", "close"]);
    assert!(manager.is_empty().await);
    assert!(locator.is_shutdown());
}

#[tokio::test]
async fn test_shutdown_order_with_two_locators() {
    let registry = RecordingRegistry::default();
    let manager = HabitatManager::new(Arc::new(registry.clone()), BridgeConfig::default());

    let first = manager
        .create_locator("first", ServiceProperties::new())
        .await
        .unwrap();
    let second = manager
        .create_locator("second", ServiceProperties::new())
        .await
        .unwrap();

    register_module_startup(
        &first,
        Arc::new(NamedStartup {
            name: "first",
            events: registry.events.clone(),
            fail: false,
        }),
    )
    .unwrap();
    register_module_startup(
        &second,
        Arc::new(NamedStartup {
            name: "second",
            events: registry.events.clone(),
            fail: true,
        }),
    )
    .unwrap();

    manager.shutdown().await;

    // 逆序关闭；停止钩子失败不影响后续步骤
    assert_eq!(
        registry.events(),
        vec![
            "stop:second",
            "unregister:second",
            "close",
            "stop:first",
            "unregister:first",
            "close",
        ]
    );
    assert!(manager.is_empty().await);
    assert_eq!(registry.inner.service_count().await, 0);
    assert_eq!(registry.inner.tracker_count().await, 0);
}
