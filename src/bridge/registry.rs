//! 外部服务注册表
//!
//! 宿主侧事件驱动的服务注册表抽象：服务注册/注销会同步通知所有过滤条件
//! 匹配的跟踪器。[`InProcessServiceRegistry`] 是进程内实现，运行时自身和
//! 测试都使用它。

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::bridge::locator::ServiceObject;
use crate::utils::{next_sequence, CoreError, Result};

// ====== 服务属性名 ======

/// 契约列表
pub const OBJECT_CLASS: &str = "objectclass";

/// 组件名（首选显示名）
pub const COMPONENT_NAME: &str = "component.name";

/// Bean 名（备选显示名）
pub const BEAN_NAME: &str = "bean.name";

/// 注册方标识
pub const SERVICE_OWNER: &str = "service.owner";

/// 服务 ID
pub const SERVICE_ID: &str = "service.id";

/// 跟踪器为每个服务保存的关联对象
pub type TrackedObject = Arc<dyn Any + Send + Sync>;

/// 服务属性（每个键可以有多个值）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceProperties {
    values: BTreeMap<String, Vec<String>>,
}

impl ServiceProperties {
    /// 创建空属性集
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置单值属性
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, vec![value.into()]);
        self
    }

    /// 设置多值属性
    pub fn with_list<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(key, values.into_iter().map(Into::into).collect());
        self
    }

    /// 覆盖属性
    pub fn insert(&mut self, key: impl Into<String>, values: Vec<String>) {
        self.values.insert(key.into(), values);
    }

    /// 第一个值
    pub fn get_first(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    /// 全部值
    pub fn get_all(&self, key: &str) -> &[String] {
        self.values.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 是否包含键
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// 遍历
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// 合并另一个属性集（同名键覆盖）
    pub fn extend(&mut self, other: ServiceProperties) {
        self.values.extend(other.values);
    }
}

/// 服务引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceReference {
    id: u64,
    properties: ServiceProperties,
}

impl ServiceReference {
    /// 服务 ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 属性
    pub fn properties(&self) -> &ServiceProperties {
        &self.properties
    }

    /// 契约列表
    pub fn contracts(&self) -> &[String] {
        self.properties.get_all(OBJECT_CLASS)
    }

    /// 注册方
    pub fn owner(&self) -> Option<&str> {
        self.properties.get_first(SERVICE_OWNER)
    }

    /// 显示名：优先 `component.name`，其次 `bean.name`
    pub fn display_name(&self) -> Option<&str> {
        self.properties
            .get_first(COMPONENT_NAME)
            .or_else(|| self.properties.get_first(BEAN_NAME))
    }
}

/// 服务工厂：每次取服务时调用，返回 `None` 表示无法提供
pub trait ServiceFactory: Send + Sync {
    /// 为引用生成服务对象
    fn get_service(&self, reference: &ServiceReference) -> Option<ServiceObject>;
}

impl<F> ServiceFactory for F
where
    F: Fn(&ServiceReference) -> Option<ServiceObject> + Send + Sync,
{
    fn get_service(&self, reference: &ServiceReference) -> Option<ServiceObject> {
        self(reference)
    }
}

/// 服务来源
#[derive(Clone)]
pub enum ServiceSource {
    /// 固定对象
    Object(ServiceObject),
    /// 工厂
    Factory(Arc<dyn ServiceFactory>),
}

impl ServiceSource {
    /// 由工厂函数创建
    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn(&ServiceReference) -> Option<ServiceObject> + Send + Sync + 'static,
    {
        ServiceSource::Factory(Arc::new(factory))
    }
}

impl fmt::Debug for ServiceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceSource::Object(object) => f.debug_tuple("Object").field(object).finish(),
            ServiceSource::Factory(_) => f.write_str("Factory"),
        }
    }
}

/// 跟踪器过滤条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceFilter {
    contract: Option<String>,
    exclude_owner: Option<String>,
}

impl ServiceFilter {
    /// 匹配所有服务
    pub fn all() -> Self {
        Self::default()
    }

    /// 只匹配带有指定契约的服务
    pub fn for_contract(contract: impl Into<String>) -> Self {
        Self {
            contract: Some(contract.into()),
            exclude_owner: None,
        }
    }

    /// 排除某个注册方发布的服务
    pub fn excluding_owner(mut self, owner: impl Into<String>) -> Self {
        self.exclude_owner = Some(owner.into());
        self
    }

    /// 是否匹配
    pub fn matches(&self, reference: &ServiceReference) -> bool {
        if let Some(contract) = &self.contract {
            if !reference.contracts().iter().any(|c| c == contract) {
                return false;
            }
        }
        match (&self.exclude_owner, reference.owner()) {
            (Some(excluded), Some(owner)) => excluded != owner,
            _ => true,
        }
    }
}

impl fmt::Display for ServiceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let contract = self.contract.as_deref().unwrap_or("*");
        match &self.exclude_owner {
            Some(owner) => write!(
                f,
                "(&({}={})(!({}={})))",
                OBJECT_CLASS, contract, SERVICE_OWNER, owner
            ),
            None => write!(f, "({}={})", OBJECT_CLASS, contract),
        }
    }
}

// ====== 注册表接口 ======

/// 跟踪器回调
///
/// `adding_service` 返回的对象会在对应服务移除或跟踪器关闭时原样交给
/// `removed_service`；返回 `None` 表示不跟踪该服务。
#[async_trait]
pub trait ServiceTrackerCustomizer: Send + Sync {
    /// 服务出现
    async fn adding_service(
        &self,
        registry: &dyn ServiceRegistry,
        reference: &ServiceReference,
    ) -> Option<TrackedObject>;

    /// 已跟踪的服务消失
    async fn removed_service(
        &self,
        registry: &dyn ServiceRegistry,
        reference: &ServiceReference,
        tracked: TrackedObject,
    );
}

/// 服务注册句柄
#[async_trait]
pub trait ServiceRegistration: Send + Sync {
    /// 注册的服务引用
    fn reference(&self) -> &ServiceReference;

    /// 注销；重复注销返回 [`CoreError::RegistrationClosed`]
    async fn unregister(&self) -> Result<()>;
}

/// 服务跟踪器句柄
#[async_trait]
pub trait ServiceTracker: Send + Sync {
    /// 关闭跟踪器，对仍在跟踪的服务逐个回调 `removed_service`
    async fn close(&self);

    /// 正在跟踪的服务数
    fn tracking_count(&self) -> usize;
}

/// 外部服务注册表
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// 注册服务，`contracts` 写入 `objectclass` 属性
    async fn register_service(
        &self,
        contracts: Vec<String>,
        source: ServiceSource,
        properties: ServiceProperties,
    ) -> Result<Box<dyn ServiceRegistration>>;

    /// 取服务对象；服务已注销或工厂无法提供时返回 `None`
    async fn get_service(&self, reference: &ServiceReference) -> Option<ServiceObject>;

    /// 打开跟踪器；已存在的匹配服务会立即回调 `adding_service`
    async fn open_tracker(
        &self,
        filter: ServiceFilter,
        customizer: Arc<dyn ServiceTrackerCustomizer>,
    ) -> Result<Box<dyn ServiceTracker>>;

    /// 当前匹配的服务引用（按注册顺序）
    async fn references(&self, filter: &ServiceFilter) -> Vec<ServiceReference>;
}

// ====== 进程内实现 ======

struct RegisteredService {
    reference: ServiceReference,
    source: ServiceSource,
}

/// 跟踪槽位
///
/// `adding_service` 回调期间服务先占住槽位，防止同一服务被重复交付；
/// 回调返回前槽位被移除说明服务已注销或跟踪器已关闭。
enum TrackedSlot {
    Pending,
    Tracked(ServiceReference, TrackedObject),
}

struct TrackerEntry {
    id: u64,
    filter: ServiceFilter,
    customizer: Arc<dyn ServiceTrackerCustomizer>,
    /// 服务 ID -> 槽位；`closed` 只在持有该锁时修改
    tracked: Mutex<BTreeMap<u64, TrackedSlot>>,
    closed: AtomicBool,
}

impl TrackerEntry {
    fn slots(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, TrackedSlot>> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 占住槽位；已关闭或服务已在跟踪（包括正在添加）时返回 `false`
    fn claim(&self, service_id: u64) -> bool {
        let mut slots = self.slots();
        if self.closed.load(Ordering::SeqCst) || slots.contains_key(&service_id) {
            return false;
        }
        slots.insert(service_id, TrackedSlot::Pending);
        true
    }

    /// 回调没有给出关联对象，释放槽位
    fn release(&self, service_id: u64) {
        let mut slots = self.slots();
        if matches!(slots.get(&service_id), Some(TrackedSlot::Pending)) {
            slots.remove(&service_id);
        }
    }

    /// 填入关联对象；槽位已被撤销时原样交还对象
    fn complete(
        &self,
        reference: &ServiceReference,
        object: TrackedObject,
    ) -> Option<TrackedObject> {
        let mut slots = self.slots();
        match slots.get_mut(&reference.id()) {
            Some(slot) if matches!(slot, TrackedSlot::Pending) => {
                *slot = TrackedSlot::Tracked(reference.clone(), object);
                None
            }
            _ => Some(object),
        }
    }

    /// 移除槽位；正在添加的服务也会被撤销，由添加方负责回调 `removed_service`
    fn untrack(&self, service_id: u64) -> Option<(ServiceReference, TrackedObject)> {
        match self.slots().remove(&service_id) {
            Some(TrackedSlot::Tracked(reference, object)) => Some((reference, object)),
            _ => None,
        }
    }

    /// 标记关闭并取出全部已跟踪的服务
    fn close(&self) -> Option<Vec<(ServiceReference, TrackedObject)>> {
        let mut slots = self.slots();
        if self.closed.swap(true, Ordering::SeqCst) {
            return None;
        }
        let drained = std::mem::take(&mut *slots)
            .into_values()
            .filter_map(|slot| match slot {
                TrackedSlot::Tracked(reference, object) => Some((reference, object)),
                TrackedSlot::Pending => None,
            })
            .collect();
        Some(drained)
    }

    fn len(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| matches!(slot, TrackedSlot::Tracked(..)))
            .count()
    }
}

#[derive(Default)]
struct Inner {
    services: RwLock<BTreeMap<u64, RegisteredService>>,
    trackers: RwLock<Vec<Arc<TrackerEntry>>>,
}

/// 进程内服务注册表
///
/// 通知在注册/注销调用方的任务上同步执行。回调期间不持有注册表锁，
/// 回调里可以再次访问注册表。每个跟踪器对同一服务至多交付一次
/// `adding_service`，每个被跟踪的服务恰好对应一次 `removed_service`。
#[derive(Clone, Default)]
pub struct InProcessServiceRegistry {
    inner: Arc<Inner>,
}

impl InProcessServiceRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 已注册服务数
    pub async fn service_count(&self) -> usize {
        self.inner.services.read().await.len()
    }

    /// 打开的跟踪器数
    pub async fn tracker_count(&self) -> usize {
        self.inner.trackers.read().await.len()
    }

    async fn matching_trackers(&self, reference: &ServiceReference) -> Vec<Arc<TrackerEntry>> {
        self.inner
            .trackers
            .read()
            .await
            .iter()
            .filter(|t| !t.closed.load(Ordering::SeqCst) && t.filter.matches(reference))
            .cloned()
            .collect()
    }

    async fn dispatch_added(&self, reference: &ServiceReference) {
        for tracker in self.matching_trackers(reference).await {
            self.offer(&tracker, reference).await;
        }
    }

    /// 把服务交给跟踪器
    ///
    /// 注册通知与打开跟踪器时的补发可能并发交付同一服务，只有占住槽位的一方
    /// 会回调 `adding_service`。
    async fn offer(&self, tracker: &TrackerEntry, reference: &ServiceReference) {
        if !tracker.claim(reference.id()) {
            return;
        }

        let Some(object) = tracker.customizer.adding_service(self, reference).await else {
            tracker.release(reference.id());
            return;
        };

        if let Some(object) = tracker.complete(reference, object) {
            // 回调期间服务已注销或跟踪器已关闭
            tracker
                .customizer
                .removed_service(self, reference, object)
                .await;
            return;
        }

        // 回调期间服务被注销且移除通知早于槽位建立
        if !self.inner.services.read().await.contains_key(&reference.id()) {
            if let Some((reference, object)) = tracker.untrack(reference.id()) {
                tracker
                    .customizer
                    .removed_service(self, &reference, object)
                    .await;
            }
        }
    }

    async fn dispatch_removed(&self, reference: &ServiceReference) {
        let trackers = self.inner.trackers.read().await.clone();
        for tracker in trackers {
            if let Some((reference, object)) = tracker.untrack(reference.id()) {
                tracker
                    .customizer
                    .removed_service(self, &reference, object)
                    .await;
            }
        }
    }

    async fn unregister_service(&self, reference: &ServiceReference) {
        self.inner.services.write().await.remove(&reference.id());
        self.dispatch_removed(reference).await;
        debug!(service_id = reference.id(), "服务已注销");
    }

    async fn close_tracker(&self, entry: &Arc<TrackerEntry>) {
        let Some(drained) = entry.close() else {
            return;
        };
        self.inner
            .trackers
            .write()
            .await
            .retain(|t| !Arc::ptr_eq(t, entry));

        for (reference, object) in drained {
            entry.customizer.removed_service(self, &reference, object).await;
        }
        debug!(tracker_id = entry.id, "跟踪器已关闭");
    }
}

#[async_trait]
impl ServiceRegistry for InProcessServiceRegistry {
    async fn register_service(
        &self,
        contracts: Vec<String>,
        source: ServiceSource,
        properties: ServiceProperties,
    ) -> Result<Box<dyn ServiceRegistration>> {
        let id = next_sequence();
        let mut properties = properties;
        properties.insert(OBJECT_CLASS, contracts);
        properties.insert(SERVICE_ID, vec![id.to_string()]);
        let reference = ServiceReference { id, properties };

        self.inner.services.write().await.insert(
            id,
            RegisteredService {
                reference: reference.clone(),
                source,
            },
        );
        debug!(service_id = id, contracts = ?reference.contracts(), "服务已注册");

        self.dispatch_added(&reference).await;

        Ok(Box::new(InProcessRegistration {
            registry: self.clone(),
            reference,
            closed: AtomicBool::new(false),
        }))
    }

    async fn get_service(&self, reference: &ServiceReference) -> Option<ServiceObject> {
        let source = self
            .inner
            .services
            .read()
            .await
            .get(&reference.id())
            .map(|s| s.source.clone())?;

        match source {
            ServiceSource::Object(object) => Some(object),
            ServiceSource::Factory(factory) => factory.get_service(reference),
        }
    }

    async fn open_tracker(
        &self,
        filter: ServiceFilter,
        customizer: Arc<dyn ServiceTrackerCustomizer>,
    ) -> Result<Box<dyn ServiceTracker>> {
        let entry = Arc::new(TrackerEntry {
            id: next_sequence(),
            filter,
            customizer,
            tracked: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        });
        self.inner.trackers.write().await.push(entry.clone());
        info!(tracker_id = entry.id, filter = %entry.filter, "跟踪器已打开");

        for reference in self.references(&entry.filter).await {
            self.offer(&entry, &reference).await;
        }

        Ok(Box::new(InProcessTracker {
            registry: self.clone(),
            entry,
        }))
    }

    async fn references(&self, filter: &ServiceFilter) -> Vec<ServiceReference> {
        self.inner
            .services
            .read()
            .await
            .values()
            .filter(|s| filter.matches(&s.reference))
            .map(|s| s.reference.clone())
            .collect()
    }
}

impl fmt::Debug for InProcessServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessServiceRegistry").finish_non_exhaustive()
    }
}

struct InProcessRegistration {
    registry: InProcessServiceRegistry,
    reference: ServiceReference,
    closed: AtomicBool,
}

#[async_trait]
impl ServiceRegistration for InProcessRegistration {
    fn reference(&self) -> &ServiceReference {
        &self.reference
    }

    async fn unregister(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            warn!(service_id = self.reference.id(), "服务重复注销");
            return Err(CoreError::RegistrationClosed(self.reference.id()));
        }
        self.registry.unregister_service(&self.reference).await;
        Ok(())
    }
}

struct InProcessTracker {
    registry: InProcessServiceRegistry,
    entry: Arc<TrackerEntry>,
}

#[async_trait]
impl ServiceTracker for InProcessTracker {
    async fn close(&self) {
        self.registry.close_tracker(&self.entry).await;
    }

    fn tracking_count(&self) -> usize {
        self.entry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 记录回调的测试跟踪器
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ServiceTrackerCustomizer for Recorder {
        async fn adding_service(
            &self,
            registry: &dyn ServiceRegistry,
            reference: &ServiceReference,
        ) -> Option<TrackedObject> {
            let object = registry.get_service(reference).await?;
            self.events
                .lock()
                .unwrap()
                .push(format!("add:{}", reference.id()));
            Some(Arc::new(object.type_name()))
        }

        async fn removed_service(
            &self,
            _registry: &dyn ServiceRegistry,
            reference: &ServiceReference,
            _tracked: TrackedObject,
        ) {
            self.events
                .lock()
                .unwrap()
                .push(format!("remove:{}", reference.id()));
        }
    }

    /// 记录添加后停在回调里，直到测试放行
    #[derive(Default)]
    struct GatedRecorder {
        recorder: Recorder,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl ServiceTrackerCustomizer for GatedRecorder {
        async fn adding_service(
            &self,
            registry: &dyn ServiceRegistry,
            reference: &ServiceReference,
        ) -> Option<TrackedObject> {
            let object = self.recorder.adding_service(registry, reference).await;
            self.entered.notify_one();
            self.release.notified().await;
            object
        }

        async fn removed_service(
            &self,
            registry: &dyn ServiceRegistry,
            reference: &ServiceReference,
            tracked: TrackedObject,
        ) {
            self.recorder
                .removed_service(registry, reference, tracked)
                .await;
        }
    }

    fn object_source(value: u8) -> ServiceSource {
        ServiceSource::Object(ServiceObject::new(value))
    }

    #[tokio::test]
    async fn test_register_notifies_matching_tracker() {
        let registry = InProcessServiceRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let tracker = registry
            .open_tracker(ServiceFilter::for_contract("A"), recorder.clone())
            .await
            .unwrap();

        let a = registry
            .register_service(vec!["A".into()], ServiceSource::Object(ServiceObject::new(1u8)), ServiceProperties::new())
            .await
            .unwrap();
        registry
            .register_service(vec!["B".into()], ServiceSource::Object(ServiceObject::new(2u8)), ServiceProperties::new())
            .await
            .unwrap();

        assert_eq!(tracker.tracking_count(), 1);
        a.unregister().await.unwrap();
        assert_eq!(tracker.tracking_count(), 0);

        let id = a.reference().id();
        assert_eq!(recorder.events(), vec![format!("add:{id}"), format!("remove:{id}")]);
    }

    #[tokio::test]
    async fn test_unregister_twice_fails() {
        let registry = InProcessServiceRegistry::new();
        let registration = registry
            .register_service(vec!["A".into()], ServiceSource::Object(ServiceObject::new(())), ServiceProperties::new())
            .await
            .unwrap();

        registration.unregister().await.unwrap();
        assert!(matches!(
            registration.unregister().await,
            Err(CoreError::RegistrationClosed(_))
        ));
        assert_eq!(registry.service_count().await, 0);
    }

    #[tokio::test]
    async fn test_open_tracker_sees_existing_services() {
        let registry = InProcessServiceRegistry::new();
        registry
            .register_service(vec!["A".into()], ServiceSource::Object(ServiceObject::new(1u8)), ServiceProperties::new())
            .await
            .unwrap();

        let recorder = Arc::new(Recorder::default());
        let tracker = registry
            .open_tracker(ServiceFilter::all(), recorder.clone())
            .await
            .unwrap();
        assert_eq!(tracker.tracking_count(), 1);

        tracker.close().await;
        assert_eq!(tracker.tracking_count(), 0);
        assert_eq!(registry.tracker_count().await, 0);
        assert_eq!(recorder.events().len(), 2);
    }

    #[tokio::test]
    async fn test_tracker_closed_while_adding_still_removes() {
        let registry = InProcessServiceRegistry::new();
        let gated = Arc::new(GatedRecorder::default());
        let tracker = registry
            .open_tracker(ServiceFilter::all(), gated.clone())
            .await
            .unwrap();

        let registering = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .register_service(vec!["A".into()], object_source(1), ServiceProperties::new())
                    .await
                    .unwrap()
                    .reference()
                    .id()
            })
        };

        gated.entered.notified().await;
        tracker.close().await;
        gated.release.notify_one();
        let id = registering.await.unwrap();

        assert_eq!(
            gated.recorder.events(),
            vec![format!("add:{id}"), format!("remove:{id}")]
        );
        assert_eq!(tracker.tracking_count(), 0);
    }

    #[tokio::test]
    async fn test_unregistered_while_adding_still_removes() {
        let registry = InProcessServiceRegistry::new();
        let registration = registry
            .register_service(vec!["A".into()], object_source(1), ServiceProperties::new())
            .await
            .unwrap();

        let gated = Arc::new(GatedRecorder::default());
        let opening = {
            let registry = registry.clone();
            let gated = gated.clone();
            tokio::spawn(async move {
                registry
                    .open_tracker(ServiceFilter::all(), gated)
                    .await
                    .unwrap()
            })
        };

        gated.entered.notified().await;
        registration.unregister().await.unwrap();
        gated.release.notify_one();
        let tracker = opening.await.unwrap();

        let id = registration.reference().id();
        assert_eq!(
            gated.recorder.events(),
            vec![format!("add:{id}"), format!("remove:{id}")]
        );
        assert_eq!(tracker.tracking_count(), 0);
        tracker.close().await;
        assert_eq!(gated.recorder.events().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_and_open_track_once() {
        for _ in 0..200 {
            let registry = InProcessServiceRegistry::new();
            let recorder = Arc::new(Recorder::default());

            let registering = {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .register_service(vec!["A".into()], object_source(1), ServiceProperties::new())
                        .await
                        .unwrap()
                })
            };
            let opening = {
                let registry = registry.clone();
                let recorder = recorder.clone();
                tokio::spawn(async move {
                    registry
                        .open_tracker(ServiceFilter::all(), recorder)
                        .await
                        .unwrap()
                })
            };

            let registration = registering.await.unwrap();
            let tracker = opening.await.unwrap();
            assert_eq!(tracker.tracking_count(), 1);

            registration.unregister().await.unwrap();
            tracker.close().await;

            let id = registration.reference().id();
            assert_eq!(
                recorder.events(),
                vec![format!("add:{id}"), format!("remove:{id}")]
            );
        }
    }

    #[tokio::test]
    async fn test_factory_without_object_is_not_tracked() {
        let registry = InProcessServiceRegistry::new();
        let recorder = Arc::new(Recorder::default());
        let tracker = registry
            .open_tracker(ServiceFilter::all(), recorder.clone())
            .await
            .unwrap();

        registry
            .register_service(vec!["A".into()], ServiceSource::factory(|_| None), ServiceProperties::new())
            .await
            .unwrap();

        assert_eq!(tracker.tracking_count(), 0);
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_filter_excludes_owner() {
        let filter = ServiceFilter::all().excluding_owner("host");
        let own = ServiceReference {
            id: 1,
            properties: ServiceProperties::new().with(SERVICE_OWNER, "host"),
        };
        let foreign = ServiceReference {
            id: 2,
            properties: ServiceProperties::new().with(SERVICE_OWNER, "plugin"),
        };
        let anonymous = ServiceReference {
            id: 3,
            properties: ServiceProperties::new(),
        };

        assert!(!filter.matches(&own));
        assert!(filter.matches(&foreign));
        assert!(filter.matches(&anonymous));
        assert_eq!(
            filter.to_string(),
            "(&(objectclass=*)(!(service.owner=host)))"
        );
    }

    #[test]
    fn test_display_name_fallback() {
        let reference = ServiceReference {
            id: 1,
            properties: ServiceProperties::new().with(BEAN_NAME, "bean"),
        };
        assert_eq!(reference.display_name(), Some("bean"));

        let reference = ServiceReference {
            id: 2,
            properties: ServiceProperties::new()
                .with(BEAN_NAME, "bean")
                .with(COMPONENT_NAME, "component"),
        };
        assert_eq!(reference.display_name(), Some("component"));
    }
}
