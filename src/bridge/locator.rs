//! 服务定位器
//!
//! 进程内的依赖查找目录，保存常量描述符（描述符直接携带服务实例）。
//! 变更通过 [`DynamicConfiguration`] 批量提交，同一个定位器上的提交互斥，
//! 所以同一对象的“添加”一定在之后的“移除”之前可见。

use std::any::{type_name, Any};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use crate::utils::{generate_uuid, next_sequence, CoreError, Result};

/// 服务实例
///
/// 除实例本身外还记录了创建时的具体类型名，用作没有契约时的默认标签。
#[derive(Clone)]
pub struct ServiceObject {
    instance: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl ServiceObject {
    /// 包装一个值
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// 包装一个共享值（保留原有的实例身份）
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            instance: value,
            type_name: type_name::<T>(),
        }
    }

    /// 具体类型名
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// 转换为具体类型
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.instance.clone().downcast::<T>().ok()
    }

    /// 是否为同一个实例
    pub fn same_instance(&self, other: &ServiceObject) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.instance) as *const (),
            Arc::as_ptr(&other.instance) as *const (),
        )
    }
}

impl fmt::Debug for ServiceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceObject<{}>@{:p}", self.type_name, Arc::as_ptr(&self.instance))
    }
}

/// 常量描述符
#[derive(Debug, Clone)]
pub struct ActiveDescriptor {
    id: u64,
    contracts: BTreeSet<String>,
    name: Option<String>,
    instance: ServiceObject,
}

impl ActiveDescriptor {
    /// 为实例创建没有契约的常量描述符
    pub fn constant(instance: ServiceObject) -> Self {
        Self {
            id: next_sequence(),
            contracts: BTreeSet::new(),
            name: None,
            instance,
        }
    }

    /// 追加契约
    pub fn add_contract(&mut self, contract: impl Into<String>) {
        self.contracts.insert(contract.into());
    }

    /// 追加契约（构建器写法）
    pub fn with_contract(mut self, contract: impl Into<String>) -> Self {
        self.add_contract(contract);
        self
    }

    /// 设置名称
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    /// 设置名称（构建器写法）
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.set_name(name);
        self
    }

    /// 描述符 ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 契约集合
    pub fn contracts(&self) -> &BTreeSet<String> {
        &self.contracts
    }

    /// 是否带有某个契约
    pub fn has_contract(&self, contract: &str) -> bool {
        self.contracts.contains(contract)
    }

    /// 名称
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// 服务实例
    pub fn instance(&self) -> &ServiceObject {
        &self.instance
    }
}

/// 描述符过滤器
pub type DescriptorFilter = Box<dyn Fn(&ActiveDescriptor) -> bool + Send + Sync>;

/// 一次提交的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// 新增的描述符数
    pub added: usize,
    /// 解绑的描述符数
    pub removed: usize,
}

/// 动态配置：收集新增描述符与解绑过滤器，`commit` 时一次性应用
pub struct DynamicConfiguration<'a> {
    locator: &'a ServiceLocator,
    additions: Vec<Arc<ActiveDescriptor>>,
    unbind_filters: Vec<DescriptorFilter>,
}

impl<'a> DynamicConfiguration<'a> {
    /// 加入描述符，返回提交后可用于比对的共享句柄
    pub fn add_active_descriptor(&mut self, descriptor: ActiveDescriptor) -> Arc<ActiveDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.additions.push(descriptor.clone());
        descriptor
    }

    /// 加入解绑过滤器
    pub fn add_unbind_filter<F>(&mut self, filter: F)
    where
        F: Fn(&ActiveDescriptor) -> bool + Send + Sync + 'static,
    {
        self.unbind_filters.push(Box::new(filter));
    }

    /// 提交
    ///
    /// 先按过滤器移除已有描述符，再加入新描述符。定位器已关闭时返回
    /// [`CoreError::LocatorNotFound`]。
    pub fn commit(self) -> Result<CommitSummary> {
        let locator = self.locator;
        let _guard = locator
            .commit_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if locator.is_shutdown() {
            return Err(CoreError::LocatorNotFound(locator.id.clone()));
        }

        let mut descriptors = locator
            .descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let before = descriptors.len();
        if !self.unbind_filters.is_empty() {
            descriptors.retain(|d| !self.unbind_filters.iter().any(|filter| filter(d)));
        }
        let removed = before - descriptors.len();

        let added = self.additions.len();
        descriptors.extend(self.additions);

        debug!(locator = %locator.name, added, removed, "定位器配置已提交");
        Ok(CommitSummary { added, removed })
    }
}

/// 服务定位器
pub struct ServiceLocator {
    id: String,
    name: String,
    descriptors: RwLock<Vec<Arc<ActiveDescriptor>>>,
    commit_lock: Mutex<()>,
    shutdown: AtomicBool,
}

impl ServiceLocator {
    /// 创建空定位器
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: generate_uuid(),
            name: name.into(),
            descriptors: RwLock::new(Vec::new()),
            commit_lock: Mutex::new(()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// 定位器 ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 定位器名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 开始一次动态配置
    pub fn create_dynamic_configuration(&self) -> DynamicConfiguration<'_> {
        DynamicConfiguration {
            locator: self,
            additions: Vec::new(),
            unbind_filters: Vec::new(),
        }
    }

    /// 当前所有描述符（按提交顺序）
    pub fn descriptors(&self) -> Vec<Arc<ActiveDescriptor>> {
        self.read().clone()
    }

    /// 描述符数量
    pub fn descriptor_count(&self) -> usize {
        self.read().len()
    }

    /// 按契约查找
    pub fn lookup(&self, contract: &str) -> Vec<Arc<ActiveDescriptor>> {
        self.read()
            .iter()
            .filter(|d| d.has_contract(contract))
            .cloned()
            .collect()
    }

    /// 按契约和名称查找第一个匹配
    pub fn lookup_named(&self, contract: &str, name: &str) -> Option<Arc<ActiveDescriptor>> {
        self.read()
            .iter()
            .find(|d| d.has_contract(contract) && d.name() == Some(name))
            .cloned()
    }

    /// 取服务实例
    ///
    /// `name` 为 `None` 时取该契约下第一个能转换为 `T` 的实例。
    pub fn get_service<T: Any + Send + Sync>(&self, contract: &str, name: Option<&str>) -> Option<Arc<T>> {
        match name {
            Some(name) => self
                .lookup_named(contract, name)
                .and_then(|d| d.instance().downcast::<T>()),
            None => self
                .lookup(contract)
                .iter()
                .find_map(|d| d.instance().downcast::<T>()),
        }
    }

    /// 关闭定位器，之后的提交都会失败
    pub fn shutdown(&self) {
        let _guard = self.commit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            self.descriptors
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            debug!(locator = %self.name, "定位器已关闭");
        }
    }

    /// 是否已关闭
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<ActiveDescriptor>>> {
        self.descriptors.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ServiceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceLocator")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("descriptors", &self.descriptor_count())
            .finish()
    }
}
