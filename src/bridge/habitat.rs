//! 定位器管理
//!
//! 每个定位器对应一条桥接记录：定位器本身、它在外部注册表中的发布句柄、
//! 以及把外部服务导入定位器的跟踪器。记录的插入与移除都在同一把锁下进行。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::bridge::locator::{ActiveDescriptor, ServiceLocator, ServiceObject};
use crate::bridge::registry::{
    ServiceFilter, ServiceProperties, ServiceRegistration, ServiceRegistry, ServiceSource,
    ServiceTracker, SERVICE_OWNER,
};
use crate::bridge::tracker::LocatorBridge;
use crate::core::config::BridgeConfig;
use crate::utils::{next_sequence, Result};

/// 启动服务契约
pub const MODULE_STARTUP_CONTRACT: &str = "com.sun.enterprise.module.bootstrap.ModuleStartup";

/// 启动服务的默认名称
pub const DEFAULT_STARTUP_NAME: &str = "default";

/// 定位器名称属性
pub const LOCATOR_NAME: &str = "locator.name";

/// 定位器 ID 属性
pub const LOCATOR_ID: &str = "locator.id";

/// 启动服务
///
/// 注册在定位器中，关闭时被调用以便优雅停止。钩子内部的错误可以用
/// `anyhow` 构造后 `?` 返回，会落到 [`CoreError::Other`](crate::utils::CoreError::Other)。
pub trait ModuleStartup: Send + Sync {
    /// 停止
    fn stop(&self) -> Result<()>;
}

/// 把启动服务注册到定位器
pub fn register_module_startup(
    locator: &ServiceLocator,
    startup: Arc<dyn ModuleStartup>,
) -> Result<()> {
    let mut config = locator.create_dynamic_configuration();
    config.add_active_descriptor(
        ActiveDescriptor::constant(ServiceObject::new(startup))
            .with_contract(MODULE_STARTUP_CONTRACT)
            .with_name(DEFAULT_STARTUP_NAME),
    );
    config.commit()?;
    Ok(())
}

/// 桥接记录
pub struct HabitatInfo {
    locator: Arc<ServiceLocator>,
    registration: Box<dyn ServiceRegistration>,
    tracker: Box<dyn ServiceTracker>,
    sequence: u64,
    created_at: DateTime<Utc>,
}

impl HabitatInfo {
    /// 定位器
    pub fn locator(&self) -> &Arc<ServiceLocator> {
        &self.locator
    }

    /// 创建序号
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// 创建时间
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// 正在跟踪的外部服务数
    pub fn tracking_count(&self) -> usize {
        self.tracker.tracking_count()
    }
}

impl std::fmt::Debug for HabitatInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HabitatInfo")
            .field("locator", &self.locator)
            .field("service_id", &self.registration.reference().id())
            .field("sequence", &self.sequence)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// 定位器管理器
pub struct HabitatManager {
    registry: Arc<dyn ServiceRegistry>,
    config: BridgeConfig,
    habitats: Mutex<HashMap<String, Arc<HabitatInfo>>>,
}

impl HabitatManager {
    /// 创建管理器
    pub fn new(registry: Arc<dyn ServiceRegistry>, config: BridgeConfig) -> Self {
        Self {
            registry,
            config,
            habitats: Mutex::new(HashMap::new()),
        }
    }

    /// 外部注册表
    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        &self.registry
    }

    /// 创建定位器
    ///
    /// 先打开跟踪器（排除宿主自己发布的服务），再把定位器发布到外部注册表。
    /// 发布失败时关闭已打开的跟踪器。
    pub async fn create_locator(
        &self,
        name: impl Into<String>,
        properties: ServiceProperties,
    ) -> Result<Arc<ServiceLocator>> {
        let name = name.into();
        let mut habitats = self.habitats.lock().await;

        let locator = Arc::new(ServiceLocator::new(name.clone()));
        let filter = ServiceFilter::all().excluding_owner(&self.config.owner);
        let tracker = self
            .registry
            .open_tracker(filter, Arc::new(LocatorBridge::new(locator.clone())))
            .await?;

        let mut properties = properties;
        properties.extend(
            ServiceProperties::new()
                .with(SERVICE_OWNER, &self.config.owner)
                .with(LOCATOR_NAME, &name)
                .with(LOCATOR_ID, locator.id()),
        );
        let registration = match self
            .registry
            .register_service(
                vec![self.config.locator_contract.clone()],
                ServiceSource::Object(ServiceObject::from_arc(locator.clone())),
                properties,
            )
            .await
        {
            Ok(registration) => registration,
            Err(e) => {
                tracker.close().await;
                locator.shutdown();
                return Err(e);
            }
        };

        let info = HabitatInfo {
            locator: locator.clone(),
            registration,
            tracker,
            sequence: next_sequence(),
            created_at: Utc::now(),
        };
        info!(
            locator = %name,
            locator_id = %locator.id(),
            tracking = info.tracking_count(),
            "定位器已创建"
        );
        habitats.insert(locator.id().to_string(), Arc::new(info));
        Ok(locator)
    }

    /// 销毁定位器
    ///
    /// 顺序：注销发布，关闭跟踪器，移除记录。返回记录是否存在。
    pub async fn destroy_locator(&self, locator_id: &str) -> bool {
        let mut habitats = self.habitats.lock().await;
        let Some(info) = habitats.get(locator_id).cloned() else {
            debug!(locator_id = %locator_id, "定位器不存在");
            return false;
        };

        if let Err(e) = info.registration.unregister().await {
            warn!(locator_id = %locator_id, error = %e, "注销定位器发布失败");
        }
        info.tracker.close().await;
        habitats.remove(locator_id);
        info.locator.shutdown();

        info!(locator = %info.locator.name(), locator_id = %locator_id, "定位器已销毁");
        true
    }

    /// 获取记录
    pub async fn get(&self, locator_id: &str) -> Option<Arc<HabitatInfo>> {
        self.habitats.lock().await.get(locator_id).cloned()
    }

    /// 所有定位器（按创建顺序）
    pub async fn locators(&self) -> Vec<Arc<ServiceLocator>> {
        self.snapshot()
            .await
            .into_iter()
            .map(|info| info.locator.clone())
            .collect()
    }

    /// 记录数
    pub async fn len(&self) -> usize {
        self.habitats.lock().await.len()
    }

    /// 是否没有记录
    pub async fn is_empty(&self) -> bool {
        self.habitats.lock().await.is_empty()
    }

    /// 关闭全部定位器
    ///
    /// 先复制记录，再按创建顺序的逆序逐个调用启动服务的停止钩子并销毁。
    /// 停止钩子的失败只记录日志。
    pub async fn shutdown(&self) {
        let mut records = self.snapshot().await;
        records.reverse();
        info!(count = records.len(), "关闭所有定位器");

        for info in records {
            let locator = &info.locator;
            if let Some(startup) = locator.get_service::<Arc<dyn ModuleStartup>>(
                MODULE_STARTUP_CONTRACT,
                Some(DEFAULT_STARTUP_NAME),
            ) {
                info!(locator = %locator.name(), "停止启动服务");
                if let Err(e) = startup.stop() {
                    error!(
                        locator = %locator.name(),
                        error = %e,
                        error_code = e.error_code(),
                        "启动服务停止失败"
                    );
                }
            }
            self.destroy_locator(locator.id()).await;
        }
    }

    async fn snapshot(&self) -> Vec<Arc<HabitatInfo>> {
        let mut records: Vec<_> = self.habitats.lock().await.values().cloned().collect();
        records.sort_by_key(|info| info.sequence);
        records
    }
}

impl std::fmt::Debug for HabitatManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HabitatManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
