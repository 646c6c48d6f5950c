//! 模块宿主
//!
//! 运行时的启动对象：按配置创建仓库并注册到模块注册表，把注册表发布到
//! 外部服务注册表，管理定位器，并负责有序关闭。
//!
//! # 示例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chips_habitat::{HostConfig, InProcessServiceRegistry, ModuleHost, ServiceProperties};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = HostConfig::builder()
//!         .repository("archive:file:/opt/app.zip!/modules/")
//!         .build();
//!     let host = ModuleHost::new(config, Arc::new(InProcessServiceRegistry::new()))?;
//!     host.start().await?;
//!
//!     let locator = host.create_locator("default", ServiceProperties::new()).await?;
//!     println!("locator {}", locator.id());
//!
//!     host.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::bridge::habitat::HabitatManager;
use crate::bridge::locator::{ServiceLocator, ServiceObject};
use crate::bridge::registry::{
    ServiceProperties, ServiceRegistration, ServiceRegistry, ServiceSource, SERVICE_OWNER,
};
use crate::core::config::HostConfig;
use crate::module::registry::ModulesRegistry;
use crate::repository::factory::{create_repository, RepositoryContext};
use crate::utils::{CoreError, Result};

// ============================================================================
// 宿主状态
// ============================================================================

/// 宿主状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    /// 已初始化
    Initialized,
    /// 运行中
    Running,
    /// 正在关闭
    ShuttingDown,
    /// 已关闭
    Shutdown,
}

impl HostState {
    /// 检查是否可以启动
    pub fn can_start(&self) -> bool {
        matches!(self, HostState::Initialized)
    }

    /// 检查是否可以关闭
    pub fn can_shutdown(&self) -> bool {
        matches!(self, HostState::Running)
    }

    /// 检查是否正在运行
    pub fn is_running(&self) -> bool {
        matches!(self, HostState::Running)
    }
}

// ============================================================================
// ModuleHost
// ============================================================================

/// 模块宿主
pub struct ModuleHost {
    config: HostConfig,
    context: RepositoryContext,
    state: RwLock<HostState>,
    service_registry: Arc<dyn ServiceRegistry>,
    modules: Arc<ModulesRegistry>,
    habitats: HabitatManager,
    /// 模块注册表在外部注册表中的发布句柄
    publication: Mutex<Option<Box<dyn ServiceRegistration>>>,
    started_at: RwLock<Option<Instant>>,
}

impl ModuleHost {
    /// 创建宿主（使用配置中的仓库设置）
    pub fn new(config: HostConfig, service_registry: Arc<dyn ServiceRegistry>) -> Result<Self> {
        let context = RepositoryContext::from_config(&config.repositories);
        Self::with_context(config, service_registry, context)
    }

    /// 使用自定义仓库上下文创建宿主
    pub fn with_context(
        config: HostConfig,
        service_registry: Arc<dyn ServiceRegistry>,
        context: RepositoryContext,
    ) -> Result<Self> {
        config.validate()?;
        info!("初始化模块宿主 v{}", crate::VERSION);

        let habitats = HabitatManager::new(service_registry.clone(), config.bridge.clone());
        Ok(Self {
            config,
            context,
            state: RwLock::new(HostState::Initialized),
            service_registry,
            modules: Arc::new(ModulesRegistry::new()),
            habitats,
            publication: Mutex::new(None),
            started_at: RwLock::new(None),
        })
    }

    /// 启动宿主
    ///
    /// 单个仓库创建失败只记录日志，不影响其余仓库。
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.can_start() {
            return Err(CoreError::InitFailed(format!(
                "宿主当前状态 {:?} 不允许启动",
                *state
            )));
        }

        info!(repositories = self.config.repositories.uris.len(), "启动模块宿主...");

        // 1. 创建仓库
        for uri in &self.config.repositories.uris {
            match create_repository(uri, &self.context) {
                Ok(repository) => {
                    self.modules.add_repository(repository).await;
                }
                Err(e) => error!(
                    repository = %uri,
                    error = %e,
                    error_code = e.error_code(),
                    "仓库创建失败"
                ),
            }
        }
        if !self.config.repositories.obr_uris.is_empty() {
            warn!(
                count = self.config.repositories.obr_uris.len(),
                "不支持 OBR 仓库，已忽略"
            );
        }

        // 2. 发布模块注册表
        let properties = ServiceProperties::new().with(SERVICE_OWNER, &self.config.bridge.owner);
        let publication = self
            .service_registry
            .register_service(
                vec![self.config.bridge.registry_contract.clone()],
                ServiceSource::Object(ServiceObject::from_arc(self.modules.clone())),
                properties,
            )
            .await?;
        *self.publication.lock().await = Some(publication);
        debug!("模块注册表已发布");

        *state = HostState::Running;
        *self.started_at.write().await = Some(Instant::now());

        info!(modules = self.modules.modules().await.len(), "模块宿主已启动");
        Ok(())
    }

    /// 关闭宿主
    ///
    /// 顺序：关闭所有定位器，停止所有模块，撤销模块注册表的发布。
    /// 未启动或已关闭时直接返回。
    pub async fn shutdown(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.can_shutdown() {
            return Ok(());
        }

        info!("正在关闭模块宿主...");
        *state = HostState::ShuttingDown;

        // 1. 关闭定位器
        self.habitats.shutdown().await;
        debug!("所有定位器已关闭");

        // 2. 停止模块
        self.modules.shutdown().await;
        debug!("所有模块已停止");

        // 3. 撤销发布
        if let Some(publication) = self.publication.lock().await.take() {
            if let Err(e) = publication.unregister().await {
                warn!(error = %e, "撤销模块注册表发布失败");
            }
        }

        *state = HostState::Shutdown;
        info!("模块宿主已关闭");
        Ok(())
    }

    /// 创建定位器；宿主必须处于运行状态
    pub async fn create_locator(
        &self,
        name: impl Into<String>,
        properties: ServiceProperties,
    ) -> Result<Arc<ServiceLocator>> {
        // 持有读锁直到创建完成，关闭流程不会漏掉新定位器
        let state = self.state.read().await;
        if !state.is_running() {
            return Err(CoreError::InitFailed(format!(
                "宿主当前状态 {:?} 不允许创建定位器",
                *state
            )));
        }
        self.habitats.create_locator(name, properties).await
    }

    /// 销毁定位器，返回定位器是否存在
    pub async fn destroy_locator(&self, locator_id: &str) -> bool {
        self.habitats.destroy_locator(locator_id).await
    }

    // ========================================================================
    // 访问器
    // ========================================================================

    /// 当前状态
    pub async fn state(&self) -> HostState {
        *self.state.read().await
    }

    /// 已运行时长（毫秒）
    pub async fn uptime_ms(&self) -> Option<u128> {
        self.started_at
            .read()
            .await
            .map(|started| started.elapsed().as_millis())
    }

    /// 配置
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// 模块注册表
    pub fn modules(&self) -> &Arc<ModulesRegistry> {
        &self.modules
    }

    /// 定位器管理器
    pub fn habitats(&self) -> &HabitatManager {
        &self.habitats
    }

    /// 外部服务注册表
    pub fn service_registry(&self) -> &Arc<dyn ServiceRegistry> {
        &self.service_registry
    }
}

impl std::fmt::Debug for ModuleHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHost")
            .field("config", &self.config)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
