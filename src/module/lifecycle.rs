//! 模块生命周期
//!
//! 状态机：`New -> Resolved -> Ready`，只能通过显式调用前进；`stop` 从任意状态
//! 回到 `New`。`uninstall` 是终态，之后所有生命周期调用都返回
//! [`CoreError::ModuleUninstalled`]。
//!
//! 状态变化会按注册顺序（FIFO）同步通知该模块的监听器。

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::module::registry::ModulesRegistry;
use crate::repository::definition::{ModuleDefinition, ModuleId};
use crate::utils::{generate_id, CoreError, Result};

/// 模块状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    /// 已定义，尚未解析依赖
    New,
    /// 依赖已解析，尚未启用
    Resolved,
    /// 已启用
    Ready,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleState::New => "new",
            ModuleState::Resolved => "resolved",
            ModuleState::Ready => "ready",
        };
        write!(f, "{}", s)
    }
}

/// 状态变化事件
#[derive(Debug, Clone)]
pub struct ModuleEvent {
    /// 模块标识
    pub module: ModuleId,
    /// 变化前的状态
    pub old: ModuleState,
    /// 变化后的状态
    pub new: ModuleState,
    /// 发生时间
    pub at: DateTime<Utc>,
}

/// 状态变化监听器
pub type ModuleListener = Arc<dyn Fn(&ModuleEvent) + Send + Sync>;

/// 运行时模块
pub struct Module {
    definition: Arc<ModuleDefinition>,
    repository: Option<String>,
    state: RwLock<ModuleState>,
    sticky: AtomicBool,
    uninstalled: AtomicBool,
    imports: RwLock<Vec<Arc<Module>>>,
    listeners: RwLock<Vec<(String, ModuleListener)>>,
}

impl Module {
    /// 包装模块定义，初始状态为 `New`
    pub fn new(definition: Arc<ModuleDefinition>) -> Self {
        Self {
            definition,
            repository: None,
            state: RwLock::new(ModuleState::New),
            sticky: AtomicBool::new(false),
            uninstalled: AtomicBool::new(false),
            imports: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// 记录来源仓库
    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    /// 模块定义
    pub fn definition(&self) -> &Arc<ModuleDefinition> {
        &self.definition
    }

    /// 模块标识
    pub fn id(&self) -> ModuleId {
        self.definition.id()
    }

    /// 模块名
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// 来源仓库名
    pub fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    /// 当前状态
    pub async fn state(&self) -> ModuleState {
        *self.state.read().await
    }

    /// 是否已卸载
    pub fn is_uninstalled(&self) -> bool {
        self.uninstalled.load(Ordering::SeqCst)
    }

    /// 是否常驻（不会被空闲清理停止）
    pub fn is_sticky(&self) -> bool {
        self.sticky.load(Ordering::SeqCst)
    }

    /// 设置常驻标记
    pub fn set_sticky(&self, sticky: bool) {
        self.sticky.store(sticky, Ordering::SeqCst);
    }

    /// 解析时确定的依赖模块
    pub async fn imports(&self) -> Vec<Arc<Module>> {
        self.imports.read().await.clone()
    }

    /// 手动追加依赖模块
    pub async fn add_import(&self, module: Arc<Module>) -> Result<()> {
        self.ensure_installed()?;
        let mut imports = self.imports.write().await;
        if !imports.iter().any(|m| Arc::ptr_eq(m, &module)) {
            imports.push(module);
        }
        Ok(())
    }

    // ====== 生命周期 ======

    /// 解析依赖：`New -> Resolved`
    ///
    /// 每个必需依赖都要有已注册且版本落在范围内的模块，否则返回
    /// [`CoreError::Resolve`] 且状态不变。已是 `Resolved` 或 `Ready` 时什么都不做。
    pub async fn resolve(&self, registry: &ModulesRegistry) -> Result<()> {
        self.ensure_installed()?;
        let id = self.id();

        let mut state = self.state.write().await;
        let current = *state;
        if current != ModuleState::New {
            debug!(module_id = %id, state = %current, "模块已解析，忽略重复解析");
            return Ok(());
        }

        let mut resolved = Vec::new();
        for dependency in self.definition.dependencies() {
            let range = dependency
                .range()
                .map_err(|e| CoreError::resolve(id.to_string(), e.to_string()))?;

            match registry.find(&dependency.name, &range).await {
                Some(module) => resolved.push(module),
                None if dependency.optional => {
                    debug!(module_id = %id, dependency = %dependency.name, "可选依赖缺失");
                }
                None => {
                    warn!(
                        module_id = %id,
                        dependency = %dependency.name,
                        range = %range,
                        "依赖无法满足"
                    );
                    return Err(CoreError::resolve(
                        id.to_string(),
                        format!("缺少依赖 {} {}", dependency.name, range),
                    ));
                }
            }
        }

        *self.imports.write().await = resolved;
        *state = ModuleState::Resolved;
        drop(state);

        info!(module_id = %id, "模块已解析");
        self.notify(ModuleState::New, ModuleState::Resolved).await;
        Ok(())
    }

    /// 启用模块：`Resolved -> Ready`
    ///
    /// 未解析或依赖已被卸载时返回 [`CoreError::Resolve`]。已是 `Ready` 时什么都不做。
    pub async fn start(&self) -> Result<()> {
        self.ensure_installed()?;
        let id = self.id();

        let mut state = self.state.write().await;
        match *state {
            ModuleState::Ready => return Ok(()),
            ModuleState::New => {
                return Err(CoreError::resolve(id.to_string(), "模块尚未解析"));
            }
            ModuleState::Resolved => {}
        }

        for import in self.imports.read().await.iter() {
            if import.is_uninstalled() {
                return Err(CoreError::resolve(
                    id.to_string(),
                    format!("依赖 {} 已卸载", import.id()),
                ));
            }
        }

        *state = ModuleState::Ready;
        drop(state);

        info!(module_id = %id, "模块已启用");
        self.notify(ModuleState::Resolved, ModuleState::Ready).await;
        Ok(())
    }

    /// 停止模块：任意状态 -> `New`
    ///
    /// 返回是否真的发生了状态变化。
    pub async fn stop(&self) -> bool {
        let mut state = self.state.write().await;
        let old = *state;
        if old == ModuleState::New {
            return false;
        }

        *state = ModuleState::New;
        self.imports.write().await.clear();
        drop(state);

        info!(module_id = %self.id(), from = %old, "模块已停止");
        self.notify(old, ModuleState::New).await;
        true
    }

    /// 卸载模块（终态）
    pub async fn uninstall(&self) -> Result<()> {
        if self.uninstalled.swap(true, Ordering::SeqCst) {
            return Err(CoreError::ModuleUninstalled(self.id().to_string()));
        }
        self.stop().await;
        self.listeners.write().await.clear();
        info!(module_id = %self.id(), "模块已卸载");
        Ok(())
    }

    /// 从宿主分离（不改变状态）
    pub async fn detach(&self) -> Result<()> {
        self.ensure_installed()?;
        debug!(module_id = %self.id(), "模块分离");
        Ok(())
    }

    /// 刷新模块（不改变状态）
    pub async fn refresh(&self) -> Result<()> {
        self.ensure_installed()?;
        debug!(module_id = %self.id(), "模块刷新");
        Ok(())
    }

    // ====== 监听器 ======

    /// 注册状态监听器，返回用于移除的 ID
    pub async fn add_listener<F>(&self, listener: F) -> String
    where
        F: Fn(&ModuleEvent) + Send + Sync + 'static,
    {
        let id = generate_id();
        self.listeners
            .write()
            .await
            .push((id.clone(), Arc::new(listener)));
        id
    }

    /// 移除监听器
    pub async fn remove_listener(&self, listener_id: &str) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|(id, _)| id != listener_id);
        listeners.len() != before
    }

    async fn notify(&self, old: ModuleState, new: ModuleState) {
        let event = ModuleEvent {
            module: self.id(),
            old,
            new,
            at: Utc::now(),
        };

        // 复制后再调用，监听器里可以安全地增删监听器
        let listeners: Vec<ModuleListener> = self
            .listeners
            .read()
            .await
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }

    fn ensure_installed(&self) -> Result<()> {
        if self.is_uninstalled() {
            Err(CoreError::ModuleUninstalled(self.id().to_string()))
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id())
            .field("repository", &self.repository)
            .field("sticky", &self.is_sticky())
            .field("uninstalled", &self.is_uninstalled())
            .finish_non_exhaustive()
    }
}
