//! 模块注册表
//!
//! 持有所有已注册仓库，并为仓库中的每个模块定义创建运行时 [`Module`]。
//! 提供依赖查找、空闲模块清理与统一停止。

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::archive::flatten::FlattenSequence;
use crate::module::lifecycle::{Module, ModuleState};
use crate::module::version::{parse_version, VersionRange};
use crate::repository::definition::{ModuleDefinition, ModuleId};
use crate::repository::Repository;
use crate::utils::{CoreError, Result};

/// 模块注册表
#[derive(Default)]
pub struct ModulesRegistry {
    /// 已注册仓库（按注册顺序）
    repositories: RwLock<Vec<Arc<dyn Repository>>>,

    /// 运行时模块：ModuleId -> Module
    modules: RwLock<BTreeMap<ModuleId, Arc<Module>>>,
}

impl ModulesRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    // ====== 仓库 ======

    /// 注册仓库并安装其中的全部模块定义
    ///
    /// 返回新安装的模块数量；已安装的同标识模块保持不变。
    pub async fn add_repository(&self, repository: Arc<dyn Repository>) -> usize {
        let name = repository.name().to_string();
        {
            let mut repositories = self.repositories.write().await;
            if repositories.iter().any(|r| r.name() == name) {
                warn!(repository = %name, "仓库已注册，忽略");
                return 0;
            }
            repositories.push(repository.clone());
        }

        let mut installed = 0;
        for definition in repository.find_all() {
            if self.install_from(definition, Some(&name)).await.1 {
                installed += 1;
            }
        }

        info!(repository = %name, installed, "仓库已注册");
        installed
    }

    /// 移除仓库，并卸载来自该仓库的模块
    pub async fn remove_repository(&self, name: &str) -> Option<Arc<dyn Repository>> {
        let removed = {
            let mut repositories = self.repositories.write().await;
            let index = repositories.iter().position(|r| r.name() == name)?;
            repositories.remove(index)
        };

        let owned: Vec<ModuleId> = self
            .modules
            .read()
            .await
            .iter()
            .filter(|(_, module)| module.repository() == Some(name))
            .map(|(id, _)| id.clone())
            .collect();
        for id in owned {
            if let Err(e) = self.uninstall(&id).await {
                warn!(module_id = %id, error = %e, "卸载模块失败");
            }
        }

        info!(repository = %name, "仓库已移除");
        Some(removed)
    }

    /// 已注册仓库
    pub async fn repositories(&self) -> Vec<Arc<dyn Repository>> {
        self.repositories.read().await.clone()
    }

    /// 所有仓库中的模块定义（逐个仓库惰性展开）
    pub async fn definitions(&self) -> Vec<Arc<ModuleDefinition>> {
        let repositories = self.repositories().await;
        FlattenSequence::new(repositories.iter().map(|r| r.find_all())).collect()
    }

    // ====== 模块 ======

    /// 安装模块定义；同标识已安装时返回已有模块
    pub async fn install(&self, definition: Arc<ModuleDefinition>) -> Arc<Module> {
        self.install_from(definition, None).await.0
    }

    async fn install_from(
        &self,
        definition: Arc<ModuleDefinition>,
        repository: Option<&str>,
    ) -> (Arc<Module>, bool) {
        let id = definition.id();
        let mut modules = self.modules.write().await;
        if let Some(existing) = modules.get(&id) {
            debug!(module_id = %id, "模块已安装");
            return (existing.clone(), false);
        }

        let mut module = Module::new(definition);
        if let Some(repository) = repository {
            module = module.with_repository(repository);
        }
        let module = Arc::new(module);
        modules.insert(id.clone(), module.clone());
        debug!(module_id = %id, "模块已安装");
        (module, true)
    }

    /// 卸载模块并从注册表移除
    pub async fn uninstall(&self, id: &ModuleId) -> Result<()> {
        let module = self
            .modules
            .write()
            .await
            .remove(id)
            .ok_or_else(|| CoreError::ModuleNotFound(id.to_string()))?;
        module.uninstall().await
    }

    /// 按标识获取模块
    pub async fn get(&self, id: &ModuleId) -> Option<Arc<Module>> {
        self.modules.read().await.get(id).cloned()
    }

    /// 查找名称匹配且版本落在范围内的模块，有多个时取最高版本
    pub async fn find(&self, name: &str, range: &VersionRange) -> Option<Arc<Module>> {
        self.modules
            .read()
            .await
            .values()
            .filter(|module| module.name() == name)
            .filter_map(|module| {
                let version = match parse_version(module.definition().version()) {
                    Ok(version) => version,
                    Err(e) => {
                        warn!(
                            module_id = %module.id(),
                            version = module.definition().version(),
                            error = %e,
                            "模块版本无法解析，跳过"
                        );
                        return None;
                    }
                };
                range.includes(&version).then(|| (version, module.clone()))
            })
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, module)| module)
    }

    /// 所有模块
    pub async fn modules(&self) -> Vec<Arc<Module>> {
        self.modules.read().await.values().cloned().collect()
    }

    /// 解析并启用模块
    pub async fn activate(&self, id: &ModuleId) -> Result<Arc<Module>> {
        let module = self
            .get(id)
            .await
            .ok_or_else(|| CoreError::ModuleNotFound(id.to_string()))?;
        module.resolve(self).await?;
        module.start().await?;
        Ok(module)
    }

    /// 停止没有被任何已解析模块依赖的非常驻 `Ready` 模块
    ///
    /// 返回被停止的模块标识。
    pub async fn prune_unused(&self) -> Vec<ModuleId> {
        let modules = self.modules().await;

        let mut imported = HashSet::new();
        for module in &modules {
            if module.state().await == ModuleState::New {
                continue;
            }
            for import in module.imports().await {
                imported.insert(import.id());
            }
        }

        let mut stopped = Vec::new();
        for module in modules {
            if module.is_sticky() || imported.contains(&module.id()) {
                continue;
            }
            if module.state().await == ModuleState::Ready && module.stop().await {
                stopped.push(module.id());
            }
        }

        if !stopped.is_empty() {
            info!(count = stopped.len(), "已停止空闲模块");
        }
        stopped
    }

    /// 停止所有模块
    ///
    /// 按标识逆序停止，逐个记录结果，不会因为单个模块而中断。
    pub async fn shutdown(&self) {
        let modules = self.modules().await;
        info!(count = modules.len(), "停止所有模块");

        for module in modules.into_iter().rev() {
            if module.stop().await {
                debug!(module_id = %module.id(), "模块已停止");
            }
        }
    }
}

impl std::fmt::Debug for ModulesRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModulesRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::definition::ModuleDependency;

    fn definition(name: &str, version: &str) -> Arc<ModuleDefinition> {
        Arc::new(ModuleDefinition::new(name, version))
    }

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let registry = ModulesRegistry::new();
        let a = registry.install(definition("a", "1.0")).await;
        let again = registry.install(definition("a", "1.0")).await;
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(registry.modules().await.len(), 1);
    }

    #[tokio::test]
    async fn test_find_picks_highest_matching_version() {
        let registry = ModulesRegistry::new();
        registry.install(definition("lib", "1.0")).await;
        registry.install(definition("lib", "1.5")).await;
        registry.install(definition("lib", "2.0")).await;

        let range = VersionRange::parse("[1.0,2.0)").unwrap();
        let found = registry.find("lib", &range).await.unwrap();
        assert_eq!(found.definition().version(), "1.5");
        assert!(registry
            .find("lib", &VersionRange::parse("[3.0,4.0)").unwrap())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_find_accepts_qualified_versions() {
        let registry = ModulesRegistry::new();
        registry.install(definition("lib", "1.0")).await;
        registry.install(definition("lib", "1.2.0-SNAPSHOT")).await;
        registry.install(definition("lib", "1.1.0.a..b")).await;
        registry.install(definition("lib", "not-a-version")).await;

        let range = VersionRange::parse("[1.0,2.0)").unwrap();
        let found = registry.find("lib", &range).await.unwrap();
        assert_eq!(found.definition().version(), "1.2.0-SNAPSHOT");
    }

    #[tokio::test]
    async fn test_resolve_records_imports() {
        let registry = ModulesRegistry::new();
        registry.install(definition("api", "1.2")).await;
        let app = registry
            .install(Arc::new(ModuleDefinition::new("app", "1.0").with_dependency(
                ModuleDependency::new("api", Some("[1.0,2.0)".into())),
            )))
            .await;

        app.resolve(&registry).await.unwrap();
        let imports = app.imports().await;
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].name(), "api");
    }

    #[tokio::test]
    async fn test_resolve_failure_keeps_state() {
        let registry = ModulesRegistry::new();
        let app = registry
            .install(Arc::new(
                ModuleDefinition::new("app", "1.0")
                    .with_dependency(ModuleDependency::new("missing", None)),
            ))
            .await;

        let err = app.resolve(&registry).await.unwrap_err();
        assert!(matches!(err, CoreError::Resolve { .. }));
        assert_eq!(app.state().await, ModuleState::New);
    }

    #[tokio::test]
    async fn test_uninstall_removes_module() {
        let registry = ModulesRegistry::new();
        let module = registry.install(definition("a", "1.0")).await;
        let id = module.id();

        registry.uninstall(&id).await.unwrap();
        assert!(registry.get(&id).await.is_none());
        assert!(module.is_uninstalled());
        assert!(matches!(
            registry.uninstall(&id).await,
            Err(CoreError::ModuleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_prune_unused_spares_sticky_and_imported() {
        let registry = ModulesRegistry::new();
        registry.install(definition("api", "1.0")).await;
        registry.install(definition("idle", "1.0")).await;
        registry.install(definition("pinned", "1.0")).await;
        registry
            .install(Arc::new(
                ModuleDefinition::new("app", "1.0")
                    .with_dependency(ModuleDependency::new("api", None)),
            ))
            .await;

        for name in ["api", "idle", "pinned", "app"] {
            registry.activate(&ModuleId::new(name, "1.0")).await.unwrap();
        }
        registry
            .get(&ModuleId::new("pinned", "1.0"))
            .await
            .unwrap()
            .set_sticky(true);

        let mut stopped = registry.prune_unused().await;
        stopped.sort();
        assert_eq!(
            stopped,
            vec![ModuleId::new("app", "1.0"), ModuleId::new("idle", "1.0")]
        );

        let api = registry.get(&ModuleId::new("api", "1.0")).await.unwrap();
        assert_eq!(api.state().await, ModuleState::Ready);
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let registry = ModulesRegistry::new();
        registry.install(definition("a", "1.0")).await;
        registry.install(definition("b", "1.0")).await;
        registry.activate(&ModuleId::new("a", "1.0")).await.unwrap();
        registry.activate(&ModuleId::new("b", "1.0")).await.unwrap();

        registry.shutdown().await;

        for module in registry.modules().await {
            assert_eq!(module.state().await, ModuleState::New);
        }
    }
}
