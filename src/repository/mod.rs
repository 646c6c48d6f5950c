//! 模块仓库
//!
//! 包含：
//! - 仓库抽象与共享的扫描快照
//! - 嵌套归档仓库、目录仓库与仓库工厂
//! - 模块定义、元数据与元数据加载器
//! - 组件描述符解析

pub mod definition;
pub mod descriptor;
pub mod directory;
pub mod factory;
pub mod loader;
pub mod nested;

use std::collections::BTreeMap;
use std::io::{Read, Seek};
use std::sync::Arc;

use tracing::{debug, warn};
use zip::ZipArchive;

pub use definition::{
    ModuleDefinition, ModuleDependency, ModuleId, ModuleMetadata, ModuleMetadataBuilder,
    ServiceProviderFile,
};
pub use descriptor::{ComponentDescriptor, DescriptorReader};
pub use directory::DirectoryRepository;
pub use factory::{create_repository, RepositoryContext};
pub use loader::MetadataLoader;
pub use nested::NestedArchiveRepository;

use crate::archive::source::read_manifest;
use crate::utils::Result;

/// 模块仓库
///
/// 仓库只负责发现模块定义，不持有任何生命周期状态。
pub trait Repository: Send + Sync {
    /// 仓库名
    fn name(&self) -> &str;

    /// 仓库 URI
    fn uri(&self) -> &str;

    /// 按名称和版本查找
    fn find(&self, name: &str, version: &str) -> Option<Arc<ModuleDefinition>>;

    /// 所有模块定义（按模块标识排序）
    fn find_all(&self) -> Vec<Arc<ModuleDefinition>>;

    /// 某个名称的所有版本
    fn find_all_named(&self, name: &str) -> Vec<Arc<ModuleDefinition>>;

    /// 不带模块身份的普通库位置
    fn libraries(&self) -> Vec<String>;

    /// 关闭并重新打开底层容器，重建模块表
    fn refresh(&self) -> Result<()>;
}

/// 一次扫描的结果
#[derive(Debug, Default, Clone)]
pub struct RepositorySnapshot {
    modules: BTreeMap<ModuleId, Arc<ModuleDefinition>>,
    libraries: Vec<String>,
}

impl RepositorySnapshot {
    /// 加入模块定义；同一标识已存在时保留先发现的那个
    pub fn add_module(&mut self, repository: &str, definition: ModuleDefinition) -> bool {
        let id = definition.id();
        if let Some(existing) = self.modules.get(&id) {
            warn!(
                repository = %repository,
                module_id = %id,
                kept = ?existing.locations(),
                ignored = ?definition.locations(),
                "模块标识重复，忽略后发现的定义"
            );
            return false;
        }
        self.modules.insert(id, Arc::new(definition));
        true
    }

    /// 记录普通库
    pub fn add_library(&mut self, location: String) {
        self.libraries.push(location);
    }

    /// 按名称和版本查找
    pub fn find(&self, name: &str, version: &str) -> Option<Arc<ModuleDefinition>> {
        self.modules.get(&ModuleId::new(name, version)).cloned()
    }

    /// 所有模块定义
    pub fn find_all(&self) -> Vec<Arc<ModuleDefinition>> {
        self.modules.values().cloned().collect()
    }

    /// 某个名称的所有版本
    pub fn find_all_named(&self, name: &str) -> Vec<Arc<ModuleDefinition>> {
        self.modules
            .values()
            .filter(|definition| definition.name() == name)
            .cloned()
            .collect()
    }

    /// 普通库位置
    pub fn libraries(&self) -> Vec<String> {
        self.libraries.clone()
    }

    /// 模块数量
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }
}

/// 按清单把一个模块归档归类为模块或普通库
///
/// `opened` 是已经打开的模块归档，清单与元数据都从它读取。打开失败或清单
/// 读取失败时记录警告并按普通库处理。
pub(crate) fn classify<R: Read + Seek>(
    repository: &str,
    entry_uri: String,
    opened: Result<ZipArchive<R>>,
    loader: &MetadataLoader<'_>,
    snapshot: &mut RepositorySnapshot,
) {
    let inspected = opened.and_then(|mut archive| {
        let manifest = read_manifest(&entry_uri, &mut archive)?;
        Ok((archive, manifest))
    });

    let definition = match inspected {
        Ok((mut archive, Some(manifest))) if manifest.has_bundle_identity() => {
            let metadata = loader.load_archive(&entry_uri, &mut archive);
            ModuleDefinition::from_manifest(entry_uri.clone(), manifest, metadata)
        }
        Ok(_) => None,
        Err(e) => {
            warn!(
                repository = %repository,
                entry_uri = %entry_uri,
                error = %e,
                error_code = e.error_code(),
                "读取清单失败，按普通库处理"
            );
            None
        }
    };

    match definition {
        Some(definition) => {
            debug!(
                repository = %repository,
                module_id = %definition.id(),
                entry_uri = %entry_uri,
                "发现模块"
            );
            snapshot.add_module(repository, definition);
        }
        None => {
            debug!(repository = %repository, entry_uri = %entry_uri, "发现普通库");
            snapshot.add_library(entry_uri);
        }
    }
}
