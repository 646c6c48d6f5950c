//! 仓库上下文与仓库工厂
//!
//! 仓库需要的外部能力（代码单元来源、模块后缀、描述符根目录）都放在
//! [`RepositoryContext`] 里，由调用方显式传给构造函数。

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::archive::source::{ArchiveSource, CodeUnitSource};
use crate::archive::uri::is_archive_uri;
use crate::core::config::{RepositoryConfig, DEFAULT_DESCRIPTOR_ROOT, DEFAULT_MODULE_SUFFIX};
use crate::repository::directory::DirectoryRepository;
use crate::repository::nested::NestedArchiveRepository;
use crate::repository::Repository;
use crate::utils::{CoreError, Result};

/// 仓库上下文
#[derive(Clone)]
pub struct RepositoryContext {
    source: Arc<dyn CodeUnitSource>,
    module_suffix: String,
    descriptor_root: String,
}

impl RepositoryContext {
    /// 使用指定来源和默认设置创建
    pub fn new(source: Arc<dyn CodeUnitSource>) -> Self {
        Self {
            source,
            module_suffix: DEFAULT_MODULE_SUFFIX.to_string(),
            descriptor_root: DEFAULT_DESCRIPTOR_ROOT.to_string(),
        }
    }

    /// 由仓库配置创建（使用默认来源）
    pub fn from_config(config: &RepositoryConfig) -> Self {
        Self::new(Arc::new(ArchiveSource::new()))
            .with_module_suffix(&config.module_suffix)
            .with_descriptor_root(&config.descriptor_root)
    }

    /// 设置模块归档后缀
    pub fn with_module_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.module_suffix = suffix.into();
        self
    }

    /// 设置描述符根目录
    pub fn with_descriptor_root(mut self, root: impl Into<String>) -> Self {
        self.descriptor_root = root.into().trim_matches('/').to_string();
        self
    }

    /// 代码单元来源
    pub fn source(&self) -> &dyn CodeUnitSource {
        self.source.as_ref()
    }

    /// 模块归档后缀
    pub fn module_suffix(&self) -> &str {
        &self.module_suffix
    }

    /// 描述符根目录
    pub fn descriptor_root(&self) -> &str {
        &self.descriptor_root
    }

    /// 条目名是否为模块归档
    pub fn is_module_archive(&self, name: &str) -> bool {
        name.ends_with(&self.module_suffix)
    }
}

impl Default for RepositoryContext {
    fn default() -> Self {
        Self::new(Arc::new(ArchiveSource::new()))
    }
}

impl fmt::Debug for RepositoryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryContext")
            .field("module_suffix", &self.module_suffix)
            .field("descriptor_root", &self.descriptor_root)
            .finish_non_exhaustive()
    }
}

/// 按 URI 协议创建仓库
///
/// - `archive:` 嵌套归档仓库
/// - `file:` 目录仓库
pub fn create_repository(uri: &str, context: &RepositoryContext) -> Result<Arc<dyn Repository>> {
    if is_archive_uri(uri) {
        debug!(repository = %uri, "创建嵌套归档仓库");
        Ok(Arc::new(NestedArchiveRepository::new(uri, context.clone())?))
    } else if uri.starts_with("file:") {
        debug!(repository = %uri, "创建目录仓库");
        Ok(Arc::new(DirectoryRepository::new(uri, context.clone())?))
    } else {
        Err(CoreError::invalid_uri(uri, "不支持的仓库协议"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_from_config() {
        let config = RepositoryConfig {
            module_suffix: ".zip".to_string(),
            descriptor_root: "/META-INF/custom-locator/".to_string(),
            ..Default::default()
        };
        let context = RepositoryContext::from_config(&config);

        assert_eq!(context.module_suffix(), ".zip");
        assert_eq!(context.descriptor_root(), "META-INF/custom-locator");
        assert!(context.is_module_archive("modules/a.zip"));
        assert!(!context.is_module_archive("modules/a.jar"));
    }

    #[test]
    fn test_unknown_scheme_is_rejected() {
        let err = create_repository("http://example.com/repo", &RepositoryContext::default())
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::InvalidUri { .. }));
    }
}
