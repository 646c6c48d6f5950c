//! 目录仓库
//!
//! `file:` URI 指向一个本地目录，目录下（不递归）以模块后缀结尾的文件按与
//! 嵌套归档仓库相同的规则归类为模块或普通库。

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;
use url::Url;
use zip::ZipArchive;

use crate::repository::definition::ModuleDefinition;
use crate::repository::factory::RepositoryContext;
use crate::repository::loader::MetadataLoader;
use crate::repository::{classify, Repository, RepositorySnapshot};
use crate::utils::{CoreError, Result};

/// 目录仓库
#[derive(Debug)]
pub struct DirectoryRepository {
    uri: String,
    directory: PathBuf,
    context: RepositoryContext,
    snapshot: RwLock<RepositorySnapshot>,
}

impl DirectoryRepository {
    /// 扫描目录创建仓库
    pub fn new(uri: impl Into<String>, context: RepositoryContext) -> Result<Self> {
        let uri = uri.into();
        let directory = Url::parse(&uri)
            .ok()
            .filter(|url| url.scheme() == "file")
            .and_then(|url| url.to_file_path().ok())
            .ok_or_else(|| CoreError::invalid_uri(&uri, "不是本地目录 URI"))?;

        let snapshot = scan_directory(&uri, &directory, &context)?;
        Ok(Self {
            uri,
            directory,
            context,
            snapshot: RwLock::new(snapshot),
        })
    }

    /// 本地目录路径
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RepositorySnapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn scan_directory(
    uri: &str,
    directory: &Path,
    context: &RepositoryContext,
) -> Result<RepositorySnapshot> {
    let entries = std::fs::read_dir(directory).map_err(|e| CoreError::unreadable(uri, e))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| context.is_module_archive(name))
                .unwrap_or(false)
        })
        .collect();
    // 目录遍历顺序依赖文件系统，排序后重复模块的取舍才稳定
    files.sort();

    let loader = MetadataLoader::new(context);
    let mut snapshot = RepositorySnapshot::default();
    for path in files {
        let Ok(file_uri) = Url::from_file_path(&path) else {
            continue;
        };
        let file_uri = file_uri.to_string();
        let opened = context.source().open(&file_uri).and_then(|reader| {
            ZipArchive::new(reader).map_err(|e| CoreError::unreadable(&file_uri, e))
        });
        classify(uri, file_uri, opened, &loader, &mut snapshot);
    }

    info!(
        repository = %uri,
        modules = snapshot.module_count(),
        libraries = snapshot.libraries().len(),
        "目录仓库扫描完成"
    );
    Ok(snapshot)
}

impl Repository for DirectoryRepository {
    fn name(&self) -> &str {
        &self.uri
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn find(&self, name: &str, version: &str) -> Option<Arc<ModuleDefinition>> {
        self.read().find(name, version)
    }

    fn find_all(&self) -> Vec<Arc<ModuleDefinition>> {
        self.read().find_all()
    }

    fn find_all_named(&self, name: &str) -> Vec<Arc<ModuleDefinition>> {
        self.read().find_all_named(name)
    }

    fn libraries(&self) -> Vec<String> {
        self.read().libraries()
    }

    fn refresh(&self) -> Result<()> {
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        *snapshot = scan_directory(&self.uri, &self.directory, &self.context)?;
        Ok(())
    }
}
