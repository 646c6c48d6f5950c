//! 嵌套归档仓库
//!
//! 仓库 URI 形如 `archive:<container-uri>!/<inner-path>`。构造时打开外层容器一次，
//! 遍历 `<inner-path>` 下所有以模块后缀结尾的条目：清单带模块身份属性的是模块，
//! 其余是普通库。模块归档直接从这个容器句柄读出，清单与元数据共用同一份内容。
//! 单个条目的清单读取失败只会让它降级为普通库。

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tracing::info;
use zip::ZipArchive;

use crate::archive::source::{open_entry, ReadSeek};
use crate::archive::stream::{ArchiveEntries, LazySequence};
use crate::archive::uri::ArchiveUri;
use crate::repository::definition::ModuleDefinition;
use crate::repository::factory::RepositoryContext;
use crate::repository::loader::MetadataLoader;
use crate::repository::{classify, Repository, RepositorySnapshot};
use crate::utils::{CoreError, Result};

struct OpenedContainer {
    // 仓库存活期间独占持有的容器句柄
    archive: ZipArchive<Box<dyn ReadSeek>>,
    snapshot: RepositorySnapshot,
}

/// 嵌套归档仓库
pub struct NestedArchiveRepository {
    uri: String,
    location: ArchiveUri,
    context: RepositoryContext,
    state: Mutex<OpenedContainer>,
}

impl NestedArchiveRepository {
    /// 打开容器并扫描
    ///
    /// # Errors
    ///
    /// - URI 不是嵌套归档 URI 时返回 [`CoreError::InvalidUri`]
    /// - 容器无法作为归档打开时返回 [`CoreError::UnreadableContainer`]
    pub fn new(uri: impl Into<String>, context: RepositoryContext) -> Result<Self> {
        let uri = uri.into();
        let location = ArchiveUri::parse(&uri)?;

        let state = open_and_scan(&uri, &location, &context)?;
        Ok(Self {
            uri,
            location,
            context,
            state: Mutex::new(state),
        })
    }

    /// 外层容器 URI
    pub fn container(&self) -> &str {
        self.location.container()
    }

    /// 容器内的扫描路径
    pub fn inner_path(&self) -> &str {
        self.location.entry()
    }

    /// 容器中的条目总数
    pub fn container_entries(&self) -> usize {
        self.lock().archive.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OpenedContainer> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn open_and_scan(
    uri: &str,
    location: &ArchiveUri,
    context: &RepositoryContext,
) -> Result<OpenedContainer> {
    let started = Instant::now();
    let container = location.container();

    let reader = context.source().open(container).map_err(|e| match e {
        CoreError::InvalidUri { .. } | CoreError::UnreadableContainer { .. } => e,
        other => CoreError::unreadable(container, other),
    })?;
    let mut archive =
        ZipArchive::new(reader).map_err(|e| CoreError::unreadable(container, e))?;

    let snapshot = scan(uri, location, &mut archive, context)?;
    info!(
        repository = %uri,
        modules = snapshot.module_count(),
        libraries = snapshot.libraries().len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "仓库扫描完成"
    );

    Ok(OpenedContainer { archive, snapshot })
}

fn scan(
    uri: &str,
    location: &ArchiveUri,
    archive: &mut ZipArchive<Box<dyn ReadSeek>>,
    context: &RepositoryContext,
) -> Result<RepositorySnapshot> {
    // 中央目录里的条目名，按归档顺序
    let mut candidates = Vec::new();
    let mut entries = ArchiveEntries::new(archive, location.entry());
    while entries.has_more()? {
        let entry = entries.take_next()?;
        if !entry.is_dir && context.is_module_archive(&entry.name) {
            candidates.push(entry.name);
        }
    }

    let mut snapshot = RepositorySnapshot::default();
    let loader = MetadataLoader::new(context);
    for name in candidates {
        let entry_uri = ArchiveUri::build(location.container(), &name)?;
        // 每个模块归档只从已打开的容器读取一次
        let opened = open_entry(archive, &name, &entry_uri);
        classify(uri, entry_uri, opened, &loader, &mut snapshot);
    }

    Ok(snapshot)
}

impl Repository for NestedArchiveRepository {
    fn name(&self) -> &str {
        &self.uri
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn find(&self, name: &str, version: &str) -> Option<Arc<ModuleDefinition>> {
        self.lock().snapshot.find(name, version)
    }

    fn find_all(&self) -> Vec<Arc<ModuleDefinition>> {
        self.lock().snapshot.find_all()
    }

    fn find_all_named(&self, name: &str) -> Vec<Arc<ModuleDefinition>> {
        self.lock().snapshot.find_all_named(name)
    }

    fn libraries(&self) -> Vec<String> {
        self.lock().snapshot.libraries()
    }

    fn refresh(&self) -> Result<()> {
        // 整个关闭、重开、重扫过程都持有锁，查询不会看到中间状态
        let mut state = self.lock();
        let reopened = open_and_scan(&self.uri, &self.location, &self.context)?;
        *state = reopened;
        Ok(())
    }
}

impl std::fmt::Debug for NestedArchiveRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NestedArchiveRepository")
            .field("uri", &self.uri)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
