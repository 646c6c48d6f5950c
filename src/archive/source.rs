//! 代码单元来源
//!
//! 仓库与元数据加载器通过 [`CodeUnitSource`] 打开模块归档并读取清单，
//! 不直接依赖具体的归档格式或存储位置。默认实现 [`ArchiveSource`] 支持
//! `file:` URI 与任意层嵌套的 `archive:` URI。

use std::fs::File;
use std::io::{Cursor, Read, Seek};

use tracing::debug;
use url::Url;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::archive::manifest::{Manifest, MANIFEST_PATH};
use crate::archive::uri::{is_archive_uri, ArchiveUri};
use crate::utils::{CoreError, Result};

/// 可随机访问的字节流
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// 代码单元来源
pub trait CodeUnitSource: Send + Sync {
    /// 打开 URI 指向的归档字节流
    fn open(&self, uri: &str) -> Result<Box<dyn ReadSeek>>;

    /// 读取归档的清单主段；归档中没有清单时返回 `None`
    fn manifest(&self, uri: &str) -> Result<Option<Manifest>> {
        let reader = self.open(uri).map_err(|e| CoreError::ManifestRead {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        let mut archive = ZipArchive::new(reader).map_err(|e| CoreError::ManifestRead {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        read_manifest(uri, &mut archive)
    }
}

/// 从已打开的归档读取清单主段；没有清单时返回 `None`
pub fn read_manifest<R: Read + Seek>(
    uri: &str,
    archive: &mut ZipArchive<R>,
) -> Result<Option<Manifest>> {
    let manifest_error = |reason: String| CoreError::ManifestRead {
        uri: uri.to_string(),
        reason,
    };

    let mut file = match archive.by_name(MANIFEST_PATH) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(manifest_error(e.to_string())),
    };

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| manifest_error(e.to_string()))?;
    Manifest::from_bytes(uri, &bytes).map(Some)
}

/// 把已打开归档中的一个条目作为内层归档打开
///
/// 内层归档只能整体读入内存后随机访问；`uri` 是该条目的嵌套 URI，用于错误信息。
pub fn open_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    entry: &str,
    uri: &str,
) -> Result<ZipArchive<Cursor<Vec<u8>>>> {
    let mut file = archive
        .by_name(entry)
        .map_err(|e| CoreError::unreadable(uri, e))?;

    let mut bytes = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut bytes)
        .map_err(|e| CoreError::unreadable(uri, e))?;
    ZipArchive::new(Cursor::new(bytes)).map_err(|e| CoreError::unreadable(uri, e))
}

/// 基于文件系统与嵌套归档的默认来源
///
/// 嵌套条目从最外层容器逐层打开，内层归档读入内存。仓库扫描不经过这里，
/// 扫描时直接从已打开的容器读取条目。
#[derive(Debug, Clone, Default)]
pub struct ArchiveSource;

impl ArchiveSource {
    /// 创建来源
    pub fn new() -> Self {
        Self
    }

    /// 打开 URI 并作为 ZIP 归档读取中央目录
    pub fn open_archive(&self, uri: &str) -> Result<ZipArchive<Box<dyn ReadSeek>>> {
        let reader = self.open(uri)?;
        ZipArchive::new(reader).map_err(|e| CoreError::unreadable(uri, e))
    }

    fn open_file(&self, uri: &str) -> Result<Box<dyn ReadSeek>> {
        let url = Url::parse(uri).map_err(|e| CoreError::invalid_uri(uri, e.to_string()))?;
        let path = url
            .to_file_path()
            .map_err(|_| CoreError::invalid_uri(uri, "无法转换为本地路径"))?;

        let file = File::open(&path).map_err(|e| CoreError::unreadable(uri, e))?;
        Ok(Box::new(file))
    }

    fn open_nested(&self, uri: &str) -> Result<Box<dyn ReadSeek>> {
        let parsed = ArchiveUri::parse(uri)?;
        debug!(
            container = %parsed.container(),
            entry = %parsed.entry(),
            "打开嵌套归档条目"
        );

        let mut container = self.open_archive(parsed.container())?;
        let inner = open_entry(&mut container, parsed.entry(), uri)?;
        Ok(Box::new(inner.into_inner()))
    }
}

impl CodeUnitSource for ArchiveSource {
    fn open(&self, uri: &str) -> Result<Box<dyn ReadSeek>> {
        if is_archive_uri(uri) {
            self.open_nested(uri)
        } else if uri.starts_with("file:") {
            self.open_file(uri)
        } else {
            Err(CoreError::invalid_uri(uri, "不支持的协议"))
        }
    }
}
