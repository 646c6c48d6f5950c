//! 模块元数据加载器
//!
//! 对同一个模块归档做两遍互相独立的遍历：一遍过滤服务提供者根目录，
//! 一遍过滤组件描述符根目录。条目按中央目录定位，逐个解压，
//! 同一时刻只有一个条目的内容在内存中。

use std::io::{Cursor, Read, Seek};

use tracing::{debug, error};
use zip::ZipArchive;

use crate::archive::stream::{ArchiveEntries, ArchiveEntry, LazySequence, StreamedEntry};
use crate::archive::uri::ArchiveUri;
use crate::repository::descriptor::DescriptorReader;
use crate::repository::definition::{ModuleMetadata, ModuleMetadataBuilder};
use crate::repository::factory::RepositoryContext;
use crate::utils::CoreError;

/// 服务提供者文件根目录
pub const SERVICE_ROOT: &str = "META-INF/services";

/// 模块元数据加载器
pub struct MetadataLoader<'a> {
    context: &'a RepositoryContext,
}

impl<'a> MetadataLoader<'a> {
    /// 创建加载器
    pub fn new(context: &'a RepositoryContext) -> Self {
        Self { context }
    }

    /// 通过代码单元来源打开模块归档并加载元数据
    ///
    /// 归档打不开时记录错误并返回空元数据。
    pub fn load(&self, module_uri: &str) -> ModuleMetadata {
        let opened = self
            .context
            .source()
            .open(module_uri)
            .and_then(|reader| {
                ZipArchive::new(reader).map_err(|e| CoreError::unreadable(module_uri, e))
            });

        match opened {
            Ok(mut archive) => self.load_archive(module_uri, &mut archive),
            Err(e) => {
                error!(
                    module_uri = %module_uri,
                    error = %e,
                    error_code = e.error_code(),
                    "无法打开模块归档读取元数据"
                );
                ModuleMetadata::default()
            }
        }
    }

    /// 从已打开的模块归档加载元数据
    ///
    /// 单个条目读取或解析失败时跳过该条目，其余条目照常处理。
    pub fn load_archive<R: Read + Seek>(
        &self,
        module_uri: &str,
        archive: &mut ZipArchive<R>,
    ) -> ModuleMetadata {
        let mut builder = ModuleMetadata::builder();

        for_each_entry(module_uri, archive, SERVICE_ROOT, |entry| {
            load_service(module_uri, entry, &mut builder)
        });

        let descriptor_root = self.context.descriptor_root();
        for_each_entry(module_uri, archive, descriptor_root, |entry| {
            load_descriptors(module_uri, descriptor_root, entry, &mut builder)
        });

        let metadata = builder.build();
        debug!(
            module_uri = %module_uri,
            services = metadata.service_contracts().count(),
            locators = metadata.locator_names().count(),
            "模块元数据加载完成"
        );
        metadata
    }
}

fn for_each_entry<R, F>(
    module_uri: &str,
    archive: &mut ZipArchive<R>,
    root: &str,
    mut handle: F,
) where
    R: Read + Seek,
    F: FnMut(StreamedEntry) -> Result<(), CoreError>,
{
    let prefix = format!("{}/", root.trim_end_matches('/'));
    // 中央目录已在内存中，先取出匹配的条目名
    let entries: Vec<ArchiveEntry> = {
        let mut entries = ArchiveEntries::new(archive, &prefix);
        let mut matched = Vec::new();
        while let Ok(entry) = entries.take_next() {
            matched.push(entry);
        }
        matched
    };

    for entry in entries {
        if entry.is_dir {
            continue;
        }
        let name = entry.name.clone();
        let result = read_entry(archive, &entry.name)
            .and_then(|data| handle(StreamedEntry { entry, data }));
        if let Err(e) = result {
            error!(
                module_uri = %module_uri,
                entry = %name,
                error = %e,
                error_code = e.error_code(),
                "跳过无法处理的元数据条目"
            );
        }
    }
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>, CoreError> {
    let mut file = archive.by_name(name)?;
    let mut data = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut data)?;
    Ok(data)
}

fn entry_uri(module_uri: &str, entry: &str) -> String {
    ArchiveUri::build(module_uri, entry).unwrap_or_else(|_| format!("{}!/{}", module_uri, entry))
}

fn load_service(
    module_uri: &str,
    streamed: StreamedEntry,
    builder: &mut ModuleMetadataBuilder,
) -> Result<(), CoreError> {
    if streamed.entry.is_dir {
        return Ok(());
    }
    let Some(contract) = streamed.entry.relative_to(SERVICE_ROOT) else {
        return Ok(());
    };
    let location = entry_uri(module_uri, &streamed.entry.name);

    let content = String::from_utf8(streamed.data).map_err(|e| CoreError::DescriptorParse {
        location: location.clone(),
        line: 0,
        reason: e.to_string(),
    })?;

    builder.add_service(contract.to_string(), location, content);
    Ok(())
}

fn load_descriptors(
    module_uri: &str,
    root: &str,
    streamed: StreamedEntry,
    builder: &mut ModuleMetadataBuilder,
) -> Result<(), CoreError> {
    if streamed.entry.is_dir {
        return Ok(());
    }
    let Some(locator) = streamed.entry.relative_to(root) else {
        return Ok(());
    };
    let location = entry_uri(module_uri, &streamed.entry.name);

    let descriptors = DescriptorReader::new(Cursor::new(&streamed.data), location).read_all()?;
    builder.add_descriptors(locator.to_string(), descriptors);
    Ok(())
}
