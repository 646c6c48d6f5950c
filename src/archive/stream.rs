//! 归档条目流
//!
//! 以拉取方式惰性遍历归档条目，只产出路径以指定前缀开头的条目。
//!
//! 所有序列都遵循同一约定：
//!
//! - 至多缓冲一个前瞻元素，内存占用与归档大小无关
//! - `has_more` 会推进底层数据源（跳过不匹配的条目），但在前瞻元素被取走之前
//!   重复调用不会继续推进
//! - `take_next` 在没有元素时返回 [`CoreError::ExhaustedSequence`]
//! - 只能向前、不可重启；需要再遍历一次时重新打开数据源

use std::io::{self, BufReader, Read, Seek};

use flate2::bufread::DeflateDecoder as BufDeflateDecoder;
use flate2::read::DeflateDecoder;
use flate2::Crc;
use zip::ZipArchive;

use crate::utils::{CoreError, Result};

/// 惰性序列
pub trait LazySequence {
    /// 元素类型
    type Item;

    /// 是否还有元素（可能需要读取并跳过不匹配的条目）
    fn has_more(&mut self) -> Result<bool>;

    /// 取出下一个元素
    fn take_next(&mut self) -> Result<Self::Item>;

    /// 转换为 `Iterator<Item = Result<T>>`；出错后迭代结束
    fn results(self) -> Results<Self>
    where
        Self: Sized,
    {
        Results {
            inner: self,
            failed: false,
        }
    }
}

/// [`LazySequence`] 的迭代器适配
pub struct Results<S> {
    inner: S,
    failed: bool,
}

impl<S: LazySequence> Iterator for Results<S> {
    type Item = Result<S::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.inner.has_more() {
            Ok(true) => Some(self.inner.take_next()),
            Ok(false) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// 规范化路径前缀（合并重复的 `/`）
pub fn normalize_prefix(prefix: &str) -> String {
    let mut normalized = prefix.to_string();
    while normalized.contains("//") {
        normalized = normalized.replace("//", "/");
    }
    normalized
}

/// 归档条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// 条目在归档中的完整路径
    pub name: String,
    /// 是否为目录条目
    pub is_dir: bool,
}

impl ArchiveEntry {
    /// 条目相对于 `root` 目录的剩余路径
    ///
    /// 条目不在 `root/` 之下或剩余路径为空时返回 `None`。
    pub fn relative_to(&self, root: &str) -> Option<&str> {
        let root = root.trim_end_matches('/');
        self.name
            .strip_prefix(root)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
    }
}

/// 流式读取到的条目及其内容副本
///
/// 底层流不能回退，所以匹配的条目在读取时就解压到内存中。
#[derive(Debug, Clone)]
pub struct StreamedEntry {
    /// 条目信息
    pub entry: ArchiveEntry,
    /// 解压后的内容
    pub data: Vec<u8>,
}

// ============================================================================
// 随机访问归档上的条目序列
// ============================================================================

/// 已打开的随机访问归档上的条目序列
///
/// 只读取中央目录中的条目名，不解压任何内容。
pub struct ArchiveEntries<'a, R> {
    archive: &'a ZipArchive<R>,
    prefix: String,
    index: usize,
    lookahead: Option<ArchiveEntry>,
}

impl<'a, R: Read + Seek> ArchiveEntries<'a, R> {
    /// 创建按前缀过滤的条目序列
    pub fn new(archive: &'a ZipArchive<R>, prefix: &str) -> Self {
        Self {
            archive,
            prefix: normalize_prefix(prefix),
            index: 0,
            lookahead: None,
        }
    }
}

impl<R: Read + Seek> LazySequence for ArchiveEntries<'_, R> {
    type Item = ArchiveEntry;

    fn has_more(&mut self) -> Result<bool> {
        if self.lookahead.is_some() {
            return Ok(true);
        }

        while self.index < self.archive.len() {
            let index = self.index;
            self.index += 1;

            let Some(name) = self.archive.name_for_index(index) else {
                continue;
            };
            if name.starts_with(&self.prefix) {
                self.lookahead = Some(ArchiveEntry {
                    name: name.to_string(),
                    is_dir: name.ends_with('/'),
                });
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn take_next(&mut self) -> Result<ArchiveEntry> {
        self.has_more()?;
        self.lookahead.take().ok_or(CoreError::ExhaustedSequence)
    }
}

// ============================================================================
// 顺序字节流上的条目序列
// ============================================================================

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;
const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;

const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

const ZIP64_EXTRA_FIELD: u16 = 0x0001;
const ZIP64_MARKER: u32 = 0xFFFF_FFFF;

/// 本地文件头
#[derive(Debug)]
struct LocalHeader {
    name: String,
    flags: u16,
    method: u16,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    zip64: bool,
}

impl LocalHeader {
    fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }
}

fn invalid_stream(reason: impl Into<String>) -> CoreError {
    CoreError::Io(io::Error::new(io::ErrorKind::InvalidData, reason.into()))
}

fn read_u16<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// 读取记录签名；流在记录边界上结束时返回 `None`
fn read_signature<R: Read>(reader: &mut R) -> io::Result<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(Some(u32::from_le_bytes(buf)))
}

/// 解压结果：内容（丢弃模式下为空）、CRC 与解压后长度
struct Decoded {
    data: Vec<u8>,
    crc32: u32,
    size: u64,
}

fn decode<R: Read>(mut source: R, keep: bool) -> io::Result<Decoded> {
    let mut data = Vec::new();
    let mut crc = Crc::new();
    let mut size = 0u64;
    let mut buf = [0u8; 8 * 1024];
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        crc.update(&buf[..n]);
        size += n as u64;
        if keep {
            data.extend_from_slice(&buf[..n]);
        }
    }
    Ok(Decoded {
        data,
        crc32: crc.sum(),
        size,
    })
}

/// 顺序字节流上的条目序列
///
/// 逐个解析本地文件头，不依赖中央目录，因此可以用在不可回退的输入上。
/// 不匹配的条目边读边丢弃。写入时不知道长度的条目（通用标志第 3 位，
/// `jar` 工具写出的压缩条目都是这样）通过解压到压缩流结尾来定位数据描述符。
pub struct StreamEntries<R> {
    reader: BufReader<R>,
    prefix: String,
    lookahead: Option<StreamedEntry>,
    finished: bool,
}

impl<R: Read> StreamEntries<R> {
    /// 创建按前缀过滤的流式条目序列
    pub fn new(reader: R, prefix: &str) -> Self {
        Self {
            reader: BufReader::new(reader),
            prefix: normalize_prefix(prefix),
            lookahead: None,
            finished: false,
        }
    }

    fn read_matching(&mut self) -> Result<Option<StreamedEntry>> {
        loop {
            let Some(header) = self.read_header()? else {
                return Ok(None);
            };

            let matched = header.name.starts_with(&self.prefix);
            let data = self.read_body(&header, matched)?;
            if !matched {
                continue;
            }

            let entry = ArchiveEntry {
                is_dir: header.name.ends_with('/'),
                name: header.name,
            };
            return Ok(Some(StreamedEntry { entry, data }));
        }
    }

    fn read_header(&mut self) -> Result<Option<LocalHeader>> {
        let reader = &mut self.reader;
        match read_signature(reader)? {
            Some(LOCAL_HEADER_SIGNATURE) => {}
            // 条目区之后是中央目录
            None | Some(CENTRAL_HEADER_SIGNATURE) | Some(END_OF_CENTRAL_DIRECTORY_SIGNATURE) => {
                return Ok(None)
            }
            Some(other) => {
                return Err(invalid_stream(format!("未知的记录签名 {:#010x}", other)));
            }
        }

        let _version = read_u16(reader)?;
        let flags = read_u16(reader)?;
        let method = read_u16(reader)?;
        let _modified = read_u32(reader)?;
        let crc32 = read_u32(reader)?;
        let compressed = read_u32(reader)?;
        let uncompressed = read_u32(reader)?;
        let name_len = read_u16(reader)? as usize;
        let extra_len = read_u16(reader)? as usize;

        let mut name = vec![0u8; name_len];
        reader.read_exact(&mut name)?;
        let mut extra = vec![0u8; extra_len];
        reader.read_exact(&mut extra)?;

        let mut header = LocalHeader {
            name: String::from_utf8_lossy(&name).into_owned(),
            flags,
            method,
            crc32,
            compressed_size: compressed as u64,
            uncompressed_size: uncompressed as u64,
            zip64: false,
        };
        apply_zip64_extra(&mut header, compressed, uncompressed, &extra);
        Ok(Some(header))
    }

    fn read_body(&mut self, header: &LocalHeader, keep: bool) -> Result<Vec<u8>> {
        if header.flags & FLAG_ENCRYPTED != 0 {
            return Err(invalid_stream(format!("条目 {} 已加密", header.name)));
        }

        if !header.has_data_descriptor() {
            let mut limited = (&mut self.reader).take(header.compressed_size);
            if !keep {
                io::copy(&mut limited, &mut io::sink())?;
                return Ok(Vec::new());
            }
            let decoded = match header.method {
                METHOD_STORED => decode(&mut limited, true)?,
                METHOD_DEFLATED => decode(DeflateDecoder::new(&mut limited), true)?,
                other => return Err(unsupported_method(&header.name, other)),
            };
            // 解压器可能没有读到压缩数据末尾的填充
            io::copy(&mut limited, &mut io::sink())?;
            verify(header, &decoded, header.crc32, header.uncompressed_size)?;
            return Ok(decoded.data);
        }

        // 长度写在数据之后，只能靠压缩流自身的结束标记定位
        let decoded = match header.method {
            METHOD_DEFLATED => decode(BufDeflateDecoder::new(&mut self.reader), keep)?,
            METHOD_STORED => {
                return Err(invalid_stream(format!(
                    "条目 {} 未压缩且长度未知，无法顺序读取",
                    header.name
                )))
            }
            other => return Err(unsupported_method(&header.name, other)),
        };

        let (crc32, size) = self.read_data_descriptor(header.zip64)?;
        verify(header, &decoded, crc32, size)?;
        Ok(decoded.data)
    }

    fn read_data_descriptor(&mut self, zip64: bool) -> Result<(u32, u64)> {
        let reader = &mut self.reader;
        // 描述符签名可省略
        let mut crc32 = read_u32(reader)?;
        if crc32 == DATA_DESCRIPTOR_SIGNATURE {
            crc32 = read_u32(reader)?;
        }
        let size = if zip64 {
            let _compressed = read_u64(reader)?;
            read_u64(reader)?
        } else {
            let _compressed = read_u32(reader)?;
            read_u32(reader)? as u64
        };
        Ok((crc32, size))
    }
}

fn apply_zip64_extra(header: &mut LocalHeader, compressed: u32, uncompressed: u32, extra: &[u8]) {
    let mut rest = extra;
    while rest.len() >= 4 {
        let id = u16::from_le_bytes([rest[0], rest[1]]);
        let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        let Some(body) = rest.get(4..4 + len) else {
            return;
        };

        if id == ZIP64_EXTRA_FIELD {
            header.zip64 = true;
            let mut values = body
                .chunks_exact(8)
                .map(|chunk| chunk.iter().rev().fold(0u64, |acc, b| (acc << 8) | *b as u64));
            if uncompressed == ZIP64_MARKER {
                if let Some(value) = values.next() {
                    header.uncompressed_size = value;
                }
            }
            if compressed == ZIP64_MARKER {
                if let Some(value) = values.next() {
                    header.compressed_size = value;
                }
            }
            return;
        }
        rest = &rest[4 + len..];
    }
}

fn unsupported_method(name: &str, method: u16) -> CoreError {
    invalid_stream(format!("条目 {} 使用了不支持的压缩方法 {}", name, method))
}

fn verify(header: &LocalHeader, decoded: &Decoded, crc32: u32, size: u64) -> Result<()> {
    if decoded.size != size || decoded.crc32 != crc32 {
        return Err(invalid_stream(format!(
            "条目 {} 校验失败：长度 {}/{}，CRC {:#010x}/{:#010x}",
            header.name, decoded.size, size, decoded.crc32, crc32
        )));
    }
    Ok(())
}

impl<R: Read> LazySequence for StreamEntries<R> {
    type Item = StreamedEntry;

    fn has_more(&mut self) -> Result<bool> {
        if self.lookahead.is_some() {
            return Ok(true);
        }
        if self.finished {
            return Ok(false);
        }

        match self.read_matching() {
            Ok(Some(entry)) => {
                self.lookahead = Some(entry);
                Ok(true)
            }
            Ok(None) => {
                self.finished = true;
                Ok(false)
            }
            Err(e) => {
                self.finished = true;
                Err(e)
            }
        }
    }

    fn take_next(&mut self) -> Result<StreamedEntry> {
        self.has_more()?;
        self.lookahead.take().ok_or(CoreError::ExhaustedSequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, content) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    /// 按 `jar` 工具的方式写出：长度与 CRC 放在数据之后的描述符里
    fn descriptor_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        use flate2::write::DeflateEncoder;
        use flate2::Compression;

        const DOS_DATE: u16 = (44 << 9) | (1 << 5) | 1;

        let mut out = Vec::new();
        let mut central = Vec::new();
        for (name, content) in entries {
            let offset = out.len() as u32;
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(content).unwrap();
            let compressed = encoder.finish().unwrap();
            let mut crc = Crc::new();
            crc.update(content);

            out.extend_from_slice(&LOCAL_HEADER_SIGNATURE.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&FLAG_DATA_DESCRIPTOR.to_le_bytes());
            out.extend_from_slice(&METHOD_DEFLATED.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&DOS_DATE.to_le_bytes());
            out.extend_from_slice(&[0u8; 12]);
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&compressed);
            out.extend_from_slice(&DATA_DESCRIPTOR_SIGNATURE.to_le_bytes());
            out.extend_from_slice(&crc.sum().to_le_bytes());
            out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
            out.extend_from_slice(&(content.len() as u32).to_le_bytes());

            central.extend_from_slice(&CENTRAL_HEADER_SIGNATURE.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&FLAG_DATA_DESCRIPTOR.to_le_bytes());
            central.extend_from_slice(&METHOD_DEFLATED.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&DOS_DATE.to_le_bytes());
            central.extend_from_slice(&crc.sum().to_le_bytes());
            central.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
            central.extend_from_slice(&(content.len() as u32).to_le_bytes());
            central.extend_from_slice(&(name.len() as u16).to_le_bytes());
            central.extend_from_slice(&[0u8; 8]);
            central.extend_from_slice(&0u32.to_le_bytes());
            central.extend_from_slice(&offset.to_le_bytes());
            central.extend_from_slice(name.as_bytes());
        }

        let central_offset = out.len() as u32;
        out.extend_from_slice(&central);
        out.extend_from_slice(&END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&(central.len() as u32).to_le_bytes());
        out.extend_from_slice(&central_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }

    fn sample() -> Vec<u8> {
        build_zip(&[
            ("META-INF/MANIFEST.MF", "Manifest-Version: 1.0\n"),
            ("modules/", ""),
            ("modules/a.jar", "a"),
            ("other/x.txt", "x"),
            ("modules/b.jar", "b"),
            ("modules/readme.txt", "r"),
        ])
    }

    #[test]
    fn test_archive_entries_filter_by_prefix_in_order() {
        let archive = ZipArchive::new(Cursor::new(sample())).unwrap();
        let names: Vec<String> = ArchiveEntries::new(&archive, "modules/")
            .results()
            .map(|e| e.unwrap().name)
            .collect();

        assert_eq!(
            names,
            vec!["modules/", "modules/a.jar", "modules/b.jar", "modules/readme.txt"]
        );
    }

    #[test]
    fn test_has_more_is_idempotent() {
        let archive = ZipArchive::new(Cursor::new(sample())).unwrap();
        let mut entries = ArchiveEntries::new(&archive, "other/");

        assert!(entries.has_more().unwrap());
        assert!(entries.has_more().unwrap());
        assert_eq!(entries.take_next().unwrap().name, "other/x.txt");
        assert!(!entries.has_more().unwrap());
        assert!(!entries.has_more().unwrap());
    }

    #[test]
    fn test_take_next_past_end_is_exhausted() {
        let archive = ZipArchive::new(Cursor::new(sample())).unwrap();
        let mut entries = ArchiveEntries::new(&archive, "missing/");
        assert!(matches!(
            entries.take_next(),
            Err(CoreError::ExhaustedSequence)
        ));
    }

    #[test]
    fn test_prefix_is_normalized() {
        let archive = ZipArchive::new(Cursor::new(sample())).unwrap();
        let count = ArchiveEntries::new(&archive, "modules//").results().count();
        assert_eq!(count, 4);
        assert_eq!(normalize_prefix("a///b"), "a/b");
    }

    #[test]
    fn test_stream_entries_copy_matching_content() {
        let bytes = sample();
        let entries: Vec<StreamedEntry> = StreamEntries::new(Cursor::new(bytes), "modules/")
            .results()
            .collect::<Result<_>>()
            .unwrap();

        let files: Vec<(&str, &[u8])> = entries
            .iter()
            .filter(|e| !e.entry.is_dir)
            .map(|e| (e.entry.name.as_str(), e.data.as_slice()))
            .collect();
        assert_eq!(
            files,
            vec![
                ("modules/a.jar", b"a".as_slice()),
                ("modules/b.jar", b"b".as_slice()),
                ("modules/readme.txt", b"r".as_slice()),
            ]
        );
    }

    #[test]
    fn test_stream_entries_stop_at_central_directory() {
        let mut entries = StreamEntries::new(Cursor::new(sample()), "other/");
        assert_eq!(entries.take_next().unwrap().data, b"x");
        assert!(!entries.has_more().unwrap());
        assert!(matches!(
            entries.take_next(),
            Err(CoreError::ExhaustedSequence)
        ));
    }

    #[test]
    fn test_stream_entries_read_data_descriptor_entries() {
        let bytes = descriptor_zip(&[
            ("META-INF/MANIFEST.MF", b"Bundle-Name: a\r\n".as_slice()),
            ("META-INF/services/com.example.Api", b"com.example.Impl\n".as_slice()),
            (
                "META-INF/hk2-locator/default",
                b"[com.example.Impl]\ncontract={com.example.Api}\n".as_slice(),
            ),
        ]);

        let mut services = StreamEntries::new(Cursor::new(bytes.clone()), "META-INF/services/");
        let entry = services.take_next().unwrap();
        assert_eq!(entry.entry.name, "META-INF/services/com.example.Api");
        assert_eq!(entry.data, b"com.example.Impl\n");
        assert!(!services.has_more().unwrap());

        // 跳过的条目同样要解压才能找到下一个文件头
        let all: Vec<StreamedEntry> = StreamEntries::new(Cursor::new(bytes), "")
            .results()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].data, b"[com.example.Impl]\ncontract={com.example.Api}\n");
    }

    #[test]
    fn test_random_access_reads_data_descriptor_entries() {
        let bytes = descriptor_zip(&[("META-INF/services/com.example.Api", b"com.example.Impl\n")]);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();

        let mut content = String::new();
        archive
            .by_name("META-INF/services/com.example.Api")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "com.example.Impl\n");
    }

    #[test]
    fn test_stream_error_ends_iteration() {
        let garbage = Cursor::new(b"PK\x03\x04 definitely not a zip".to_vec());
        let mut results = StreamEntries::new(garbage, "").results();
        assert!(matches!(results.next(), Some(Err(_))));
        assert!(results.next().is_none());
    }

    #[test]
    fn test_relative_to() {
        let entry = ArchiveEntry {
            name: "META-INF/services/com.example.Api".into(),
            is_dir: false,
        };
        assert_eq!(entry.relative_to("META-INF/services"), Some("com.example.Api"));
        assert_eq!(entry.relative_to("META-INF/services/"), Some("com.example.Api"));
        assert_eq!(entry.relative_to("META-INF/hk2-locator"), None);

        let root = ArchiveEntry {
            name: "META-INF/services/".into(),
            is_dir: true,
        };
        assert_eq!(root.relative_to("META-INF/services"), None);
    }
}
