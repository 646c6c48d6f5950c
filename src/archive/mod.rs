//! 归档访问层
//!
//! 包含：
//! - 惰性条目流与展平序列
//! - 嵌套归档 URI
//! - 清单解析
//! - 代码单元来源抽象及默认实现

pub mod flatten;
pub mod manifest;
pub mod source;
pub mod stream;
pub mod uri;

pub use flatten::FlattenSequence;
pub use manifest::{Manifest, RequiredBundle};
pub use source::{open_entry, read_manifest, ArchiveSource, CodeUnitSource, ReadSeek};
pub use stream::{ArchiveEntries, ArchiveEntry, LazySequence, StreamEntries, StreamedEntry};
pub use uri::{is_archive_uri, ArchiveUri};
