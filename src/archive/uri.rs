//! 嵌套归档 URI
//!
//! 格式：`archive:<container-uri>!/<inner-path>`。`<container-uri>` 自身也可以是
//! 嵌套归档 URI，此时外层不会重复添加 `archive:` 前缀：
//!
//! ```text
//! archive:file:/opt/app.zip!/modules/a.jar            容器 file:/opt/app.zip
//! archive:file:/opt/app.zip!/modules/a.jar!/lib/b.jar 容器 archive:file:/opt/app.zip!/modules/a.jar
//! ```
//!
//! 构造与解析互逆：`parse(build(c, e)) == (c, e)`。

use std::fmt;

use crate::utils::{CoreError, Result};

/// 嵌套归档协议名
pub const ARCHIVE_SCHEME: &str = "archive";

/// 协议前缀
const ARCHIVE_PREFIX: &str = "archive:";

/// 容器与内部路径之间的分隔符
pub const INNER_PATH_SEPARATOR: &str = "!/";

/// 判断 URI 是否使用嵌套归档协议
pub fn is_archive_uri(uri: &str) -> bool {
    uri.starts_with(ARCHIVE_PREFIX)
}

/// 解析后的嵌套归档 URI
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveUri {
    container: String,
    entry: String,
}

impl ArchiveUri {
    /// 由容器 URI 与条目名构造
    ///
    /// 条目名不能包含 `!/`，否则解析时无法还原。
    pub fn new(container: impl Into<String>, entry: impl Into<String>) -> Result<Self> {
        let container = container.into();
        let entry = entry.into();

        if container.is_empty() {
            return Err(CoreError::invalid_uri(&container, "容器 URI 为空"));
        }
        if entry.contains(INNER_PATH_SEPARATOR) {
            return Err(CoreError::invalid_uri(
                &entry,
                "条目名不能包含 '!/' 分隔符",
            ));
        }
        if is_archive_uri(&container) {
            if !container[ARCHIVE_PREFIX.len()..].contains(INNER_PATH_SEPARATOR) {
                return Err(CoreError::invalid_uri(&container, "嵌套容器缺少 '!/' 分隔符"));
            }
        } else {
            if !container.contains(':') {
                return Err(CoreError::invalid_uri(&container, "容器 URI 缺少协议"));
            }
            if container.contains(INNER_PATH_SEPARATOR) {
                return Err(CoreError::invalid_uri(
                    &container,
                    "非嵌套容器 URI 不能包含 '!/'",
                ));
            }
        }

        Ok(Self { container, entry })
    }

    /// 解析 `archive:<container>!/<entry>`
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix(ARCHIVE_PREFIX)
            .ok_or_else(|| CoreError::invalid_uri(uri, "不是嵌套归档 URI"))?;

        let split = rest
            .rfind(INNER_PATH_SEPARATOR)
            .ok_or_else(|| CoreError::invalid_uri(uri, "缺少 '!/' 分隔符"))?;

        let inner = &rest[..split];
        let entry = &rest[split + INNER_PATH_SEPARATOR.len()..];

        if inner.is_empty() {
            return Err(CoreError::invalid_uri(uri, "容器 URI 为空"));
        }

        // 容器部分仍含分隔符时它本身就是嵌套归档
        let container = if inner.contains(INNER_PATH_SEPARATOR) {
            format!("{}{}", ARCHIVE_PREFIX, inner)
        } else {
            inner.to_string()
        };

        Self::new(container, entry)
    }

    /// 拼出条目 URI 字符串
    pub fn build(container: &str, entry: &str) -> Result<String> {
        Ok(Self::new(container, entry)?.to_string())
    }

    /// 容器 URI
    pub fn container(&self) -> &str {
        &self.container
    }

    /// 容器内的条目路径
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// 容器是否本身就是嵌套归档
    pub fn is_nested(&self) -> bool {
        is_archive_uri(&self.container)
    }

    /// 以本 URI 为容器，派生子条目的 URI
    pub fn child(&self, entry: &str) -> Result<ArchiveUri> {
        ArchiveUri::new(self.to_string(), entry)
    }

    /// 条目路径的最后一段
    pub fn base_name(&self) -> &str {
        self.entry
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.entry)
    }
}

impl fmt::Display for ArchiveUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let container = self
            .container
            .strip_prefix(ARCHIVE_PREFIX)
            .unwrap_or(&self.container);
        write!(
            f,
            "{}{}{}{}",
            ARCHIVE_PREFIX, container, INNER_PATH_SEPARATOR, self.entry
        )
    }
}
