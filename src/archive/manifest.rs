//! 模块清单
//!
//! 解析 `META-INF/MANIFEST.MF` 的主段：`Key: Value` 行，以单个空格开头的行
//! 续接到上一行的值之后，第一个空行结束主段。属性名大小写不敏感。

use std::collections::BTreeMap;

use crate::utils::{CoreError, Result};

/// 清单在归档中的路径
pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

/// 模块显示名；存在即表示该归档是一个模块
pub const BUNDLE_NAME: &str = "Bundle-Name";

/// 模块符号名
pub const BUNDLE_SYMBOLIC_NAME: &str = "Bundle-SymbolicName";

/// 模块版本
pub const BUNDLE_VERSION: &str = "Bundle-Version";

/// 依赖的模块列表
pub const REQUIRE_BUNDLE: &str = "Require-Bundle";

/// 导出的包列表
pub const EXPORT_PACKAGE: &str = "Export-Package";

/// 未声明版本时使用的版本
pub const DEFAULT_VERSION: &str = "0.0.0";

/// 清单主段属性
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    /// 小写属性名 -> (原始属性名, 值)
    attributes: BTreeMap<String, (String, String)>,
}

/// `Require-Bundle` 中的一项依赖
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredBundle {
    /// 依赖的模块名
    pub name: String,
    /// `bundle-version` 版本范围原文
    pub version_range: Option<String>,
    /// `resolution:=optional`
    pub optional: bool,
}

impl Manifest {
    /// 解析清单文本；`uri` 只用于错误信息
    pub fn parse(uri: &str, text: &str) -> Result<Self> {
        let mut manifest = Manifest::default();
        let mut current: Option<(String, String)> = None;

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim_end_matches('\r');

            if line.is_empty() {
                break;
            }

            if let Some(continuation) = line.strip_prefix(' ') {
                match current.as_mut() {
                    Some((_, value)) => value.push_str(continuation),
                    None => {
                        return Err(CoreError::ManifestRead {
                            uri: uri.to_string(),
                            reason: format!("第 {} 行: 续行前没有属性", index + 1),
                        })
                    }
                }
                continue;
            }

            let (key, value) = line.split_once(':').ok_or_else(|| CoreError::ManifestRead {
                uri: uri.to_string(),
                reason: format!("第 {} 行: 缺少 ':'", index + 1),
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(CoreError::ManifestRead {
                    uri: uri.to_string(),
                    reason: format!("第 {} 行: 属性名为空", index + 1),
                });
            }

            if let Some((key, value)) = current.take() {
                manifest.insert(key, value);
            }
            current = Some((key.to_string(), value.trim_start().to_string()));
        }

        if let Some((key, value)) = current.take() {
            manifest.insert(key, value);
        }

        Ok(manifest)
    }

    /// 由原始字节解析
    pub fn from_bytes(uri: &str, bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| CoreError::ManifestRead {
            uri: uri.to_string(),
            reason: format!("不是有效的 UTF-8: {}", e),
        })?;
        Self::parse(uri, text)
    }

    fn insert(&mut self, key: String, value: String) {
        // 重复属性以先出现的为准
        self.attributes
            .entry(key.to_ascii_lowercase())
            .or_insert((key, value));
    }

    /// 读取属性值
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(&key.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    /// 属性数量
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// 是否没有任何属性
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// 遍历 (原始属性名, 值)
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .values()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// 是否带有模块身份属性
    pub fn has_bundle_identity(&self) -> bool {
        self.get(BUNDLE_NAME).is_some()
    }

    /// 模块名：优先取符号名（去掉指令部分），否则取显示名
    pub fn bundle_name(&self) -> Option<String> {
        if !self.has_bundle_identity() {
            return None;
        }
        self.get(BUNDLE_SYMBOLIC_NAME)
            .and_then(|value| value.split(';').next())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .or_else(|| self.get(BUNDLE_NAME).map(str::trim))
            .map(str::to_string)
    }

    /// 模块版本，未声明时为 `0.0.0`
    pub fn bundle_version(&self) -> &str {
        self.get(BUNDLE_VERSION)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_VERSION)
    }

    /// 解析 `Require-Bundle`
    pub fn required_bundles(&self) -> Vec<RequiredBundle> {
        let Some(value) = self.get(REQUIRE_BUNDLE) else {
            return Vec::new();
        };

        split_clauses(value)
            .into_iter()
            .filter_map(|clause| {
                let mut parts = split_outside_quotes(&clause, ';').into_iter();
                let name = parts.next()?.trim().to_string();
                if name.is_empty() {
                    return None;
                }

                let mut required = RequiredBundle {
                    name,
                    version_range: None,
                    optional: false,
                };
                for part in parts {
                    let part = part.trim();
                    if let Some(value) = part.strip_prefix("bundle-version=") {
                        required.version_range = Some(unquote(value).to_string());
                    } else if let Some(value) = part.strip_prefix("resolution:=") {
                        required.optional = unquote(value) == "optional";
                    }
                }
                Some(required)
            })
            .collect()
    }

    /// 解析 `Export-Package`，只保留包名
    pub fn exported_packages(&self) -> Vec<String> {
        let Some(value) = self.get(EXPORT_PACKAGE) else {
            return Vec::new();
        };

        split_clauses(value)
            .into_iter()
            .flat_map(|clause| {
                // `a;b;version=1.0` 中没有 '=' 的段都是包名
                split_outside_quotes(&clause, ';')
                    .into_iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty() && !s.contains('='))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// 按逗号拆分子句，引号内的逗号不拆分
fn split_clauses(value: &str) -> Vec<String> {
    split_outside_quotes(value, ',')
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_outside_quotes(value: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in value.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if c == separator && !quoted => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn unquote(value: &str) -> &str {
    value.trim().trim_matches('"')
}
