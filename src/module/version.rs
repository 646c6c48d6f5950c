//! 模块版本与版本范围
//!
//! 清单中的版本写法是 `major[.minor[.micro[.qualifier]]]`，版本范围写法是区间
//! `[1.0,2.0)` 或单个版本 `1.2`（表示“不低于”）。这里统一映射到 [`semver::Version`]：
//! 缺省段补零，qualifier 存为构建元数据，范围比较时不参与。

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use semver::{BuildMetadata, Version};

use crate::utils::{CoreError, Result};

/// 区间写法：`[min,max)`、`(min,max]` 等
fn interval_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([\[\(])\s*([^,\s]+)\s*,\s*([^\]\)\s]+)\s*([\]\)])$")
            .unwrap_or_else(|e| panic!("内置版本区间正则无效: {}", e))
    })
}

/// 解析清单版本
///
/// ```
/// use chips_habitat::module::version::parse_version;
///
/// let v = parse_version("1.2").unwrap();
/// assert_eq!(v.to_string(), "1.2.0");
/// ```
pub fn parse_version(text: &str) -> Result<Version> {
    let text = text.trim().trim_matches('"');
    let invalid = || CoreError::InvalidVersion(text.to_string());

    let mut numbers = [0u64; 3];
    let mut rest = text;
    let mut qualifier = "";
    for (index, slot) in numbers.iter_mut().enumerate() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(invalid());
        }
        *slot = rest[..digits].parse().map_err(|_| invalid())?;

        let tail = &rest[digits..];
        match tail.chars().next() {
            None => break,
            Some('.') if index < 2 => rest = &tail[1..],
            // `1.0.0.qualifier`、`1.0.0-SNAPSHOT`、`1.0_beta`
            Some('.' | '-' | '_') => {
                qualifier = &tail[1..];
                break;
            }
            Some(_) => {
                qualifier = tail;
                break;
            }
        }
    }

    let mut version = Version::new(numbers[0], numbers[1], numbers[2]);
    if !qualifier.is_empty() {
        version.build = BuildMetadata::new(&sanitize_qualifier(qualifier))?;
    }
    Ok(version)
}

/// 把 qualifier 改写成合法的构建元数据：非法字符换成 `-`，空段写成 `-`
fn sanitize_qualifier(qualifier: &str) -> String {
    qualifier
        .split('.')
        .map(|segment| {
            if segment.is_empty() {
                "-".to_string()
            } else {
                segment
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
                    .collect()
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn precedence(version: &Version) -> (u64, u64, u64) {
    (version.major, version.minor, version.patch)
}

/// 版本范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    min: Version,
    min_inclusive: bool,
    max: Option<Version>,
    max_inclusive: bool,
}

impl VersionRange {
    /// 任意版本
    pub fn any() -> Self {
        Self::at_least(Version::new(0, 0, 0))
    }

    /// 不低于 `min`
    pub fn at_least(min: Version) -> Self {
        Self {
            min,
            min_inclusive: true,
            max: None,
            max_inclusive: false,
        }
    }

    /// 只匹配 `version`
    pub fn exact(version: Version) -> Self {
        Self {
            min: version.clone(),
            min_inclusive: true,
            max: Some(version),
            max_inclusive: true,
        }
    }

    /// 解析范围；空串表示任意版本
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim().trim_matches('"').trim();
        if text.is_empty() {
            return Ok(Self::any());
        }

        if let Some(caps) = interval_pattern().captures(text) {
            let min = parse_version(&caps[2])?;
            let max = parse_version(&caps[3])?;
            if precedence(&min) > precedence(&max) {
                return Err(CoreError::InvalidVersion(text.to_string()));
            }
            return Ok(Self {
                min,
                min_inclusive: &caps[1] == "[",
                max: Some(max),
                max_inclusive: &caps[4] == "]",
            });
        }

        if text.starts_with('[') || text.starts_with('(') {
            return Err(CoreError::InvalidVersion(text.to_string()));
        }
        Ok(Self::at_least(parse_version(text)?))
    }

    /// 版本是否落在范围内
    pub fn includes(&self, version: &Version) -> bool {
        let v = precedence(version);
        let min = precedence(&self.min);

        let above_min = if self.min_inclusive { v >= min } else { v > min };
        if !above_min {
            return false;
        }

        match &self.max {
            None => true,
            Some(max) => {
                let max = precedence(max);
                if self.max_inclusive {
                    v <= max
                } else {
                    v < max
                }
            }
        }
    }

    /// 解析 `version` 文本后判断
    pub fn includes_str(&self, version: &str) -> bool {
        parse_version(version)
            .map(|v| self.includes(&v))
            .unwrap_or(false)
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.max {
            None => write!(f, "{}", self.min),
            Some(max) => write!(
                f,
                "{}{},{}{}",
                if self.min_inclusive { '[' } else { '(' },
                self.min,
                max,
                if self.max_inclusive { ']' } else { ')' }
            ),
        }
    }
}
