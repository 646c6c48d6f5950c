//! 组件描述符
//!
//! 描述符文件是一串自定界的记录：
//!
//! ```text
//! # 注释
//! [com.example.Impl]
//! contract={com.example.A,com.example.B}
//! name=foo
//! scope=javax.inject.Singleton
//!
//! [com.example.Other]
//! contract={com.example.C}
//! ```
//!
//! 记录以 `[实现名]` 开头，随后是 `key=value` 行，遇到空行、下一个记录头或
//! 文件结尾时结束。运行时不解释这些属性，只提供契约与名称的便捷读取。

use std::collections::BTreeMap;
use std::io::BufRead;

use serde::Serialize;

use crate::utils::{CoreError, Result};

/// 契约列表属性
pub const CONTRACT_KEY: &str = "contract";

/// 名称属性
pub const NAME_KEY: &str = "name";

/// 单条组件描述符
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentDescriptor {
    /// 实现名（记录头中的内容）
    pub implementation: String,
    /// 原始属性
    pub properties: BTreeMap<String, String>,
}

impl ComponentDescriptor {
    /// 创建空属性的描述符
    pub fn new(implementation: impl Into<String>) -> Self {
        Self {
            implementation: implementation.into(),
            properties: BTreeMap::new(),
        }
    }

    /// 设置属性
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// 读取属性
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// 声明的契约（`contract={a,b}`）
    pub fn contracts(&self) -> Vec<String> {
        self.get(CONTRACT_KEY)
            .map(|value| {
                value
                    .trim()
                    .trim_start_matches('{')
                    .trim_end_matches('}')
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 描述符名称
    pub fn name(&self) -> Option<&str> {
        self.get(NAME_KEY)
    }
}

/// 从字节流中逐条读取描述符
pub struct DescriptorReader<R> {
    reader: R,
    location: String,
    line: usize,
}

impl<R: BufRead> DescriptorReader<R> {
    /// 创建读取器；`location` 只用于错误信息
    pub fn new(reader: R, location: impl Into<String>) -> Self {
        Self {
            reader,
            location: location.into(),
            line: 0,
        }
    }

    /// 读取下一条记录，没有更多记录时返回 `None`
    pub fn next_descriptor(&mut self) -> Result<Option<ComponentDescriptor>> {
        let mut buf = String::new();

        // 跳到记录头
        let mut descriptor = loop {
            buf.clear();
            if self.read_line(&mut buf)? == 0 {
                return Ok(None);
            }
            let line = buf.trim();
            if line.is_empty() || is_comment(line) {
                continue;
            }
            match parse_header(line) {
                Some(implementation) => break ComponentDescriptor::new(implementation),
                None => return Err(self.parse_error("记录头之前出现了内容")),
            }
        };

        // 读属性，直到空行、下一个记录头或结尾
        loop {
            if self.reader.fill_buf()?.first() == Some(&b'[') {
                break;
            }

            buf.clear();
            if self.read_line(&mut buf)? == 0 {
                break;
            }
            let line = buf.trim();
            if line.is_empty() {
                break;
            }
            if is_comment(line) {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| self.parse_error("属性行缺少 '='"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(self.parse_error("属性名为空"));
            }
            descriptor
                .properties
                .insert(key.to_string(), value.trim().to_string());
        }

        Ok(Some(descriptor))
    }

    /// 读取全部剩余记录
    pub fn read_all(mut self) -> Result<Vec<ComponentDescriptor>> {
        let mut descriptors = Vec::new();
        while let Some(descriptor) = self.next_descriptor()? {
            descriptors.push(descriptor);
        }
        Ok(descriptors)
    }

    fn read_line(&mut self, buf: &mut String) -> Result<usize> {
        let read = self
            .reader
            .read_line(buf)
            .map_err(|e| self.parse_error(&e.to_string()))?;
        if read > 0 {
            self.line += 1;
        }
        Ok(read)
    }

    fn parse_error(&self, reason: &str) -> CoreError {
        CoreError::DescriptorParse {
            location: self.location.clone(),
            line: self.line,
            reason: reason.to_string(),
        }
    }
}

fn is_comment(line: &str) -> bool {
    line.starts_with('#')
}

fn parse_header(line: &str) -> Option<&str> {
    line.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
        .filter(|name| !name.is_empty())
}
