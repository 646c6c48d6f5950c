//! API 模块
//!
//! 对外提供的宿主接口。
//!
//! # 模块概览
//!
//! - `host`: ModuleHost 主接口，负责仓库装配、注册表发布、定位器管理与有序关闭

pub mod host;

// 重导出主要类型
pub use host::{HostState, ModuleHost};
