//! 模块管理
//!
//! 包含：
//! - 运行时模块与生命周期状态机
//! - 模块注册表
//! - 清单版本与版本范围

pub mod lifecycle;
pub mod registry;
pub mod version;

// 重导出常用类型
pub use lifecycle::{Module, ModuleEvent, ModuleListener, ModuleState};
pub use registry::ModulesRegistry;
pub use version::{parse_version, VersionRange};
