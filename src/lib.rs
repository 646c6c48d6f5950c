//! # Chips Habitat - 薯片模块运行时
//!
//! 可插拔模块运行时，在不重启进程的前提下发现、管理并桥接模块：
//!
//! - **归档扫描**: 惰性流式遍历嵌套归档，不整体解包即可读取清单与描述符
//! - **模块仓库**: 从嵌套归档或本地目录发现模块定义与普通库
//! - **生命周期**: 模块的解析、启用、停止与卸载状态机
//! - **服务桥接**: 外部服务注册表与内部定位器之间的对称同步
//! - **日志系统**: 结构化日志记录
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chips_habitat::{HostConfig, InProcessServiceRegistry, ModuleHost};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = HostConfig::default();
//!     config.apply_env();
//!
//!     let host = ModuleHost::new(config, Arc::new(InProcessServiceRegistry::new()))?;
//!     host.start().await?;
//!     host.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `archive` - 归档 URI、条目流与清单
//! - `repository` - 模块仓库与元数据加载
//! - `module` - 运行时模块与注册表
//! - `bridge` - 服务注册表、定位器与桥接
//! - `core` - 宿主配置
//! - `api` - 宿主接口
//! - `utils` - 工具函数和错误类型

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod archive;
pub mod bridge;
pub mod core;
pub mod module;
pub mod repository;
pub mod utils;

// 重导出常用类型，方便使用
pub use archive::{
    ArchiveSource, ArchiveUri, CodeUnitSource, FlattenSequence, LazySequence, Manifest,
};

pub use repository::{
    create_repository, ComponentDescriptor, DirectoryRepository, ModuleDefinition, ModuleId,
    ModuleMetadata, NestedArchiveRepository, Repository, RepositoryContext,
};

pub use module::{Module, ModuleEvent, ModuleState, ModulesRegistry, VersionRange};

pub use bridge::{
    HabitatManager, InProcessServiceRegistry, ModuleStartup, ServiceLocator, ServiceObject,
    ServiceProperties, ServiceRegistry,
};

pub use utils::{error_code, generate_id, generate_uuid, CoreError, Result};
pub use utils::logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};

pub use core::config::{BridgeConfig, HostConfig, HostConfigBuilder, LogConfig, RepositoryConfig};
pub use api::host::{HostState, ModuleHost};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
