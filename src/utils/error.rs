//! 模块运行时错误类型定义
//!
//! 本模块定义了运行时中使用的所有错误类型。
//!
//! 传播约定：
//! - 扫描期间的单条目错误（清单读取、描述符解析）只记录日志，不会中断扫描
//! - 仓库级错误（URI 无效、容器不可读）同步返回给构造者或 `refresh` 调用者
//! - 生命周期与桥接错误作为返回值交给直接调用者，不跨越异步通知边界

use thiserror::Error;

/// 运行时核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 归档与仓库错误 ====================

    /// 归档 URI 无效（格式错误或协议不是嵌套归档）
    #[error("归档 URI 无效: '{uri}' - {reason}")]
    InvalidUri {
        uri: String,
        reason: String,
    },

    /// 容器归档无法打开
    #[error("容器不可读: '{uri}' - {reason}")]
    UnreadableContainer {
        uri: String,
        reason: String,
    },

    /// 清单读取失败
    #[error("清单读取失败: '{uri}' - {reason}")]
    ManifestRead {
        uri: String,
        reason: String,
    },

    /// 描述符解析失败
    #[error("描述符解析失败: '{location}' 第 {line} 行 - {reason}")]
    DescriptorParse {
        location: String,
        line: usize,
        reason: String,
    },

    /// 惰性序列已耗尽
    #[error("序列已耗尽，没有可用元素")]
    ExhaustedSequence,

    // ==================== 模块生命周期错误 ====================

    /// 依赖解析失败
    #[error("模块 '{module}' 解析失败: {reason}")]
    Resolve {
        module: String,
        reason: String,
    },

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    /// 模块已卸载，不可再使用
    #[error("模块已卸载: '{0}'")]
    ModuleUninstalled(String),

    /// 版本或版本范围无效
    #[error("版本格式无效: '{0}'")]
    InvalidVersion(String),

    // ==================== 服务桥接错误 ====================

    /// 外部注册表无法提供服务对象
    #[error("服务对象不可用: {0}")]
    BridgeObjectUnavailable(String),

    /// 定位器未找到
    #[error("定位器未找到: '{0}'")]
    LocatorNotFound(String),

    /// 服务注册句柄已失效
    #[error("服务注册已注销: {0}")]
    RegistrationClosed(u64),

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        key: String,
        reason: String,
    },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP 归档错误
    #[error("归档错误: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 版本解析错误
    #[error("版本解析错误: {0}")]
    VersionParse(#[from] semver::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 运行时操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 错误码常量
pub mod error_code {
    // 归档错误 (ARCHIVE-xxx)
    pub const ARCHIVE_INVALID_URI: &str = "ARCHIVE-001";
    pub const ARCHIVE_UNREADABLE: &str = "ARCHIVE-002";
    pub const ARCHIVE_MANIFEST: &str = "ARCHIVE-003";
    pub const ARCHIVE_DESCRIPTOR: &str = "ARCHIVE-004";
    pub const ARCHIVE_EXHAUSTED: &str = "ARCHIVE-005";

    // 模块错误 (MODULE-xxx)
    pub const MODULE_NOT_FOUND: &str = "MODULE-001";
    pub const MODULE_RESOLVE_FAILED: &str = "MODULE-002";
    pub const MODULE_UNINSTALLED: &str = "MODULE-003";
    pub const MODULE_INVALID_VERSION: &str = "MODULE-004";

    // 桥接错误 (BRIDGE-xxx)
    pub const BRIDGE_OBJECT_UNAVAILABLE: &str = "BRIDGE-001";
    pub const BRIDGE_LOCATOR_NOT_FOUND: &str = "BRIDGE-002";
    pub const BRIDGE_REGISTRATION_CLOSED: &str = "BRIDGE-003";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidUri { .. } => error_code::ARCHIVE_INVALID_URI,
            CoreError::UnreadableContainer { .. } => error_code::ARCHIVE_UNREADABLE,
            CoreError::ManifestRead { .. } => error_code::ARCHIVE_MANIFEST,
            CoreError::DescriptorParse { .. } => error_code::ARCHIVE_DESCRIPTOR,
            CoreError::ExhaustedSequence => error_code::ARCHIVE_EXHAUSTED,
            CoreError::Resolve { .. } => error_code::MODULE_RESOLVE_FAILED,
            CoreError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            CoreError::ModuleUninstalled(_) => error_code::MODULE_UNINSTALLED,
            CoreError::InvalidVersion(_) => error_code::MODULE_INVALID_VERSION,
            CoreError::BridgeObjectUnavailable(_) => error_code::BRIDGE_OBJECT_UNAVAILABLE,
            CoreError::LocatorNotFound(_) => error_code::BRIDGE_LOCATOR_NOT_FOUND,
            CoreError::RegistrationClosed(_) => error_code::BRIDGE_REGISTRATION_CLOSED,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            _ => "UNKNOWN",
        }
    }

    /// 是否为可恢复的单条目错误（扫描时降级处理而不是中断）
    pub fn is_per_entry(&self) -> bool {
        matches!(
            self,
            CoreError::ManifestRead { .. }
                | CoreError::DescriptorParse { .. }
                | CoreError::BridgeObjectUnavailable(_)
        )
    }

    pub(crate) fn invalid_uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unreadable(uri: impl Into<String>, reason: impl ToString) -> Self {
        CoreError::UnreadableContainer {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn resolve(module: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::Resolve {
            module: module.into(),
            reason: reason.into(),
        }
    }
}
