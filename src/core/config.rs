//! 宿主配置
//!
//! 定义运行时宿主的配置结构和加载逻辑。仓库列表既可以写在配置文件中，
//! 也可以在启动时从环境变量读取一次（空白分隔的 URI 列表）。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::utils::{CoreError, Result};

/// 仓库 URI 列表的环境变量
pub const ENV_REPOSITORIES: &str = "CHIPS_HABITAT_REPOSITORIES";

/// OBR 风格二级仓库 URI 列表的环境变量
pub const ENV_OBR_REPOSITORIES: &str = "CHIPS_HABITAT_OBR_REPOSITORIES";

/// 默认的模块归档后缀
pub const DEFAULT_MODULE_SUFFIX: &str = ".jar";

/// 默认的组件描述符根目录
pub const DEFAULT_DESCRIPTOR_ROOT: &str = "META-INF/hk2-locator";

/// 仓库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// 模块仓库 URI 列表（`archive:` 嵌套归档或 `file:` 目录）
    #[serde(default)]
    pub uris: Vec<String>,

    /// OBR 风格二级仓库 URI 列表
    #[serde(default)]
    pub obr_uris: Vec<String>,

    /// 模块归档后缀
    #[serde(default = "default_module_suffix")]
    pub module_suffix: String,

    /// 组件描述符根目录
    #[serde(default = "default_descriptor_root")]
    pub descriptor_root: String,
}

fn default_module_suffix() -> String {
    DEFAULT_MODULE_SUFFIX.to_string()
}

fn default_descriptor_root() -> String {
    DEFAULT_DESCRIPTOR_ROOT.to_string()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            uris: vec![],
            obr_uris: vec![],
            module_suffix: default_module_suffix(),
            descriptor_root: default_descriptor_root(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

/// 服务桥接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// 宿主在外部注册表中的所有者标识；该所有者发布的服务不会被回灌到定位器
    #[serde(default = "default_owner")]
    pub owner: String,

    /// 发布定位器时使用的契约名
    #[serde(default = "default_locator_contract")]
    pub locator_contract: String,

    /// 发布模块注册表时使用的契约名
    #[serde(default = "default_registry_contract")]
    pub registry_contract: String,
}

fn default_owner() -> String {
    "chips-habitat".to_string()
}

fn default_locator_contract() -> String {
    "org.glassfish.hk2.api.ServiceLocator".to_string()
}

fn default_registry_contract() -> String {
    "com.sun.enterprise.module.ModulesRegistry".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            owner: default_owner(),
            locator_contract: default_locator_contract(),
            registry_contract: default_registry_contract(),
        }
    }
}

/// 宿主配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 仓库配置
    #[serde(default)]
    pub repositories: RepositoryConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 桥接配置
    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl HostConfig {
    /// 创建配置构建器
    pub fn builder() -> HostConfigBuilder {
        HostConfigBuilder::default()
    }

    /// 从文件加载配置（`.json` 按 JSON 解析，其余按 YAML）
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CoreError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;

        let mut config: HostConfig = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.config_path = Some(path);
        config.validate()?;
        Ok(config)
    }

    /// 读取仓库环境变量并追加到配置中
    ///
    /// 只应在启动时调用一次。
    pub fn apply_env(&mut self) {
        let lookup = |key: &str| std::env::var(key).ok();
        self.apply_env_with(lookup);
    }

    /// 使用自定义查找函数读取仓库列表（便于测试）
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_REPOSITORIES) {
            push_unique(&mut self.repositories.uris, split_uri_list(&value));
        }
        if let Some(value) = lookup(ENV_OBR_REPOSITORIES) {
            push_unique(&mut self.repositories.obr_uris, split_uri_list(&value));
        }
    }

    /// 合并另一个配置（后者覆盖非默认值，仓库列表追加）
    pub fn merge(&mut self, other: HostConfig) {
        push_unique(&mut self.repositories.uris, other.repositories.uris);
        push_unique(&mut self.repositories.obr_uris, other.repositories.obr_uris);
        if other.repositories.module_suffix != DEFAULT_MODULE_SUFFIX {
            self.repositories.module_suffix = other.repositories.module_suffix;
        }
        if other.repositories.descriptor_root != DEFAULT_DESCRIPTOR_ROOT {
            self.repositories.descriptor_root = other.repositories.descriptor_root;
        }
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.bridge.owner != default_owner() {
            self.bridge.owner = other.bridge.owner;
        }
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.repositories.module_suffix.is_empty() {
            return Err(CoreError::InvalidConfigValue {
                key: "repositories.module_suffix".to_string(),
                reason: "不能为空".to_string(),
            });
        }
        if self.repositories.descriptor_root.trim_matches('/').is_empty() {
            return Err(CoreError::InvalidConfigValue {
                key: "repositories.descriptor_root".to_string(),
                reason: "不能为空".to_string(),
            });
        }
        Ok(())
    }
}

/// 拆分空白分隔的 URI 列表
pub fn split_uri_list(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

fn push_unique(target: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct HostConfigBuilder {
    config: HostConfig,
}

impl HostConfigBuilder {
    /// 添加模块仓库
    pub fn repository(mut self, uri: impl Into<String>) -> Self {
        self.config.repositories.uris.push(uri.into());
        self
    }

    /// 添加 OBR 仓库
    pub fn obr_repository(mut self, uri: impl Into<String>) -> Self {
        self.config.repositories.obr_uris.push(uri.into());
        self
    }

    /// 设置模块归档后缀
    pub fn module_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.repositories.module_suffix = suffix.into();
        self
    }

    /// 设置描述符根目录
    pub fn descriptor_root(mut self, root: impl Into<String>) -> Self {
        self.config.repositories.descriptor_root = root.into();
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 设置宿主所有者标识
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.config.bridge.owner = owner.into();
        self
    }

    /// 构建配置
    pub fn build(self) -> HostConfig {
        self.config
    }
}
