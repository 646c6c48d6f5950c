//! 核心模块
//!
//! 包含宿主配置。

pub mod config;

pub use config::{
    split_uri_list, BridgeConfig, HostConfig, HostConfigBuilder, LogConfig, RepositoryConfig,
    ENV_OBR_REPOSITORIES, ENV_REPOSITORIES,
};
