//! Chips Habitat 命令行入口
//!
//! 模块运行时的命令行工具，提供启动、扫描和配置检查功能。
//!
//! # 命令概览
//!
//! - `start` - 启动宿主
//! - `scan` - 扫描一个仓库并列出模块与普通库
//! - `version` - 显示版本信息
//! - `check-config` - 验证配置文件
//!
//! # 使用示例
//!
//! ```bash
//! # 启动宿主（仓库列表来自配置文件和环境变量）
//! chips-habitat start
//!
//! # 扫描嵌套归档
//! chips-habitat scan 'archive:file:/opt/app.zip!/modules/'
//!
//! # 以 JSON 输出扫描结果
//! chips-habitat scan file:/opt/modules --json
//!
//! # 检查配置文件
//! chips-habitat check-config -c habitat.yaml
//! ```

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::info;

use chips_habitat::{
    create_repository, HostConfig, InProcessServiceRegistry, Logger, LoggerConfig,
    ModuleDefinition, ModuleHost, RepositoryContext, ServiceProperties,
};

/// Chips Habitat - 薯片模块运行时
///
/// 发现嵌套归档中的模块，管理其生命周期，并桥接外部服务。
#[derive(Parser)]
#[command(name = "chips-habitat")]
#[command(version, about = "薯片生态的可插拔模块运行时", long_about = None)]
#[command(author = "Chips Team")]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "habitat.yaml", global = true)]
    config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 子命令
    #[command(subcommand)]
    command: Option<Commands>,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 启动宿主
    ///
    /// 装配配置和环境变量中的全部仓库，创建默认定位器。
    /// 按 Ctrl+C 可有序关闭。
    Start,

    /// 扫描仓库
    ///
    /// 支持 `archive:` 嵌套归档和 `file:` 目录。
    Scan {
        /// 仓库 URI
        uri: String,

        /// 以 JSON 输出
        #[arg(long)]
        json: bool,
    },

    /// 查看版本信息
    Version,

    /// 验证配置文件
    ///
    /// 检查配置文件是否有效，并显示解析后的配置内容。
    CheckConfig {
        /// 配置文件路径（不指定则使用全局 -c 选项）
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// 扫描结果
#[derive(Serialize)]
struct ScanReport {
    repository: String,
    modules: Vec<Arc<ModuleDefinition>>,
    libraries: Vec<String>,
}

/// 启动宿主
async fn run_start(config: HostConfig) -> Result<(), Box<dyn std::error::Error>> {
    let host = ModuleHost::new(config, Arc::new(InProcessServiceRegistry::new()))?;
    host.start().await?;
    let locator = host.create_locator("default", ServiceProperties::new()).await?;

    println!();
    println!("Chips Habitat 已启动");
    println!("═══════════════════════════════════════");
    println!("  版本:       {}", chips_habitat::VERSION);
    println!("  仓库数:     {}", host.modules().repositories().await.len());
    println!("  模块数:     {}", host.modules().modules().await.len());
    println!("  定位器:     {} ({})", locator.name(), locator.id());
    println!();
    println!("  按 Ctrl+C 有序关闭");
    println!("═══════════════════════════════════════");
    println!();

    // 等待关闭信号
    signal::ctrl_c().await?;

    println!();
    info!("收到关闭信号，正在有序关闭...");
    host.shutdown().await?;

    Ok(())
}

/// 扫描仓库
fn run_scan(config: &HostConfig, uri: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let context = RepositoryContext::from_config(&config.repositories);
    let repository = create_repository(uri, &context)?;

    let report = ScanReport {
        repository: repository.uri().to_string(),
        modules: repository.find_all(),
        libraries: repository.libraries(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("仓库: {}", report.repository);
    println!("────────────────────────────────────────");
    println!("  模块 ({}):", report.modules.len());
    for module in &report.modules {
        println!("    {}", module.id());
        for dependency in module.dependencies() {
            let range = dependency.version_range.as_deref().unwrap_or("*");
            println!("      依赖 {} {}", dependency.name, range);
        }
        for locator in module.metadata().locator_names() {
            println!(
                "      描述符 {} ({} 条)",
                locator,
                module.metadata().descriptors(locator).len()
            );
        }
    }
    println!("  普通库 ({}):", report.libraries.len());
    for library in &report.libraries {
        println!("    {}", library);
    }
    println!("────────────────────────────────────────");
    Ok(())
}

/// 检查配置文件
async fn check_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("检查配置文件: {}", path.display());
    println!();

    if !path.exists() {
        println!("⚠️  警告: 配置文件不存在，将使用默认配置");
        println!();
        print_config(&HostConfig::default());
        return Ok(());
    }

    match HostConfig::from_file(path).await {
        Ok(config) => {
            println!("✅ 配置文件有效！");
            println!();
            print_config(&config);
            Ok(())
        }
        Err(e) => {
            println!("❌ 配置文件无效: {}", e);
            Err(Box::new(e))
        }
    }
}

/// 打印配置
fn print_config(config: &HostConfig) {
    println!("配置内容:");
    println!("────────────────────────────────────────");
    println!("  [仓库配置]");
    println!("    仓库:           {:?}", config.repositories.uris);
    println!("    OBR 仓库:       {:?}", config.repositories.obr_uris);
    println!("    模块后缀:       {}", config.repositories.module_suffix);
    println!("    描述符目录:     {}", config.repositories.descriptor_root);
    println!();
    println!("  [日志配置]");
    println!("    日志级别:       {}", config.logging.level);
    println!("    文件输出:       {}", if config.logging.file_output { "是" } else { "否" });
    println!("    JSON 格式:      {}", if config.logging.json_format { "是" } else { "否" });
    println!();
    println!("  [桥接配置]");
    println!("    所有者:         {}", config.bridge.owner);
    println!("    定位器契约:     {}", config.bridge.locator_contract);
    println!("────────────────────────────────────────");
}

/// 打印版本信息
fn print_version() {
    println!();
    println!("Chips Habitat - 薯片模块运行时");
    println!("═══════════════════════════════════════");
    println!("  版本:             {}", chips_habitat::VERSION);
    println!();
    println!("构建信息:");
    println!("  目标平台:         {}", std::env::consts::ARCH);
    println!("  操作系统:         {}", std::env::consts::OS);
    println!("═══════════════════════════════════════");
    println!();
}

/// 加载配置文件，并追加环境变量中的仓库列表
async fn load_config(config_path: &Path) -> Result<HostConfig, Box<dyn std::error::Error>> {
    let mut config = if config_path.exists() {
        HostConfig::from_file(config_path).await?
    } else {
        HostConfig::default()
    };
    config.apply_env();
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        // 显示版本信息
        Some(Commands::Version) => {
            print_version();
        }

        // 检查配置文件
        Some(Commands::CheckConfig { config }) => {
            let config_path = config.unwrap_or(cli.config);
            check_config(&config_path).await?;
        }

        // 扫描与启动需要日志
        command => {
            let mut config = load_config(&cli.config).await?;
            if let Some(level) = cli.log_level {
                config.logging.level = level;
            }
            let _guard = Logger::try_init(LoggerConfig::from_log_config(&config.logging));
            info!(config = %cli.config.display(), "配置已加载");

            match command {
                Some(Commands::Scan { uri, json }) => run_scan(&config, &uri, json)?,
                _ => run_start(config).await?,
            }
        }
    }

    Ok(())
}
