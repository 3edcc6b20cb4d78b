//! MTD CLI 应用

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "mtd")]
#[command(about = "MTD - 消息中间件脚本化测试驱动", long_about = None)]
#[command(version)]
struct Cli {
    /// 日志级别
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// 驱动配置文件 (默认搜索 $MTD_CONFIG, ./mtd.toml, ~/.config/mtd/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 脚本管理
    Script {
        #[command(subcommand)]
        action: ScriptAction,
    },

    /// 列出已注册的动作类型
    Actions {
        /// 输出格式 (table/json/yaml)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// 显示生效的驱动配置
    Config,
}

#[derive(Subcommand)]
pub enum ScriptAction {
    /// 运行脚本
    Run {
        /// 脚本文件路径 (.yaml/.yml/.json)
        file: PathBuf,

        /// 报告格式 (table/json/yaml)
        #[arg(short, long, default_value = "table")]
        format: String,

        /// 失败策略 (stop/continue)，覆盖配置文件
        #[arg(short, long)]
        policy: Option<String>,

        /// 运行结束后打印跟踪记录
        #[arg(long)]
        show_trace: bool,
    },

    /// 只加载并构造脚本中的动作，不执行
    Check {
        /// 脚本文件路径
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // 初始化日志 (RUST_LOG 优先)
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("MTD CLI 启动");

    let driver_config = config::load_driver_config(cli.config.as_deref())?;

    // 处理命令
    let passed = match cli.command {
        Commands::Script { action } => commands::script::handle(action, driver_config).await?,
        Commands::Actions { format } => {
            commands::actions::handle(&format)?;
            true
        }
        Commands::Config => {
            config::print_driver_config(&driver_config)?;
            true
        }
    };

    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
