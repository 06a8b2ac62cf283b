//! # Linebot CLI
//!
//! 巡线机器人控制核心的命令行工具。
//!
//! ```bash
//! # 生成默认配置
//! linebot-cli config defaults --output robot.toml
//!
//! # 校验配置（列出所有问题）
//! linebot-cli config check robot.toml
//!
//! # 在仿真赛道上运行控制循环
//! linebot-cli simulate --config robot.toml --cycles 20000 --seed 7
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod sim;

use commands::{ConfigCommand, SimulateCommand};

/// Linebot CLI - 巡线机器人命令行工具
#[derive(Parser, Debug)]
#[command(name = "linebot-cli")]
#[command(about = "Command-line interface for the line-follower control core", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 在仿真赛道上运行控制循环
    Simulate {
        #[command(flatten)]
        args: SimulateCommand,
    },
}

fn main() -> Result<()> {
    // 日志输出到 stderr，stdout 留给命令结果（含 --json）
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("linebot_cli=info".parse()?)
                .add_directive("linebot_control=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config(cmd) => cmd.execute(),
        Commands::Simulate { args } => args.execute(),
    }
}
