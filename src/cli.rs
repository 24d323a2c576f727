use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// 大型目录树二进制增量更新工具
#[derive(Parser)]
#[command(name = "dpt")]
#[command(about = "大型目录树二进制增量更新工具", long_about = None)]
pub struct Cli {
    /// 输出更详细的日志（可重复）
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// 配置文件路径 (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 对比两个目录，生成补丁包
    Generate {
        /// 源目录 (旧版本)
        source_dir: PathBuf,
        /// 目标目录 (新版本)
        dest_dir: PathBuf,
        /// 补丁包输出目录
        #[arg(short, long)]
        output: PathBuf,
        /// 工作线程数
        #[arg(short = 'j', long)]
        threads: Option<usize>,
        /// 校验失败数达到该值后提前终止
        #[arg(long)]
        fast_fail: Option<usize>,
        /// 发布标题
        #[arg(long)]
        title: Option<String>,
        /// 描述
        #[arg(long)]
        description: Option<String>,
        /// 游戏版本
        #[arg(long)]
        game_version: Option<String>,
    },
    /// 将补丁包安装到目标目录
    Install {
        /// 需要更新的目录
        target_dir: PathBuf,
        /// 补丁包目录
        #[arg(short, long)]
        package: PathBuf,
        /// 工作线程数
        #[arg(short = 'j', long)]
        threads: Option<usize>,
    },
    /// 校验补丁包中的所有补丁
    Verify {
        /// 补丁包目录
        package: PathBuf,
        /// 工作线程数
        #[arg(short = 'j', long)]
        threads: Option<usize>,
        /// 失败数达到该值后提前终止
        #[arg(long)]
        fast_fail: Option<usize>,
    },
    /// 显示补丁包内容
    Show {
        /// 补丁包目录
        package: PathBuf,
    },
}
