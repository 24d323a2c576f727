//! # Delta Patcher
//!
//! 大型目录树（游戏安装目录）的二进制增量更新工具库
//!
//! ## 功能
//!
//! - 对比新旧两个目录，为每个修改过的文件调用外部差分引擎生成补丁，并立即自检
//! - 仅存在于新版本的文件单独收集并打包，仅存在于旧版本的文件写入删除列表
//! - 并发应用补丁，每个文件只在输出校验通过后才原子替换
//! - 独立的并发校验流程，可设置失败阈值提前终止
//! - 协作式取消，可以随时结束所有正在运行的外部进程
//!
//! ## 使用示例
//!
//! ```no_run
//! use delta_patcher::engine::ZstdEngine;
//! use delta_patcher::patch::{BuildOptions, InstallOptions, build_package, install_package};
//! use delta_patcher::RunContext;
//!
//! let engine = ZstdEngine::default();
//!
//! // 生成补丁包
//! let ctx = RunContext::new();
//! build_package(
//!     &BuildOptions {
//!         source_root: "old_version".into(),
//!         dest_root: "new_version".into(),
//!         output_root: "patch_output".into(),
//!         workers: 4,
//!         fast_fail_threshold: None,
//!         title: None,
//!         description: None,
//!         game_version: None,
//!     },
//!     &engine,
//!     &ctx,
//! )
//! .unwrap();
//!
//! // 安装补丁包
//! let ctx = RunContext::new();
//! install_package(
//!     &InstallOptions {
//!         package_root: "patch_output".into(),
//!         dest_dir: "game_dir".into(),
//!         workers: 4,
//!     },
//!     &engine,
//!     &ctx,
//! )
//! .unwrap();
//! ```

pub mod cancel;
pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod logging;
pub mod patch;
pub mod process;
pub mod progress;
pub mod scan;
pub mod scheduler;
pub mod utils;

// 重新导出常用类型
pub use cancel::CancellationToken;
pub use context::{AbortHandle, RunContext};
pub use error::{JobError, JobFailure};
pub use patch::{apply_patches, build_package, generate_patches, install_package, verify_patches};
