//! 运行配置
//!
//! 配置文件为 TOML，所有字段都有默认值，命令行参数优先于配置文件：
//!
//! ```toml
//! workers = 4
//! fast_fail = 10
//!
//! [engine]
//! program = "bin/zstd"
//! extension = "zst"
//! long_window = 31
//!
//! [process]
//! poll_interval_ms = 100
//! grace_period_ms = 500
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::process::RunnerOptions;

/// 默认最多使用的工作线程数
pub const DEFAULT_WORKER_CAP: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatcherConfig {
    /// 工作线程数，未设置时按 CPU 数量自动选择
    pub workers: Option<usize>,
    /// 校验阶段失败数达到该值后提前终止
    pub fast_fail: Option<usize>,
    pub engine: EngineConfig,
    pub process: ProcessConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub program: PathBuf,
    pub extension: String,
    pub long_window: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub poll_interval_ms: u64,
    pub grace_period_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("zstd"),
            extension: "zst".to_string(),
            long_window: Some(31),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        let defaults = RunnerOptions::default();
        Self {
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            grace_period_ms: defaults.grace_period.as_millis() as u64,
        }
    }
}

impl PatcherConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("无法读取配置文件: {:?}", path))?;
        let config: PatcherConfig =
            toml::from_str(&content).with_context(|| format!("无法解析配置文件: {:?}", path))?;
        Ok(config)
    }

    /// 有路径时读取配置文件，否则使用默认配置
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers
            .filter(|w| *w > 0)
            .unwrap_or_else(|| optimal_workers(DEFAULT_WORKER_CAP))
    }

    /// 0 视为不限制
    pub fn fast_fail_threshold(&self) -> Option<usize> {
        self.fast_fail.filter(|k| *k > 0)
    }

    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            poll_interval: Duration::from_millis(self.process.poll_interval_ms.max(1)),
            grace_period: Duration::from_millis(self.process.grace_period_ms),
        }
    }
}

/// 保留一个核心给系统，且不超过 `cap`
pub fn optimal_workers(cap: usize) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    cores.saturating_sub(1).clamp(1, cap.max(1))
}
