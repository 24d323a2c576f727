//! 任务级错误类型
//!
//! 单个文件任务的失败都会被调度器记录并计数，不会中断整个流水线。
//! 流水线本身的致命错误（无法创建输出目录等）使用 `anyhow::Error`。

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// 单个任务失败的原因
#[derive(Debug, Error)]
pub enum JobError {
    /// 外部程序无法启动（例如可执行文件不存在）
    #[error("无法启动外部程序 {program}: {source}")]
    SpawnFailure {
        program: String,
        #[source]
        source: io::Error,
    },

    /// 外部程序运行结束但返回了失败状态
    #[error("外部程序执行失败 (退出码 {code:?}): {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    /// 生成补丁后的自检，或应用补丁后的校验不通过
    #[error("补丁校验不一致: {path:?}")]
    VerificationMismatch { path: PathBuf },

    /// 应用补丁时目标文件不存在
    #[error("目标文件不存在: {path:?}")]
    TargetMissing { path: PathBuf },

    /// 应用补丁后输出文件不存在或为空
    #[error("补丁输出为空: {path:?}")]
    ApplyProducedEmptyOutput { path: PathBuf },

    /// 用户主动取消
    #[error("操作已取消")]
    Cancelled,

    /// 本地文件 I/O 失败
    #[error("I/O 错误 {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl JobError {
    /// 取消不算作文件级缺陷
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }

    /// 简短的错误类别名，用于日志和汇总
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::SpawnFailure { .. } => "spawn_failure",
            JobError::NonZeroExit { .. } => "non_zero_exit",
            JobError::VerificationMismatch { .. } => "verification_mismatch",
            JobError::TargetMissing { .. } => "target_missing",
            JobError::ApplyProducedEmptyOutput { .. } => "apply_produced_empty_output",
            JobError::Cancelled => "cancelled",
            JobError::Io { .. } => "io",
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: io::Error) -> JobError {
    JobError::Io {
        path: path.into(),
        source,
    }
}

/// 一个失败任务及其相对路径
#[derive(Debug)]
pub struct JobFailure {
    pub relative_path: PathBuf,
    pub error: JobError,
}

impl JobFailure {
    pub fn new(relative_path: impl Into<PathBuf>, error: JobError) -> Self {
        Self {
            relative_path: relative_path.into(),
            error,
        }
    }
}
