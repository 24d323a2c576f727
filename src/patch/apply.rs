//! 补丁应用
//!
//! 每个补丁先输出到目标文件所在目录中的唯一临时文件，
//! 只有在输出非空且校验通过后才通过 rename 原子替换原文件。
//! 任何失败或取消都会删除临时文件，原文件保持不变。

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cancel::CancellationToken;
use crate::context::RunContext;
use crate::engine::DeltaEngine;
use crate::error::{JobError, JobFailure, io_err};
use crate::patch::manifest::{Checksums, ModifiedChecksum};
use crate::process::ProcessRunner;
use crate::scheduler::{Job, run_jobs};
use crate::utils::{collect_files, compute_file_hash, relative_key};

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// 补丁所在目录
    pub artifact_dir: PathBuf,
    /// 需要更新的目录
    pub dest_dir: PathBuf,
    pub workers: usize,
}

/// 将一个补丁应用到对应目标文件的任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyJob {
    /// 目标文件相对路径（已去掉补丁扩展名）
    pub relative_path: PathBuf,
    pub artifact: PathBuf,
    pub base_file: PathBuf,
}

impl Job for ApplyJob {
    fn label(&self) -> String {
        format!("* {}", self.relative_path.display())
    }
}

/// 补丁应用结果
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<JobFailure>,
    pub cancelled: bool,
}

impl ApplyReport {
    /// `(总数, 成功, 失败)`
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.total, self.succeeded, self.failed)
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failed == 0
    }
}

/// 查找补丁目录中的所有补丁，并对应到目标目录中的文件
pub fn discover_artifacts(
    artifact_dir: &Path,
    dest_dir: &Path,
    extension: &str,
) -> Result<Vec<ApplyJob>> {
    if !artifact_dir.is_dir() {
        return Ok(Vec::new());
    }

    let artifacts = collect_files(artifact_dir, extension)
        .with_context(|| format!("无法遍历补丁目录: {:?}", artifact_dir))?;
    Ok(artifacts
        .into_iter()
        .map(|artifact_rel| {
            let relative_path = artifact_rel.with_extension("");
            ApplyJob {
                artifact: artifact_dir.join(&artifact_rel),
                base_file: dest_dir.join(&relative_path),
                relative_path,
            }
        })
        .collect())
}

/// 并发应用所有补丁
///
/// 提供 `checksums` 时，会在替换前校验输出文件的哈希。
pub fn apply_patches(
    options: &ApplyOptions,
    engine: &dyn DeltaEngine,
    checksums: Option<&Checksums>,
    ctx: &RunContext,
) -> Result<ApplyReport> {
    let jobs = discover_artifacts(&options.artifact_dir, &options.dest_dir, engine.extension())?;
    let total = jobs.len();
    if jobs.is_empty() {
        tracing::warn!(dir = %options.artifact_dir.display(), "未找到任何补丁");
    }

    let progress = ctx.progress();
    progress.reset(total, "应用补丁");

    let runner = ctx.runner();
    let token = ctx.token();
    let outcome = run_jobs(jobs, options.workers, token, &progress, |job| {
        let expected =
            checksums.and_then(|c| c.modified.get(&relative_key(&job.relative_path)));
        apply_single(job, engine, &runner, token, expected)
    });

    let mut report = ApplyReport {
        total,
        succeeded: outcome.succeeded(),
        failed: outcome.failed(),
        cancelled: outcome.cancelled,
        ..ApplyReport::default()
    };
    report.failures = outcome
        .results
        .into_iter()
        .filter_map(|r| match r.outcome {
            Err(err) if !err.is_cancelled() => Some(JobFailure::new(r.job.relative_path, err)),
            _ => None,
        })
        .collect();
    report
        .failures
        .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    tracing::info!(
        total = report.total,
        succeeded = report.succeeded,
        failed = report.failed,
        cancelled = report.cancelled,
        "补丁应用结束"
    );
    Ok(report)
}

/// 应用单个补丁
pub fn apply_single(
    job: &ApplyJob,
    engine: &dyn DeltaEngine,
    runner: &ProcessRunner,
    token: &CancellationToken,
    expected: Option<&ModifiedChecksum>,
) -> Result<(), JobError> {
    if !job.base_file.is_file() {
        return Err(JobError::TargetMissing {
            path: job.relative_path.clone(),
        });
    }

    if let Some(expected) = expected {
        let current =
            compute_file_hash(&job.base_file).map_err(|e| io_err(&job.base_file, e))?;
        if current == expected.modified && current != expected.original {
            tracing::debug!(path = %job.relative_path.display(), "文件已是最新版本，跳过");
            return Ok(());
        }
        if current != expected.original {
            tracing::warn!(path = %job.relative_path.display(), "原始文件校验和不匹配，可能已被修改");
        }
    }

    // 临时文件由 tempfile 生成唯一名称，不会与目录中已有的文件重名
    let parent = job.base_file.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::Builder::new()
        .prefix(".dpt-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| io_err(parent, e))?
        .into_temp_path();

    // 失败时 `tmp` 被丢弃并自动删除
    produce_output(job, &tmp, engine, runner, token, expected)?;
    // 临时文件默认权限为 0600，替换前沿用原文件的权限
    let permissions = fs::metadata(&job.base_file)
        .map_err(|e| io_err(&job.base_file, e))?
        .permissions();
    fs::set_permissions(&tmp, permissions).map_err(|e| io_err(&job.base_file, e))?;
    tmp.persist(&job.base_file)
        .map_err(|e| io_err(&job.base_file, e.error))
}

fn produce_output(
    job: &ApplyJob,
    tmp: &Path,
    engine: &dyn DeltaEngine,
    runner: &ProcessRunner,
    token: &CancellationToken,
    expected: Option<&ModifiedChecksum>,
) -> Result<(), JobError> {
    runner.run_cancellable(&engine.apply(&job.base_file, &job.artifact, tmp), token)?;

    let len = fs::metadata(tmp).map(|m| m.len()).unwrap_or(0);
    if len == 0 {
        return Err(JobError::ApplyProducedEmptyOutput {
            path: job.relative_path.clone(),
        });
    }

    if let Some(expected) = expected {
        let actual = compute_file_hash(tmp).map_err(|e| io_err(tmp, e))?;
        if actual != expected.modified {
            return Err(JobError::VerificationMismatch {
                path: job.relative_path.clone(),
            });
        }
    }
    Ok(())
}
