//! 补丁完整性校验
//!
//! 独立于生成流程，对补丁目录中的每个文件并发调用引擎的校验模式。
//! 设置了提前终止阈值时，失败数达到阈值后取消本阶段剩余的任务。

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::context::RunContext;
use crate::engine::DeltaEngine;
use crate::error::JobFailure;
use crate::scheduler::{Job, run_jobs};
use crate::utils::collect_files;

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub artifact_dir: PathBuf,
    pub workers: usize,
    /// 失败数达到该值后提前终止，`None` 表示不限制
    pub fast_fail_threshold: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyJob {
    pub relative_path: PathBuf,
    pub artifact: PathBuf,
}

impl Job for VerifyJob {
    fn label(&self) -> String {
        format!("? {}", self.relative_path.display())
    }
}

/// 校验结果
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub total: usize,
    pub passed: usize,
    pub failures: Vec<JobFailure>,
    /// 因达到提前终止阈值而停止
    pub aborted: bool,
    /// 被外部取消
    pub cancelled: bool,
}

impl VerifyReport {
    /// 只有完整运行且没有任何失败时才为真
    pub fn is_ok(&self) -> bool {
        !self.aborted && !self.cancelled && self.failures.is_empty()
    }

    /// 未被执行（或被中途打断）的补丁数
    pub fn unchecked(&self) -> usize {
        self.total - self.passed - self.failures.len()
    }
}

/// 校验补丁目录中的所有补丁
pub fn verify_patches(
    options: &VerifyOptions,
    engine: &dyn DeltaEngine,
    ctx: &RunContext,
) -> Result<VerifyReport> {
    let jobs = discover_verify_jobs(&options.artifact_dir, engine.extension())?;
    let total = jobs.len();
    let threshold = options.fast_fail_threshold.filter(|k| *k > 0);

    // 本阶段专用的取消标志：外部取消会传递进来，提前终止不会影响外部
    let token = ctx.token().child();
    let progress = ctx.progress();
    progress.reset(total, "校验补丁");

    let runner = ctx.runner();
    let failures = AtomicUsize::new(0);
    let tripped = AtomicBool::new(false);

    let outcome = run_jobs(jobs, options.workers, &token, &progress, |job| {
        let result = runner
            .run_cancellable(&engine.test(&job.artifact), &token)
            .map(|_| ());
        if let Err(err) = &result
            && !err.is_cancelled()
        {
            let failed = failures.fetch_add(1, Ordering::SeqCst) + 1;
            if threshold.is_some_and(|k| failed >= k) && !tripped.swap(true, Ordering::SeqCst) {
                tracing::warn!(failed, "校验失败数达到阈值，提前终止");
                token.cancel();
            }
        }
        result
    });

    let aborted = tripped.load(Ordering::SeqCst);
    let mut report = VerifyReport {
        total,
        passed: outcome.succeeded(),
        aborted,
        cancelled: outcome.cancelled && !aborted,
        ..VerifyReport::default()
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

    for failure in &report.failures {
        tracing::warn!(path = %failure.relative_path.display(), error = %failure.error, "补丁校验失败");
    }
    if report.is_ok() {
        tracing::info!(total, "所有补丁校验通过");
    } else {
        tracing::warn!(
            total,
            passed = report.passed,
            failed = report.failures.len(),
            aborted = report.aborted,
            "补丁校验未通过"
        );
    }
    Ok(report)
}

fn discover_verify_jobs(artifact_dir: &Path, extension: &str) -> Result<Vec<VerifyJob>> {
    if !artifact_dir.is_dir() {
        return Ok(Vec::new());
    }
    let artifacts = collect_files(artifact_dir, extension)
        .with_context(|| format!("无法遍历补丁目录: {:?}", artifact_dir))?;
    Ok(artifacts
        .into_iter()
        .map(|relative_path| VerifyJob {
            artifact: artifact_dir.join(&relative_path),
            relative_path,
        })
        .collect())
}
