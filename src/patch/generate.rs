//! 补丁生成
//!
//! 扫描两个目录后，为目标目录中的每个文件调度一个任务：
//! 相同的文件直接计为完成，修改的文件调用差分引擎生成补丁并立即自检，
//! 仅存在于新版本的文件原样复制到附加文件目录。

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cancel::CancellationToken;
use crate::context::RunContext;
use crate::engine::DeltaEngine;
use crate::error::{JobError, JobFailure, io_err};
use crate::patch::manifest::{Checksums, ModifiedChecksum};
use crate::process::ProcessRunner;
use crate::scan::{FileClassification, scan_trees};
use crate::scheduler::{Job, run_jobs};
use crate::utils::{
    HashResult, append_extension, compute_file_hash, ensure_parent, files_equal, relative_key,
};

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// 旧版本目录
    pub source_root: PathBuf,
    /// 新版本目录
    pub dest_root: PathBuf,
    /// 补丁输出目录
    pub artifact_dir: PathBuf,
    /// 附加文件输出目录
    pub target_only_dir: PathBuf,
    pub workers: usize,
}

/// 为一个修改文件生成补丁的任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffJob {
    pub relative_path: PathBuf,
    pub source_file: PathBuf,
    pub target_file: PathBuf,
    pub artifact: PathBuf,
}

#[derive(Debug)]
enum GenerateTask {
    Identical(PathBuf),
    Diff(DiffJob),
    CopyTargetOnly {
        relative_path: PathBuf,
        from: PathBuf,
        to: PathBuf,
    },
}

impl GenerateTask {
    fn relative_path(&self) -> &Path {
        match self {
            GenerateTask::Identical(path) => path,
            GenerateTask::Diff(job) => &job.relative_path,
            GenerateTask::CopyTargetOnly { relative_path, .. } => relative_path,
        }
    }
}

impl Job for GenerateTask {
    fn label(&self) -> String {
        let symbol = match self {
            GenerateTask::Identical(_) => FileClassification::Identical.symbol(),
            GenerateTask::Diff(_) => FileClassification::Changed.symbol(),
            GenerateTask::CopyTargetOnly { .. } => FileClassification::TargetOnly.symbol(),
        };
        format!("{} {}", symbol, self.relative_path().display())
    }
}

enum TaskOutput {
    Skipped,
    Diff(ModifiedChecksum),
    Copied(HashResult),
}

/// 补丁生成结果
#[derive(Debug, Default)]
pub struct GenerateReport {
    /// 目标目录中被考察的文件总数
    pub total: usize,
    pub identical: usize,
    pub changed: usize,
    pub target_only: usize,
    /// 成功生成并通过自检的补丁数
    pub artifacts: usize,
    /// 仅存在于旧版本、安装时需要删除的文件
    pub source_only: Vec<PathBuf>,
    pub failures: Vec<JobFailure>,
    pub checksums: Checksums,
    pub cancelled: bool,
}

impl GenerateReport {
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failures.is_empty()
    }

    /// 自检未通过的补丁数
    pub fn mismatches(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| matches!(f.error, JobError::VerificationMismatch { .. }))
            .count()
    }
}

/// 生成补丁
pub fn generate_patches(
    options: &GenerateOptions,
    engine: &dyn DeltaEngine,
    ctx: &RunContext,
) -> Result<GenerateReport> {
    for dir in [&options.artifact_dir, &options.target_only_dir] {
        fs::create_dir_all(dir).with_context(|| format!("无法创建输出目录: {:?}", dir))?;
    }

    let progress = ctx.progress();
    progress.reset(0, "扫描目录");
    tracing::info!(
        source = %options.source_root.display(),
        dest = %options.dest_root.display(),
        "正在比较目录"
    );
    let scan = scan_trees(&options.source_root, &options.dest_root)?;

    let mut report = GenerateReport {
        total: scan.destination_total(),
        identical: scan.count(FileClassification::Identical),
        changed: scan.count(FileClassification::Changed),
        target_only: scan.count(FileClassification::TargetOnly),
        source_only: scan
            .with(FileClassification::SourceOnly)
            .map(|e| e.relative_path.clone())
            .collect(),
        ..GenerateReport::default()
    };

    progress.reset(report.total, "生成补丁");
    for failure in &scan.failures {
        progress.fail(format!(
            "{}: {}",
            failure.relative_path.display(),
            failure.error
        ));
    }

    let tasks: Vec<GenerateTask> = scan
        .entries
        .iter()
        .filter_map(|entry| {
            let relative = entry.relative_path.clone();
            match entry.classification {
                FileClassification::Identical => Some(GenerateTask::Identical(relative)),
                // 应用补丁时空输出总会被拒绝，变为空的文件改为随附加文件下发
                FileClassification::Changed if is_empty_file(&options.dest_root.join(&relative)) => {
                    Some(GenerateTask::CopyTargetOnly {
                        from: options.dest_root.join(&relative),
                        to: options.target_only_dir.join(&relative),
                        relative_path: relative,
                    })
                }
                FileClassification::Changed => Some(GenerateTask::Diff(DiffJob {
                    source_file: options.source_root.join(&relative),
                    target_file: options.dest_root.join(&relative),
                    artifact: append_extension(
                        &options.artifact_dir.join(&relative),
                        engine.extension(),
                    ),
                    relative_path: relative,
                })),
                FileClassification::TargetOnly => Some(GenerateTask::CopyTargetOnly {
                    from: options.dest_root.join(&relative),
                    to: options.target_only_dir.join(&relative),
                    relative_path: relative,
                }),
                FileClassification::SourceOnly => None,
            }
        })
        .collect();
    report.failures.extend(scan.failures);

    let runner = ctx.runner();
    let token = ctx.token();
    let outcome = run_jobs(tasks, options.workers, token, &progress, |task| match task {
        GenerateTask::Identical(_) => Ok(TaskOutput::Skipped),
        GenerateTask::Diff(job) => {
            create_artifact(job, engine, &runner, token).map(TaskOutput::Diff)
        }
        GenerateTask::CopyTargetOnly { from, to, .. } => {
            copy_target_only(from, to).map(TaskOutput::Copied)
        }
    });

    report.cancelled = outcome.cancelled;
    for result in outcome.results {
        let key = relative_key(result.job.relative_path());
        match result.outcome {
            Ok(TaskOutput::Skipped) => {}
            Ok(TaskOutput::Diff(checksum)) => {
                report.artifacts += 1;
                report.checksums.modified.insert(key, checksum);
            }
            Ok(TaskOutput::Copied(hash)) => {
                report.checksums.added.insert(key, hash);
            }
            Err(err) if err.is_cancelled() => {}
            Err(err) => report
                .failures
                .push(JobFailure::new(result.job.relative_path(), err)),
        }
    }
    report.checksums.deleted = report.source_only.iter().map(|p| relative_key(p)).collect();
    report
        .failures
        .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    tracing::info!(
        total = report.total,
        identical = report.identical,
        changed = report.changed,
        target_only = report.target_only,
        source_only = report.source_only.len(),
        artifacts = report.artifacts,
        failed = report.failures.len(),
        cancelled = report.cancelled,
        "补丁生成结束"
    );
    Ok(report)
}

/// 生成补丁并自检，任何失败都会删除已写出的补丁
fn create_artifact(
    job: &DiffJob,
    engine: &dyn DeltaEngine,
    runner: &ProcessRunner,
    token: &CancellationToken,
) -> Result<ModifiedChecksum, JobError> {
    let result = (|| -> Result<ModifiedChecksum, JobError> {
        ensure_parent(&job.artifact).map_err(|e| io_err(&job.artifact, e))?;
        runner.run_cancellable(
            &engine.create(&job.source_file, &job.target_file, &job.artifact),
            token,
        )?;
        self_check(job, engine, runner, token)?;

        let original =
            compute_file_hash(&job.source_file).map_err(|e| io_err(&job.source_file, e))?;
        let modified =
            compute_file_hash(&job.target_file).map_err(|e| io_err(&job.target_file, e))?;
        Ok(ModifiedChecksum::new(original, modified))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&job.artifact);
    }
    result
}

/// 把补丁应用到旧文件的副本上，结果必须与新文件逐字节一致
fn self_check(
    job: &DiffJob,
    engine: &dyn DeltaEngine,
    runner: &ProcessRunner,
    token: &CancellationToken,
) -> Result<(), JobError> {
    let scratch_base = append_extension(&job.artifact, "base");
    let scratch_out = append_extension(&job.artifact, "check");

    let result = (|| -> Result<(), JobError> {
        fs::copy(&job.source_file, &scratch_base).map_err(|e| io_err(&scratch_base, e))?;
        runner.run_cancellable(
            &engine.apply(&scratch_base, &job.artifact, &scratch_out),
            token,
        )?;
        let equal =
            files_equal(&scratch_out, &job.target_file).map_err(|e| io_err(&scratch_out, e))?;
        if !equal {
            return Err(JobError::VerificationMismatch {
                path: job.relative_path.clone(),
            });
        }
        Ok(())
    })();

    let _ = fs::remove_file(&scratch_base);
    let _ = fs::remove_file(&scratch_out);
    result
}

fn is_empty_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|m| m.len() == 0)
}

fn copy_target_only(from: &Path, to: &Path) -> Result<HashResult, JobError> {
    ensure_parent(to).map_err(|e| io_err(to, e))?;
    fs::copy(from, to).map_err(|e| io_err(from, e))?;
    compute_file_hash(to).map_err(|e| io_err(to, e))
}
