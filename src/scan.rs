//! 目录树扫描与文件分类

use anyhow::{Result, bail};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{JobError, JobFailure, io_err};
use crate::utils::files_equal;

/// 文件在源目录（旧版本）与目标目录（新版本）之间的差异类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileClassification {
    /// 大小和内容完全一致
    Identical,
    /// 两边都存在但内容不同
    Changed,
    /// 仅存在于源目录，安装时需要删除
    SourceOnly,
    /// 仅存在于目标目录，作为附加文件单独打包
    TargetOnly,
}

impl FileClassification {
    pub fn symbol(&self) -> &'static str {
        match self {
            FileClassification::Identical => "=",
            FileClassification::Changed => "*",
            FileClassification::SourceOnly => "-",
            FileClassification::TargetOnly => "+",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub relative_path: PathBuf,
    pub classification: FileClassification,
}

/// 扫描结果：分类条目按相对路径排序，无法读取的文件和目录单独列出
#[derive(Debug, Default)]
pub struct ScanReport {
    pub entries: Vec<ScanEntry>,
    pub failures: Vec<JobFailure>,
}

impl ScanReport {
    pub fn with(&self, classification: FileClassification) -> impl Iterator<Item = &ScanEntry> {
        self.entries
            .iter()
            .filter(move |e| e.classification == classification)
    }

    pub fn count(&self, classification: FileClassification) -> usize {
        self.with(classification).count()
    }

    /// 目标目录中被考察的文件总数，每个扫描失败项也计为一个
    pub fn destination_total(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.classification != FileClassification::SourceOnly)
            .count()
            + self.failures.len()
    }
}

/// 比较源目录与目标目录，对目标目录中的每个文件分类，并列出仅存在于源目录的文件
///
/// 单个文件读取失败只记录在 `failures` 中，不影响其它文件。
pub fn scan_trees(source_root: &Path, dest_root: &Path) -> Result<ScanReport> {
    if !dest_root.is_dir() {
        bail!("目标目录不存在: {:?}", dest_root);
    }

    let mut report = ScanReport::default();

    for entry in WalkDir::new(dest_root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                report.failures.push(walk_failure(dest_root, err));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let dest_file = entry.path();
        let relative = dest_file.strip_prefix(dest_root)?.to_path_buf();
        let source_file = source_root.join(&relative);

        match classify_file(&source_file, dest_file) {
            Ok(classification) => report.entries.push(ScanEntry {
                relative_path: relative,
                classification,
            }),
            Err(err) => {
                tracing::warn!(path = %relative.display(), error = %err, "无法比较文件");
                report.failures.push(JobFailure::new(relative, err));
            }
        }
    }

    if source_root.is_dir() {
        for entry in WalkDir::new(source_root).sort_by_file_name() {
            // 无法读取的源目录会让删除列表不完整，同样记为失败
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    report.failures.push(walk_failure(source_root, err));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(source_root)?;
            if !dest_root.join(relative).exists() {
                report.entries.push(ScanEntry {
                    relative_path: relative.to_path_buf(),
                    classification: FileClassification::SourceOnly,
                });
            }
        }
    }

    report
        .entries
        .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(report)
}

fn walk_failure(root: &Path, err: walkdir::Error) -> JobFailure {
    let relative = err
        .path()
        .and_then(|p| p.strip_prefix(root).ok())
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
    tracing::warn!(path = %path.display(), error = %err, "无法读取目录项");
    JobFailure::new(relative, io_err(path, io::Error::from(err)))
}

/// 对单个目标文件分类
pub fn classify_file(source_file: &Path, dest_file: &Path) -> Result<FileClassification, JobError> {
    match fs::metadata(source_file) {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Ok(FileClassification::TargetOnly),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(FileClassification::TargetOnly);
        }
        Err(err) => return Err(io_err(source_file, err)),
    }

    let equal = files_equal(source_file, dest_file).map_err(|e| io_err(dest_file, e))?;
    Ok(if equal {
        FileClassification::Identical
    } else {
        FileClassification::Changed
    })
}

/// 统计目录下的普通文件数量，用于提前设置进度总数
pub fn count_files(root: &Path) -> usize {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}
