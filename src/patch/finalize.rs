use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::utils::remove_empty_dirs;

/// 删除列表的执行结果
#[derive(Debug, Default)]
pub struct DeletionReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(String, io::Error)>,
    /// 路径越界而被忽略的条目
    pub rejected: Vec<String>,
    pub pruned_dirs: Vec<PathBuf>,
}

/// 删除旧版本独有的文件，并清理因此变空的目录
pub fn apply_deletions(dest_dir: &Path, deleted: &[String]) -> DeletionReport {
    let mut report = DeletionReport::default();

    for entry in deleted {
        let relative = Path::new(entry.trim());
        if relative.as_os_str().is_empty() {
            continue;
        }
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            tracing::warn!(path = %entry, "删除列表中的路径越界，已忽略");
            report.rejected.push(entry.clone());
            continue;
        }

        let target_path = dest_dir.join(relative);
        if !target_path.exists() {
            continue;
        }
        match fs::remove_file(&target_path) {
            Ok(()) => {
                tracing::debug!(path = %entry, "已删除");
                report.removed.push(relative.to_path_buf());
            }
            Err(err) => {
                tracing::warn!(path = %entry, error = %err, "删除失败");
                report.failed.push((entry.clone(), err));
            }
        }
    }

    report.pruned_dirs = remove_empty_dirs(dest_dir);
    report
}
