use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const COMPARE_CHUNK: usize = 64 * 1024;

/// 逐字节比较两个文件，先比较大小
pub fn files_equal(a: &Path, b: &Path) -> io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }

    let mut left = BufReader::with_capacity(COMPARE_CHUNK, File::open(a)?);
    let mut right = BufReader::with_capacity(COMPARE_CHUNK, File::open(b)?);

    loop {
        let (n, same) = {
            let l = left.fill_buf()?;
            let r = right.fill_buf()?;
            if l.is_empty() || r.is_empty() {
                return Ok(l.is_empty() && r.is_empty());
            }
            let n = l.len().min(r.len());
            (n, l[..n] == r[..n])
        };
        if !same {
            return Ok(false);
        }
        left.consume(n);
        right.consume(n);
    }
}

/// 确保文件的父目录存在
pub fn ensure_parent(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// 在完整文件名后追加扩展名：`a.dll` + `zst` → `a.dll.zst`
pub fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// 相对路径统一为 `/` 分隔的字符串，用作清单中的键
pub fn relative_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// 收集目录下所有扩展名为 `extension` 的文件，返回排序后的相对路径
pub fn collect_files(root: &Path, extension: &str) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == extension) {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            files.push(relative.to_path_buf());
        }
    }
    Ok(files)
}

/// 自底向上删除空目录（不删除 `root` 本身），返回被删除的目录
pub fn remove_empty_dirs(root: &Path) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    if !root.is_dir() {
        return removed;
    }

    for entry in WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        let is_empty = fs::read_dir(path)
            .map(|mut it| it.next().is_none())
            .unwrap_or(false);
        if is_empty && fs::remove_dir(path).is_ok() {
            removed.push(path.to_path_buf());
        }
    }
    removed
}
