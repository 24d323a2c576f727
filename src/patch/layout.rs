use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// 补丁包的目录结构
///
/// ```text
/// <root>/
///   patchfiles/         每个修改文件一个补丁
///   additional_files/   仅存在于新版本的文件（打包后删除）
///   storage/
///     checksums.toml
///     metadata.toml
///     additional_files.tgz
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchLayout {
    root: PathBuf,
}

impl PatchLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("patchfiles")
    }

    pub fn additional_dir(&self) -> PathBuf {
        self.root.join("additional_files")
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.root.join("storage")
    }

    pub fn checksums_path(&self) -> PathBuf {
        self.storage_dir().join("checksums.toml")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.storage_dir().join("metadata.toml")
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.storage_dir().join("additional_files.tgz")
    }

    pub fn create_dirs(&self) -> Result<()> {
        for dir in [
            self.artifacts_dir(),
            self.additional_dir(),
            self.storage_dir(),
        ] {
            fs::create_dir_all(&dir).with_context(|| format!("无法创建目录: {:?}", dir))?;
        }
        Ok(())
    }
}
