use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::utils::HashResult;

/// 补丁格式标识
pub const PATCH_FORMAT: &str = "zstd-patch-v1";

/// 补丁包元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub format: String,
    pub created_at: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub game_version: Option<String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self {
            format: PATCH_FORMAT.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            title: None,
            description: None,
            game_version: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        load_toml(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_toml(self, path)
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}

/// 文件校验和清单
///
/// 键为 `/` 分隔的相对路径。`added` 为仅存在于新版本的附加文件，
/// `modified` 为有补丁的文件，`deleted` 为安装时需要删除的文件。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    pub added: BTreeMap<String, HashResult>,
    pub modified: BTreeMap<String, ModifiedChecksum>,
    pub deleted: Vec<String>,
}

impl Checksums {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "新增: {} 个文件, 删除: {} 个文件, 修改: {} 个文件",
            self.added.len(),
            self.deleted.len(),
            self.modified.len()
        )
    }

    pub fn load(path: &Path) -> Result<Self> {
        load_toml(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_toml(self, path)
    }
}

/// 修改文件在补丁前后的校验和
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedChecksum {
    pub original: HashResult,
    pub modified: HashResult,
}

impl ModifiedChecksum {
    pub fn new(original: HashResult, modified: HashResult) -> Self {
        Self { original, modified }
    }
}

fn load_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).with_context(|| format!("无法读取 {:?}", path))?;
    toml::from_str(&content).with_context(|| format!("无法解析 {:?}", path))
}

fn save_toml<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(value)?;
    fs::write(path, content).with_context(|| format!("无法写入 {:?}", path))?;
    Ok(())
}
