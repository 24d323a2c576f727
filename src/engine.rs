//! 外部二进制差分引擎
//!
//! 差分算法本身由外部程序实现，这里只负责拼出命令行。

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::process::Invocation;

/// 二进制差分引擎的三种调用方式
pub trait DeltaEngine: Send + Sync {
    /// 补丁文件扩展名（不含点）
    fn extension(&self) -> &str;

    /// 由 `base` 与 `modified` 生成补丁 `artifact`
    fn create(&self, base: &Path, modified: &Path, artifact: &Path) -> Invocation;

    /// 将 `artifact` 应用到 `base`，结果写入 `output`
    fn apply(&self, base: &Path, artifact: &Path, output: &Path) -> Invocation;

    /// 校验补丁文件完整性
    fn test(&self, artifact: &Path) -> Invocation;
}

/// 基于 `zstd --patch-from` 的引擎
#[derive(Debug, Clone)]
pub struct ZstdEngine {
    program: PathBuf,
    extension: String,
    long_window: Option<u32>,
}

impl ZstdEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extension: "zst".to_string(),
            long_window: Some(31),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            program: config.program.clone(),
            extension: config.extension.clone(),
            long_window: config.long_window,
        }
    }

    pub fn with_long_window(mut self, window: Option<u32>) -> Self {
        self.long_window = window;
        self
    }

    fn patch_from(base: &Path) -> OsString {
        let mut flag = OsString::from("--patch-from=");
        flag.push(base.as_os_str());
        flag
    }

    fn with_window(&self, invocation: Invocation) -> Invocation {
        match self.long_window {
            Some(window) => invocation.arg(format!("--long={window}")),
            None => invocation,
        }
    }
}

impl Default for ZstdEngine {
    fn default() -> Self {
        Self::new("zstd")
    }
}

impl DeltaEngine for ZstdEngine {
    fn extension(&self) -> &str {
        &self.extension
    }

    fn create(&self, base: &Path, modified: &Path, artifact: &Path) -> Invocation {
        let invocation = Invocation::new(&self.program)
            .args(["-q", "-f"])
            .arg(Self::patch_from(base))
            .arg(modified)
            .arg("-o")
            .arg(artifact);
        self.with_window(invocation)
    }

    fn apply(&self, base: &Path, artifact: &Path, output: &Path) -> Invocation {
        let invocation = Invocation::new(&self.program)
            .args(["-d", "-q", "-f", "-T1"])
            .arg(Self::patch_from(base))
            .arg(artifact)
            .arg("-o")
            .arg(output);
        self.with_window(invocation)
    }

    fn test(&self, artifact: &Path) -> Invocation {
        Invocation::new(&self.program).args(["-t", "-q"]).arg(artifact)
    }
}
