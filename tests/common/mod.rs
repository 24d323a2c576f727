#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use delta_patcher::RunContext;
use delta_patcher::engine::DeltaEngine;
use delta_patcher::process::{Invocation, RunnerOptions};
use delta_patcher::utils::compute_file_hash;
use walkdir::WalkDir;

/// 用 `sh -c` 脚本模拟的差分引擎
///
/// 脚本参数：create 为 `$1=base $2=modified $3=artifact`，
/// apply 为 `$1=base $2=artifact $3=output`，test 为 `$1=artifact`。
/// 默认的“补丁”就是新文件本身的拷贝。
#[derive(Debug, Clone)]
pub struct ScriptEngine {
    create: String,
    apply: String,
    test: String,
}

impl ScriptEngine {
    pub fn copying() -> Self {
        Self {
            create: r#"cp "$2" "$3""#.to_string(),
            apply: r#"cp "$2" "$3""#.to_string(),
            test: r#"test -s "$1""#.to_string(),
        }
    }

    pub fn with_create(mut self, script: &str) -> Self {
        self.create = script.to_string();
        self
    }

    pub fn with_apply(mut self, script: &str) -> Self {
        self.apply = script.to_string();
        self
    }

    pub fn with_test(mut self, script: &str) -> Self {
        self.test = script.to_string();
        self
    }

    fn script(script: &str, paths: &[&Path]) -> Invocation {
        Invocation::new("sh")
            .arg("-c")
            .arg(script)
            .arg("sh")
            .args(paths.iter().map(|p| p.as_os_str()))
    }
}

impl DeltaEngine for ScriptEngine {
    fn extension(&self) -> &str {
        "zst"
    }

    fn create(&self, base: &Path, modified: &Path, artifact: &Path) -> Invocation {
        Self::script(&self.create, &[base, modified, artifact])
    }

    fn apply(&self, base: &Path, artifact: &Path, output: &Path) -> Invocation {
        Self::script(&self.apply, &[base, artifact, output])
    }

    fn test(&self, artifact: &Path) -> Invocation {
        Self::script(&self.test, &[artifact])
    }
}

pub fn fast_runner() -> RunnerOptions {
    RunnerOptions {
        poll_interval: Duration::from_millis(20),
        grace_period: Duration::from_millis(200),
    }
}

pub fn test_context() -> RunContext {
    RunContext::new().with_runner_options(fast_runner())
}

pub fn write_file(root: &Path, relative: &str, contents: &[u8]) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

pub fn copy_dir(source: &Path, dest: &Path) {
    for entry in WalkDir::new(source).into_iter().filter_map(Result::ok) {
        if entry.file_type().is_file() {
            let relative = entry.path().strip_prefix(source).unwrap();
            let target = dest.join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::copy(entry.path(), &target).unwrap();
        }
    }
}

/// 目录树中每个文件的相对路径与哈希
pub fn tree_hashes(root: &Path) -> BTreeMap<String, String> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            (relative, compute_file_hash(e.path()).unwrap())
        })
        .collect()
}

/// 目录树中所有文件的相对路径
pub fn file_names(root: &Path) -> Vec<String> {
    tree_hashes(root).into_keys().collect()
}

/// 旧版本：a 不变，b 被修改，c 与 sub/deep/e 被删除
pub fn old_tree(root: &Path) {
    write_file(root, "a.txt", b"same content");
    write_file(root, "data/b.bin", b"old binary payload");
    write_file(root, "c.txt", b"going away");
    write_file(root, "sub/deep/e.dat", b"also going away");
}

/// 新版本：b 被修改，新增 d
pub fn new_tree(root: &Path) {
    write_file(root, "a.txt", b"same content");
    write_file(root, "data/b.bin", b"new binary payload, longer than before");
    write_file(root, "extra/d.txt", b"brand new file");
}
