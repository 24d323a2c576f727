//! 补丁包的生成与安装流程
//!
//! 生成：补丁 → 清单与元数据 → 打包附加文件 → 校验补丁。
//! 安装：应用补丁 → 执行删除列表 → 解压附加文件。

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::context::RunContext;
use crate::engine::DeltaEngine;
use crate::patch::apply::{ApplyOptions, ApplyReport, apply_patches};
use crate::patch::bundle::{pack_additional, unpack_additional};
use crate::patch::finalize::{DeletionReport, apply_deletions};
use crate::patch::generate::{GenerateOptions, GenerateReport, generate_patches};
use crate::patch::layout::PatchLayout;
use crate::patch::manifest::{Checksums, Metadata};
use crate::patch::verify::{VerifyOptions, VerifyReport, verify_patches};

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub source_root: PathBuf,
    pub dest_root: PathBuf,
    pub output_root: PathBuf,
    pub workers: usize,
    pub fast_fail_threshold: Option<usize>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub game_version: Option<String>,
}

#[derive(Debug)]
pub struct BuildReport {
    pub generate: GenerateReport,
    pub bundled_files: usize,
    /// 生成被取消时不会执行校验
    pub verify: Option<VerifyReport>,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.generate.is_success() && self.verify.as_ref().is_some_and(VerifyReport::is_ok)
    }
}

/// 生成完整的补丁包
pub fn build_package(
    options: &BuildOptions,
    engine: &dyn DeltaEngine,
    ctx: &RunContext,
) -> Result<BuildReport> {
    let layout = PatchLayout::new(&options.output_root);
    layout.create_dirs()?;

    let generate = generate_patches(
        &GenerateOptions {
            source_root: options.source_root.clone(),
            dest_root: options.dest_root.clone(),
            artifact_dir: layout.artifacts_dir(),
            target_only_dir: layout.additional_dir(),
            workers: options.workers,
        },
        engine,
        ctx,
    )?;
    if generate.cancelled {
        return Ok(BuildReport {
            generate,
            bundled_files: 0,
            verify: None,
        });
    }

    generate.checksums.save(&layout.checksums_path())?;
    let mut metadata = Metadata::new();
    metadata.title = options.title.clone();
    metadata.description = options.description.clone();
    metadata.game_version = options.game_version.clone();
    metadata.save(&layout.metadata_path())?;
    tracing::info!("{}", generate.checksums.summary());

    let bundled_files = pack_additional(&layout.additional_dir(), &layout.bundle_path())?;
    fs::remove_dir_all(layout.additional_dir())
        .with_context(|| format!("无法清理 {:?}", layout.additional_dir()))?;

    let verify = verify_patches(
        &VerifyOptions {
            artifact_dir: layout.artifacts_dir(),
            workers: options.workers,
            fast_fail_threshold: options.fast_fail_threshold,
        },
        engine,
        ctx,
    )?;

    Ok(BuildReport {
        generate,
        bundled_files,
        verify: Some(verify),
    })
}

#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub package_root: PathBuf,
    pub dest_dir: PathBuf,
    pub workers: usize,
}

#[derive(Debug)]
pub struct InstallReport {
    pub apply: ApplyReport,
    /// 应用被取消时不会执行删除和解压
    pub deletions: Option<DeletionReport>,
    pub bundle_applied: bool,
}

impl InstallReport {
    pub fn is_success(&self) -> bool {
        self.apply.is_success()
            && self
                .deletions
                .as_ref()
                .is_some_and(|d| d.failed.is_empty())
    }
}

/// 将补丁包安装到目标目录
///
/// 部分补丁失败时仍会继续执行删除列表和附加文件，由调用方决定如何处理失败。
pub fn install_package(
    options: &InstallOptions,
    engine: &dyn DeltaEngine,
    ctx: &RunContext,
) -> Result<InstallReport> {
    let layout = PatchLayout::new(&options.package_root);
    let checksums_path = layout.checksums_path();
    let checksums = if checksums_path.is_file() {
        Some(Checksums::load(&checksums_path)?)
    } else {
        tracing::warn!(path = %checksums_path.display(), "未找到校验和清单，跳过校验与删除");
        None
    };

    let apply = apply_patches(
        &ApplyOptions {
            artifact_dir: layout.artifacts_dir(),
            dest_dir: options.dest_dir.clone(),
            workers: options.workers,
        },
        engine,
        checksums.as_ref(),
        ctx,
    )?;
    if apply.cancelled {
        return Ok(InstallReport {
            apply,
            deletions: None,
            bundle_applied: false,
        });
    }

    let deleted = checksums.map(|c| c.deleted).unwrap_or_default();
    let deletions = apply_deletions(&options.dest_dir, &deleted);
    let bundle_applied = unpack_additional(&layout.bundle_path(), &options.dest_dir)?;

    Ok(InstallReport {
        apply,
        deletions: Some(deletions),
        bundle_applied,
    })
}
