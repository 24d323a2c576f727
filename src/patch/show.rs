use anyhow::{Result, bail};
use std::path::Path;

use super::layout::PatchLayout;
use super::manifest::{Checksums, Metadata};
use crate::utils::collect_files;

/// 显示补丁包内容
pub fn show_package(package_root: &Path, extension: &str) -> Result<()> {
    let layout = PatchLayout::new(package_root);
    if !layout.storage_dir().is_dir() {
        bail!("不是有效的补丁包目录: {:?}", package_root);
    }
    println!("补丁包: {}\n", package_root.display());

    show_metadata(&layout)?;

    let artifacts = if layout.artifacts_dir().is_dir() {
        collect_files(&layout.artifacts_dir(), extension)?
    } else {
        Vec::new()
    };
    println!("=== 补丁文件 ({}) ===", artifacts.len());
    println!();

    let checksums_path = layout.checksums_path();
    if !checksums_path.is_file() {
        println!("(没有校验和清单)");
        return Ok(());
    }
    let checksums = Checksums::load(&checksums_path)?;

    if !checksums.added.is_empty() {
        println!("=== 新增文件 ({}) ===", checksums.added.len());
        for path in checksums.added.keys() {
            println!("  + {}", path);
        }
        println!();
    }

    if !checksums.deleted.is_empty() {
        println!("=== 删除文件 ({}) ===", checksums.deleted.len());
        for path in &checksums.deleted {
            println!("  - {}", path);
        }
        println!();
    }

    if !checksums.modified.is_empty() {
        println!("=== 修改文件 ({}) ===", checksums.modified.len());
        for (path, checksum) in &checksums.modified {
            println!("  * {}", path);
            println!("    {} -> {}", short(&checksum.original), short(&checksum.modified));
        }
        println!();
    }

    println!("{}", checksums.summary());
    if layout.bundle_path().is_file() {
        println!("附加文件包: {}", layout.bundle_path().display());
    }
    Ok(())
}

fn show_metadata(layout: &PatchLayout) -> Result<()> {
    let metadata_path = layout.metadata_path();
    if metadata_path.is_file() {
        let metadata = Metadata::load(&metadata_path)?;
        println!("=== 元数据 ===");
        println!("格式: {}", metadata.format);
        println!("创建时间: {}", metadata.created_at);
        if let Some(title) = &metadata.title {
            println!("标题: {}", title);
        }
        if let Some(version) = &metadata.game_version {
            println!("游戏版本: {}", version);
        }
        if let Some(desc) = &metadata.description {
            println!("描述: {}", desc);
        }
        println!();
    }
    Ok(())
}

/// 取前 12 个字符；清单可能被手工编辑，不能假定内容都是 ASCII
fn short(hash: &str) -> &str {
    hash.char_indices()
        .nth(12)
        .map_or(hash, |(end, _)| &hash[..end])
}
