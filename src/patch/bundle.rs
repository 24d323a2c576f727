use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tar::{Archive, Builder};
use walkdir::WalkDir;

/// 把附加文件目录打包为 tar.gz，返回打包的文件数
///
/// 目录不存在或为空时不生成包，返回 0。
pub fn pack_additional(additional_dir: &Path, bundle: &Path) -> Result<usize> {
    if !additional_dir.is_dir() {
        return Ok(0);
    }

    let files: Vec<_> = WalkDir::new(additional_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .collect();
    if files.is_empty() {
        return Ok(0);
    }

    if let Some(parent) = bundle.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(bundle).with_context(|| format!("无法创建 {:?}", bundle))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut tar_builder = Builder::new(encoder);

    for entry in &files {
        let relative_path = entry.path().strip_prefix(additional_dir)?;
        tar_builder
            .append_path_with_name(entry.path(), relative_path)
            .with_context(|| format!("无法打包 {:?}", entry.path()))?;
    }

    let mut writer = tar_builder.into_inner()?.finish()?;
    writer.flush()?;
    tracing::info!(count = files.len(), bundle = %bundle.display(), "附加文件已打包");
    Ok(files.len())
}

/// 解压附加文件包到目标目录，包不存在时跳过并返回 false
pub fn unpack_additional(bundle: &Path, dest_dir: &Path) -> Result<bool> {
    if !bundle.is_file() {
        tracing::info!(bundle = %bundle.display(), "没有附加文件包，跳过");
        return Ok(false);
    }

    let file = File::open(bundle).with_context(|| format!("无法打开 {:?}", bundle))?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    archive
        .unpack(dest_dir)
        .with_context(|| format!("无法解压 {:?}", bundle))?;
    tracing::info!(dest = %dest_dir.display(), "附加文件已解压");
    Ok(true)
}
