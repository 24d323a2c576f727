#![cfg(unix)]

mod common;

use anyhow::Result;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use common::{
    ScriptEngine, copy_dir, file_names, new_tree, old_tree, test_context, tree_hashes, write_file,
};
use delta_patcher::JobError;
use delta_patcher::patch::{
    ApplyOptions, BuildOptions, Checksums, GenerateOptions, InstallOptions, Metadata,
    ModifiedChecksum, PATCH_FORMAT, PatchLayout, VerifyOptions, apply_patches, build_package,
    generate_patches, install_package, verify_patches,
};
use delta_patcher::progress::ChannelSink;
use delta_patcher::utils::compute_file_hash;

fn generate_options(
    source: &TempDir,
    dest: &TempDir,
    out: &TempDir,
    workers: usize,
) -> GenerateOptions {
    GenerateOptions {
        source_root: source.path().to_path_buf(),
        dest_root: dest.path().to_path_buf(),
        artifact_dir: out.path().join("patchfiles"),
        target_only_dir: out.path().join("additional_files"),
        workers,
    }
}

#[test]
fn generate_classifies_and_creates_artifacts() -> Result<()> {
    let source = TempDir::new()?;
    let dest = TempDir::new()?;
    let out = TempDir::new()?;
    old_tree(source.path());
    new_tree(dest.path());

    let report = generate_patches(
        &generate_options(&source, &dest, &out, 4),
        &ScriptEngine::copying(),
        &test_context(),
    )?;

    assert!(report.is_success());
    assert_eq!(report.total, 3);
    assert_eq!(report.identical, 1);
    assert_eq!(report.changed, 1);
    assert_eq!(report.target_only, 1);
    assert_eq!(report.artifacts, 1);
    assert_eq!(report.source_only.len(), 2);

    assert!(out.path().join("patchfiles/data/b.bin.zst").is_file());
    assert!(!out.path().join("patchfiles/a.txt.zst").exists());
    assert!(out.path().join("additional_files/extra/d.txt").is_file());

    let checksums = &report.checksums;
    assert_eq!(
        checksums.modified.get("data/b.bin"),
        Some(&ModifiedChecksum::new(
            compute_file_hash(&source.path().join("data/b.bin"))?,
            compute_file_hash(&dest.path().join("data/b.bin"))?,
        ))
    );
    assert!(checksums.added.contains_key("extra/d.txt"));
    assert_eq!(checksums.deleted, vec!["c.txt", "sub/deep/e.dat"]);

    // 自检用的临时文件不会留下
    let leftovers: Vec<_> = walkdir::WalkDir::new(out.path())
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            name.ends_with(".base") || name.ends_with(".check")
        })
        .collect();
    assert!(leftovers.is_empty());
    Ok(())
}

#[test]
fn generate_results_do_not_depend_on_worker_count() -> Result<()> {
    let source = TempDir::new()?;
    let dest = TempDir::new()?;
    old_tree(source.path());
    new_tree(dest.path());
    for i in 0..12 {
        write_file(source.path(), &format!("same/f{i:02}.bin"), format!("same {i}").as_bytes());
        write_file(dest.path(), &format!("same/f{i:02}.bin"), format!("same {i}").as_bytes());
        write_file(source.path(), &format!("mod/f{i:02}.bin"), format!("old {i}").as_bytes());
        write_file(dest.path(), &format!("mod/f{i:02}.bin"), format!("new {i}").as_bytes());
        write_file(dest.path(), &format!("add/f{i:02}.bin"), format!("add {i}").as_bytes());
        write_file(source.path(), &format!("del/f{i:02}.bin"), format!("del {i}").as_bytes());
    }

    let mut runs = Vec::new();
    for workers in [1, 4, 64] {
        let out = TempDir::new()?;
        let report = generate_patches(
            &generate_options(&source, &dest, &out, workers),
            &ScriptEngine::copying(),
            &test_context(),
        )?;
        assert!(report.is_success());
        let counts = (
            report.total,
            report.identical,
            report.changed,
            report.target_only,
            report.source_only.clone(),
            report.artifacts,
        );
        runs.push((
            counts,
            tree_hashes(&out.path().join("patchfiles")),
            tree_hashes(&out.path().join("additional_files")),
            report.checksums,
        ));
    }

    let (counts, artifacts, additional, _) = &runs[0];
    assert_eq!(counts.0, 39);
    assert_eq!((counts.1, counts.2, counts.3), (13, 13, 13));
    assert_eq!(counts.4.len(), 14);
    assert_eq!(counts.5, 13);
    assert_eq!(artifacts.len(), 13);
    assert_eq!(additional.len(), 13);
    for run in &runs[1..] {
        assert_eq!(run, &runs[0]);
    }
    Ok(())
}

#[test]
fn generate_reports_progress_for_every_destination_file() -> Result<()> {
    let source = TempDir::new()?;
    let dest = TempDir::new()?;
    let out = TempDir::new()?;
    old_tree(source.path());
    new_tree(dest.path());

    let (sink, events) = ChannelSink::new();
    let ctx = test_context().with_sink(Arc::new(sink));
    generate_patches(
        &generate_options(&source, &dest, &out, 2),
        &ScriptEngine::copying(),
        &ctx,
    )?;
    drop(ctx);

    let events: Vec<_> = events.into_iter().filter(|e| e.phase == "生成补丁").collect();
    let last = events.last().expect("progress events");
    assert_eq!(last.total, 3);
    assert_eq!(last.done, 3);
    assert_eq!(last.failed, 0);
    assert!(events.windows(2).all(|w| w[0].completed() <= w[1].completed()));
    Ok(())
}

#[test]
fn unreadable_file_counts_as_failed_progress() -> Result<()> {
    let source = TempDir::new()?;
    let dest = TempDir::new()?;
    let out = TempDir::new()?;
    old_tree(source.path());
    new_tree(dest.path());
    // 源目录中 `x` 是普通文件，读取 `x/y.bin` 时返回 ENOTDIR
    write_file(source.path(), "x", b"a plain file");
    write_file(dest.path(), "x/y.bin", b"nested under x");

    let (sink, events) = ChannelSink::new();
    let ctx = test_context().with_sink(Arc::new(sink));
    let report = generate_patches(
        &generate_options(&source, &dest, &out, 2),
        &ScriptEngine::copying(),
        &ctx,
    )?;
    drop(ctx);

    assert!(!report.is_success());
    assert_eq!(report.total, 4);
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(report.failures[0].error, JobError::Io { .. }));
    assert_eq!(report.artifacts, 1);

    let events: Vec<_> = events.into_iter().filter(|e| e.phase == "生成补丁").collect();
    let last = events.last().expect("progress events");
    assert_eq!(last.total, 4);
    assert_eq!(last.failed, 1);
    assert_eq!(last.done + last.failed, last.total);
    Ok(())
}

#[test]
fn self_check_mismatch_discards_artifact() -> Result<()> {
    let source = TempDir::new()?;
    let dest = TempDir::new()?;
    let out = TempDir::new()?;
    old_tree(source.path());
    new_tree(dest.path());

    let engine = ScriptEngine::copying().with_apply(r#"printf corrupted > "$3""#);
    let report = generate_patches(
        &generate_options(&source, &dest, &out, 2),
        &engine,
        &test_context(),
    )?;

    assert!(!report.is_success());
    assert_eq!(report.artifacts, 0);
    assert_eq!(report.mismatches(), 1);
    assert!(matches!(
        report.failures[0].error,
        JobError::VerificationMismatch { .. }
    ));
    assert!(!out.path().join("patchfiles/data/b.bin.zst").exists());
    assert!(report.checksums.modified.is_empty());
    // 其它文件不受影响
    assert!(report.checksums.added.contains_key("extra/d.txt"));
    Ok(())
}

#[test]
fn failing_engine_is_reported_per_file() -> Result<()> {
    let source = TempDir::new()?;
    let dest = TempDir::new()?;
    let out = TempDir::new()?;
    old_tree(source.path());
    new_tree(dest.path());

    let engine = ScriptEngine::copying().with_create("echo no space left 1>&2; exit 2");
    let report = generate_patches(
        &generate_options(&source, &dest, &out, 2),
        &engine,
        &test_context(),
    )?;

    assert_eq!(report.failures.len(), 1);
    match &report.failures[0].error {
        JobError::NonZeroExit { code, stderr } => {
            assert_eq!(*code, Some(2));
            assert_eq!(stderr, "no space left");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}

/// 建立一个补丁目录：每个文件的补丁内容就是新文件
fn stage_artifacts(artifacts: &TempDir, names: &[&str]) {
    for name in names {
        write_file(
            artifacts.path(),
            &format!("{name}.zst"),
            format!("patched {name}").as_bytes(),
        );
    }
}

fn apply_options(artifacts: &TempDir, dest: &TempDir, workers: usize) -> ApplyOptions {
    ApplyOptions {
        artifact_dir: artifacts.path().to_path_buf(),
        dest_dir: dest.path().to_path_buf(),
        workers,
    }
}

#[test]
fn apply_replaces_every_target() -> Result<()> {
    let artifacts = TempDir::new()?;
    let dest = TempDir::new()?;
    let names = ["a.bin", "dir/b.bin", "dir/nested/c.bin"];
    stage_artifacts(&artifacts, &names);
    for name in names {
        write_file(dest.path(), name, b"original");
    }

    let report = apply_patches(
        &apply_options(&artifacts, &dest, 3),
        &ScriptEngine::copying(),
        None,
        &test_context(),
    )?;

    assert_eq!(report.counts(), (3, 3, 0));
    assert!(report.is_success());
    for name in names {
        assert_eq!(
            fs::read_to_string(dest.path().join(name))?,
            format!("patched {name}")
        );
    }
    // 不留下临时文件
    assert_eq!(file_names(dest.path()), names);
    Ok(())
}

#[test]
fn missing_targets_fail_individually() -> Result<()> {
    let names = ["a.bin", "b.bin", "c.bin"];
    for missing in [3, 2, 1] {
        let artifacts = TempDir::new()?;
        let dest = TempDir::new()?;
        stage_artifacts(&artifacts, &names);
        for name in &names[missing..] {
            write_file(dest.path(), name, b"original");
        }

        let report = apply_patches(
            &apply_options(&artifacts, &dest, 2),
            &ScriptEngine::copying(),
            None,
            &test_context(),
        )?;

        assert_eq!(report.counts(), (3, 3 - missing, missing));
        assert!(
            report
                .failures
                .iter()
                .all(|f| matches!(f.error, JobError::TargetMissing { .. }))
        );
        for name in &names[..missing] {
            assert!(!dest.path().join(name).exists());
        }
    }
    Ok(())
}

#[test]
fn empty_output_keeps_original() -> Result<()> {
    let artifacts = TempDir::new()?;
    let dest = TempDir::new()?;
    stage_artifacts(&artifacts, &["a.bin"]);
    write_file(dest.path(), "a.bin", b"original");

    let engine = ScriptEngine::copying().with_apply(r#": > "$3""#);
    let report = apply_patches(
        &apply_options(&artifacts, &dest, 1),
        &engine,
        None,
        &test_context(),
    )?;

    assert_eq!(report.counts(), (1, 0, 1));
    assert!(matches!(
        report.failures[0].error,
        JobError::ApplyProducedEmptyOutput { .. }
    ));
    assert_eq!(fs::read(dest.path().join("a.bin"))?, b"original");
    assert_eq!(file_names(dest.path()), ["a.bin"]);
    Ok(())
}

#[test]
fn neighbouring_files_are_never_used_as_scratch() -> Result<()> {
    let artifacts = TempDir::new()?;
    let dest = TempDir::new()?;
    stage_artifacts(&artifacts, &["a.bin"]);
    write_file(dest.path(), "a.bin", b"original");
    write_file(dest.path(), "a.bin.new", b"real game file");
    write_file(dest.path(), "a.bin.tmp", b"another game file");

    let report = apply_patches(
        &apply_options(&artifacts, &dest, 1),
        &ScriptEngine::copying(),
        None,
        &test_context(),
    )?;
    assert_eq!(report.counts(), (1, 1, 0));

    // 失败的应用同样不能碰到相邻文件
    let failed = apply_patches(
        &apply_options(&artifacts, &dest, 1),
        &ScriptEngine::copying().with_apply(r#": > "$3""#),
        None,
        &test_context(),
    )?;
    assert_eq!(failed.counts(), (1, 0, 1));

    assert_eq!(fs::read(dest.path().join("a.bin"))?, b"patched a.bin");
    assert_eq!(fs::read(dest.path().join("a.bin.new"))?, b"real game file");
    assert_eq!(fs::read(dest.path().join("a.bin.tmp"))?, b"another game file");
    assert_eq!(file_names(dest.path()), ["a.bin", "a.bin.new", "a.bin.tmp"]);
    Ok(())
}

#[test]
fn replaced_file_keeps_its_permissions() -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let artifacts = TempDir::new()?;
    let dest = TempDir::new()?;
    stage_artifacts(&artifacts, &["game.sh"]);
    let target = write_file(dest.path(), "game.sh", b"original");
    fs::set_permissions(&target, fs::Permissions::from_mode(0o755))?;

    let report = apply_patches(
        &apply_options(&artifacts, &dest, 1),
        &ScriptEngine::copying(),
        None,
        &test_context(),
    )?;

    assert_eq!(report.counts(), (1, 1, 0));
    assert_eq!(fs::read(&target)?, b"patched game.sh");
    assert_eq!(fs::metadata(&target)?.permissions().mode() & 0o777, 0o755);
    Ok(())
}

#[test]
fn checksum_mismatch_keeps_original() -> Result<()> {
    let artifacts = TempDir::new()?;
    let dest = TempDir::new()?;
    stage_artifacts(&artifacts, &["a.bin"]);
    let target = write_file(dest.path(), "a.bin", b"original");

    let mut checksums = Checksums::new();
    checksums.modified.insert(
        "a.bin".to_string(),
        ModifiedChecksum::new(compute_file_hash(&target)?, "0".repeat(64)),
    );

    let report = apply_patches(
        &apply_options(&artifacts, &dest, 1),
        &ScriptEngine::copying(),
        Some(&checksums),
        &test_context(),
    )?;

    assert_eq!(report.counts(), (1, 0, 1));
    assert!(matches!(
        report.failures[0].error,
        JobError::VerificationMismatch { .. }
    ));
    assert_eq!(fs::read(target)?, b"original");
    Ok(())
}

#[test]
fn already_patched_file_is_skipped() -> Result<()> {
    let artifacts = TempDir::new()?;
    let dest = TempDir::new()?;
    stage_artifacts(&artifacts, &["a.bin"]);
    let target = write_file(dest.path(), "a.bin", b"patched a.bin");

    let mut checksums = Checksums::new();
    checksums.modified.insert(
        "a.bin".to_string(),
        ModifiedChecksum::new("1".repeat(64), compute_file_hash(&target)?),
    );

    // 引擎一旦被调用就会破坏文件
    let engine = ScriptEngine::copying().with_apply(r#"printf broken > "$3""#);
    let report = apply_patches(
        &apply_options(&artifacts, &dest, 1),
        &engine,
        Some(&checksums),
        &test_context(),
    )?;

    assert_eq!(report.counts(), (1, 1, 0));
    assert_eq!(fs::read(target)?, b"patched a.bin");
    Ok(())
}

#[test]
fn abort_during_apply_leaves_originals_untouched() -> Result<()> {
    let artifacts = TempDir::new()?;
    let dest = TempDir::new()?;
    let names = ["a.bin", "b.bin", "c.bin"];
    stage_artifacts(&artifacts, &names);
    for name in names {
        write_file(dest.path(), name, b"original");
    }

    let engine = ScriptEngine::copying().with_apply(r#"printf partial > "$3"; exec sleep 5"#);
    let ctx = test_context();
    let handle = ctx.abort_handle();
    let aborter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        handle.abort();
    });

    let started = Instant::now();
    let report = apply_patches(&apply_options(&artifacts, &dest, 1), &engine, None, &ctx)?;
    aborter.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(report.cancelled);
    assert!(!report.is_success());
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(ctx.processes().live_count(), 0);
    for name in names {
        assert_eq!(fs::read(dest.path().join(name))?, b"original");
    }
    assert_eq!(file_names(dest.path()), names);
    Ok(())
}

fn stage_verify(artifacts: &TempDir, good: usize, bad: usize) {
    for i in 0..good {
        write_file(artifacts.path(), &format!("good{i:02}.zst"), b"fine");
    }
    for i in 0..bad {
        write_file(artifacts.path(), &format!("bad{i:02}.zst"), b"bad");
    }
}

fn verify_engine() -> ScriptEngine {
    ScriptEngine::copying().with_test(r#"sleep 0.05; ! grep -q bad "$1""#)
}

#[test]
fn verify_without_threshold_checks_everything() -> Result<()> {
    let artifacts = TempDir::new()?;
    stage_verify(&artifacts, 5, 10);

    let report = verify_patches(
        &VerifyOptions {
            artifact_dir: artifacts.path().to_path_buf(),
            workers: 4,
            fast_fail_threshold: None,
        },
        &verify_engine(),
        &test_context(),
    )?;

    assert_eq!(report.total, 15);
    assert_eq!(report.passed, 5);
    assert_eq!(report.failures.len(), 10);
    assert!(!report.aborted);
    assert!(!report.is_ok());
    assert_eq!(report.unchecked(), 0);
    Ok(())
}

#[test]
fn verify_stops_after_threshold() -> Result<()> {
    let artifacts = TempDir::new()?;
    stage_verify(&artifacts, 0, 20);

    let ctx = test_context();
    let report = verify_patches(
        &VerifyOptions {
            artifact_dir: artifacts.path().to_path_buf(),
            workers: 2,
            fast_fail_threshold: Some(3),
        },
        &verify_engine(),
        &ctx,
    )?;

    assert!(report.aborted);
    assert!(!report.cancelled);
    assert!(report.failures.len() >= 3);
    assert!(report.failures.len() < 20);
    assert!(report.unchecked() > 0);
    // 提前终止只影响本阶段
    assert!(!ctx.token().is_cancelled());
    Ok(())
}

#[test]
fn verify_threshold_not_reached_runs_to_completion() -> Result<()> {
    let artifacts = TempDir::new()?;
    stage_verify(&artifacts, 8, 2);

    let report = verify_patches(
        &VerifyOptions {
            artifact_dir: artifacts.path().to_path_buf(),
            workers: 3,
            fast_fail_threshold: Some(5),
        },
        &verify_engine(),
        &test_context(),
    )?;

    assert!(!report.aborted);
    assert_eq!(report.passed, 8);
    assert_eq!(report.failures.len(), 2);
    Ok(())
}

#[test]
fn build_and_install_round_trip() -> Result<()> {
    let source = TempDir::new()?;
    let dest = TempDir::new()?;
    let package = TempDir::new()?;
    let game = TempDir::new()?;
    old_tree(source.path());
    new_tree(dest.path());
    copy_dir(source.path(), game.path());

    let engine = ScriptEngine::copying();
    let build = build_package(
        &BuildOptions {
            source_root: source.path().to_path_buf(),
            dest_root: dest.path().to_path_buf(),
            output_root: package.path().to_path_buf(),
            workers: 4,
            fast_fail_threshold: None,
            title: Some("测试补丁".to_string()),
            description: None,
            game_version: Some("1.2.0".to_string()),
        },
        &engine,
        &test_context(),
    )?;

    assert!(build.is_success());
    assert_eq!(build.bundled_files, 1);
    let layout = PatchLayout::new(package.path());
    assert!(layout.checksums_path().is_file());
    assert!(layout.bundle_path().is_file());
    assert!(!layout.additional_dir().exists());

    let metadata = Metadata::load(&layout.metadata_path())?;
    assert_eq!(metadata.format, PATCH_FORMAT);
    assert_eq!(metadata.title.as_deref(), Some("测试补丁"));
    assert_eq!(metadata.game_version.as_deref(), Some("1.2.0"));

    let install = install_package(
        &InstallOptions {
            package_root: package.path().to_path_buf(),
            dest_dir: game.path().to_path_buf(),
            workers: 4,
        },
        &engine,
        &test_context(),
    )?;

    assert!(install.is_success());
    assert!(install.bundle_applied);
    assert_eq!(tree_hashes(game.path()), tree_hashes(dest.path()));
    assert!(!game.path().join("sub").exists());
    Ok(())
}

#[test]
fn install_after_cancel_skips_finalization() -> Result<()> {
    let source = TempDir::new()?;
    let dest = TempDir::new()?;
    let package = TempDir::new()?;
    let game = TempDir::new()?;
    old_tree(source.path());
    new_tree(dest.path());
    copy_dir(source.path(), game.path());

    build_package(
        &BuildOptions {
            source_root: source.path().to_path_buf(),
            dest_root: dest.path().to_path_buf(),
            output_root: package.path().to_path_buf(),
            workers: 2,
            fast_fail_threshold: None,
            title: None,
            description: None,
            game_version: None,
        },
        &ScriptEngine::copying(),
        &test_context(),
    )?;

    let ctx = test_context();
    ctx.abort();
    let install = install_package(
        &InstallOptions {
            package_root: package.path().to_path_buf(),
            dest_dir: game.path().to_path_buf(),
            workers: 2,
        },
        &ScriptEngine::copying(),
        &ctx,
    )?;

    assert!(install.apply.cancelled);
    assert!(install.deletions.is_none());
    assert!(!install.bundle_applied);
    assert_eq!(tree_hashes(game.path()), tree_hashes(source.path()));
    Ok(())
}

#[test]
fn file_emptied_in_new_version_ships_as_additional() -> Result<()> {
    let source = TempDir::new()?;
    let dest = TempDir::new()?;
    let out = TempDir::new()?;
    write_file(source.path(), "log/latest.txt", b"previous session");
    write_file(dest.path(), "log/latest.txt", b"");

    let report = generate_patches(
        &generate_options(&source, &dest, &out, 2),
        &ScriptEngine::copying(),
        &test_context(),
    )?;

    assert!(report.is_success());
    assert_eq!(report.changed, 1);
    assert_eq!(report.artifacts, 0);
    assert!(report.checksums.modified.is_empty());
    assert!(report.checksums.added.contains_key("log/latest.txt"));
    assert_eq!(fs::read(out.path().join("additional_files/log/latest.txt"))?, b"");
    Ok(())
}
