use anyhow::{Result, anyhow, bail};
use clap::Parser;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread;

use delta_patcher::RunContext;
use delta_patcher::cli::{Cli, Commands};
use delta_patcher::config::PatcherConfig;
use delta_patcher::engine::ZstdEngine;
use delta_patcher::logging;
use delta_patcher::patch::{
    BuildOptions, InstallOptions, PatchLayout, VerifyOptions, build_package, install_package,
    show_package, verify_patches,
};
use delta_patcher::progress::{ChannelSink, ProgressEvent};

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = PatcherConfig::load_or_default(cli.config.as_deref())?;
    let engine = ZstdEngine::from_config(&config.engine);

    // 进度事件在单独的线程中输出，工作线程只负责发送
    let (sink, events) = ChannelSink::new();
    let printer = thread::spawn(move || print_progress(events));
    let ctx = RunContext::new()
        .with_sink(Arc::new(sink))
        .with_runner_options(config.runner_options());

    let result = run(cli.command, &config, &engine, &ctx);
    drop(ctx);
    let _ = printer.join();
    result
}

fn run(
    command: Commands,
    config: &PatcherConfig,
    engine: &ZstdEngine,
    ctx: &RunContext,
) -> Result<()> {
    match command {
        Commands::Generate {
            source_dir,
            dest_dir,
            output,
            threads,
            fast_fail,
            title,
            description,
            game_version,
        } => {
            if !source_dir.exists() {
                return Err(anyhow!("源目录不存在: {:?}", source_dir));
            }
            if !dest_dir.exists() {
                return Err(anyhow!("目标目录不存在: {:?}", dest_dir));
            }
            let report = build_package(
                &BuildOptions {
                    source_root: source_dir,
                    dest_root: dest_dir,
                    output_root: output.clone(),
                    workers: threads.unwrap_or_else(|| config.worker_count()),
                    fast_fail_threshold: fast_fail.or(config.fast_fail_threshold()),
                    title,
                    description,
                    game_version,
                },
                engine,
                ctx,
            )?;

            let generate = &report.generate;
            println!(
                "共 {} 个文件: 相同 {}, 修改 {}, 新增 {}, 删除 {}",
                generate.total,
                generate.identical,
                generate.changed,
                generate.target_only,
                generate.source_only.len()
            );
            for failure in &generate.failures {
                println!("  ! {}: {}", failure.relative_path.display(), failure.error);
            }
            if let Some(verify) = &report.verify {
                for failure in &verify.failures {
                    println!("  ! 校验失败 {}", failure.relative_path.display());
                }
            }
            if !report.is_success() {
                bail!("补丁包生成未完全成功");
            }
            println!("补丁包已生成: {}", output.display());
        }
        Commands::Install {
            target_dir,
            package,
            threads,
        } => {
            if !target_dir.exists() {
                return Err(anyhow!("目标目录不存在: {:?}", target_dir));
            }
            if !package.exists() {
                return Err(anyhow!("补丁包不存在: {:?}", package));
            }
            let report = install_package(
                &InstallOptions {
                    package_root: package,
                    dest_dir: target_dir,
                    workers: threads.unwrap_or_else(|| config.worker_count()),
                },
                engine,
                ctx,
            )?;

            let (total, succeeded, failed) = report.apply.counts();
            println!("补丁应用完成: 成功 {succeeded}, 失败 {failed}, 共 {total}");
            for failure in &report.apply.failures {
                println!("  ! {}: {}", failure.relative_path.display(), failure.error);
            }
            if !report.is_success() {
                bail!("部分补丁应用失败");
            }
        }
        Commands::Verify {
            package,
            threads,
            fast_fail,
        } => {
            if !package.exists() {
                return Err(anyhow!("补丁包不存在: {:?}", package));
            }
            let report = verify_patches(
                &VerifyOptions {
                    artifact_dir: PatchLayout::new(package).artifacts_dir(),
                    workers: threads.unwrap_or_else(|| config.worker_count()),
                    fast_fail_threshold: fast_fail.or(config.fast_fail_threshold()),
                },
                engine,
                ctx,
            )?;
            for failure in &report.failures {
                println!("  - {}", failure.relative_path.display());
            }
            if !report.is_ok() {
                bail!("补丁校验失败: {} 个无效", report.failures.len());
            }
            println!("所有补丁校验通过 ({})", report.total);
        }
        Commands::Show { package } => {
            if !package.exists() {
                return Err(anyhow!("补丁包不存在: {:?}", package));
            }
            show_package(&package, &config.engine.extension)?;
        }
    }

    Ok(())
}

fn print_progress(events: Receiver<ProgressEvent>) {
    let mut stdout = io::stdout();
    let mut last_phase = String::new();
    for event in events {
        if event.phase != last_phase {
            if !last_phase.is_empty() {
                let _ = writeln!(stdout);
            }
            last_phase = event.phase.clone();
        }
        let _ = write!(
            stdout,
            "\r[{}] {}/{} (失败 {})",
            event.phase,
            event.completed(),
            event.total,
            event.failed
        );
        let _ = stdout.flush();
    }
    if !last_phase.is_empty() {
        let _ = writeln!(stdout);
    }
}
