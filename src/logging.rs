use tracing_subscriber::{EnvFilter, fmt};

/// 初始化日志输出，`RUST_LOG` 优先于命令行给出的详细程度
///
/// 重复调用不会报错。
pub fn init(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
