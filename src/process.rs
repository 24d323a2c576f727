//! 外部程序调用
//!
//! [`ProcessRunner`] 负责启动一次外部引擎调用：不弹出窗口、逐行捕获输出，
//! 并在取消时先尝试优雅终止，超过宽限期后强制结束。
//!
//! 进程退出后最多再等待一个宽限期来收集输出：
//! 引擎留下的子进程可能一直占用管道，此时返回已读到的部分。
//!
//! 所有存活的子进程都登记在 [`ProcessManager`] 中，
//! 由一次运行的上下文持有，`kill_all` 可以在任意线程中随时调用。

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;
use crate::error::{JobError, io_err};

type SharedChild = Arc<Mutex<Child>>;

/// 退出后收集输出的最短等待时间
const MIN_DRAIN_WAIT: Duration = Duration::from_millis(100);

/// 输出来自哪个管道
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// 逐行接收外部进程输出的回调，在读取线程中调用
pub type OutputHandler = Arc<dyn Fn(OutputStream, &str) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 一次外部程序调用的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        hide_window(&mut command);
        command
    }
}

#[cfg(windows)]
fn hide_window(command: &mut Command) {
    use std::os::windows::process::CommandExt;

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    command.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_window(_command: &mut Command) {}

/// 外部程序的运行结果
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// 轮询与终止的时间参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
    /// 检查取消标志和进程状态的间隔
    pub poll_interval: Duration,
    /// 优雅终止后等待进程退出的时间，超过后强制结束
    pub grace_period: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            grace_period: Duration::from_millis(500),
        }
    }
}

/// 存活子进程登记表
#[derive(Debug, Default)]
pub struct ProcessManager {
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, SharedChild>>,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, child: Child) -> (u64, SharedChild) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(Mutex::new(child));
        lock(&self.live).insert(id, Arc::clone(&shared));
        (id, shared)
    }

    fn unregister(&self, id: u64) {
        lock(&self.live).remove(&id);
    }

    pub fn live_count(&self) -> usize {
        lock(&self.live).len()
    }

    /// 强制结束所有登记中的子进程，返回被终止的进程数量
    ///
    /// 没有存活进程时直接返回 0。
    pub fn kill_all(&self) -> usize {
        let children: Vec<SharedChild> = lock(&self.live).drain().map(|(_, c)| c).collect();

        let mut signalled = Vec::new();
        for child in children {
            let mut guard = lock(&child);
            if matches!(guard.try_wait(), Ok(None)) {
                request_termination(&mut guard);
                drop(guard);
                signalled.push(child);
            }
        }

        if signalled.is_empty() {
            return 0;
        }

        thread::sleep(Duration::from_millis(200));
        for child in &signalled {
            let mut guard = lock(child);
            if matches!(guard.try_wait(), Ok(None)) {
                let _ = guard.kill();
                let _ = guard.wait();
            }
        }

        tracing::warn!(count = signalled.len(), "已强制结束所有外部进程");
        signalled.len()
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(child.id() as i32);
    if kill(pid, Signal::SIGTERM).is_err() {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    let _ = child.kill();
}

/// 外部程序执行器
#[derive(Clone)]
pub struct ProcessRunner {
    manager: Arc<ProcessManager>,
    options: RunnerOptions,
    on_output: Option<OutputHandler>,
}

impl ProcessRunner {
    pub fn new(manager: Arc<ProcessManager>, options: RunnerOptions) -> Self {
        Self {
            manager,
            options,
            on_output: None,
        }
    }

    /// 每读到一行输出就调用一次 `handler`
    pub fn with_output_handler(mut self, handler: OutputHandler) -> Self {
        self.on_output = Some(handler);
        self
    }

    /// 运行并等待结束，不响应取消
    pub fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, JobError> {
        self.execute(invocation, None)
    }

    /// 运行并等待结束，期间按 `poll_interval` 检查取消标志
    pub fn run_cancellable(
        &self,
        invocation: &Invocation,
        token: &CancellationToken,
    ) -> Result<ProcessOutput, JobError> {
        self.execute(invocation, Some(token))
    }

    fn execute(
        &self,
        invocation: &Invocation,
        token: Option<&CancellationToken>,
    ) -> Result<ProcessOutput, JobError> {
        if token.is_some_and(CancellationToken::is_cancelled) {
            return Err(JobError::Cancelled);
        }

        let program = invocation.program_name();
        let mut child = invocation
            .command()
            .spawn()
            .map_err(|source| JobError::SpawnFailure {
                program: program.clone(),
                source,
            })?;
        tracing::trace!(program = %program, pid = child.id(), "外部进程已启动");

        let (done_tx, done_rx) = mpsc::channel();
        let mut readers = 0;
        let stdout = Arc::new(Mutex::new(String::new()));
        let stderr = Arc::new(Mutex::new(String::new()));
        if let Some(pipe) = child.stdout.take() {
            self.spawn_reader(pipe, OutputStream::Stdout, &stdout, done_tx.clone());
            readers += 1;
        }
        if let Some(pipe) = child.stderr.take() {
            self.spawn_reader(pipe, OutputStream::Stderr, &stderr, done_tx.clone());
            readers += 1;
        }
        drop(done_tx);

        let (id, shared) = self.manager.register(child);
        let waited = self.wait(&shared, token, Path::new(&invocation.program));
        self.manager.unregister(id);

        // 取消时不等待读取线程：孙进程可能仍持有管道
        let status = waited?;
        self.drain(readers, &done_rx, token)?;
        let stdout = lock(&stdout).clone();
        let stderr = lock(&stderr).clone();

        if !status.success() {
            if token.is_some_and(CancellationToken::is_cancelled) {
                return Err(JobError::Cancelled);
            }
            return Err(JobError::NonZeroExit {
                code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(ProcessOutput {
            status,
            stdout,
            stderr,
        })
    }

    fn wait(
        &self,
        child: &Mutex<Child>,
        token: Option<&CancellationToken>,
        program: &Path,
    ) -> Result<ExitStatus, JobError> {
        loop {
            if token.is_some_and(CancellationToken::is_cancelled) {
                self.terminate(child);
                return Err(JobError::Cancelled);
            }

            // 只在 try_wait 期间持有锁，kill_all 才能随时介入
            let polled = lock(child).try_wait().map_err(|e| io_err(program, e))?;
            if let Some(status) = polled {
                return Ok(status);
            }
            thread::sleep(self.options.poll_interval);
        }
    }

    fn terminate(&self, child: &Mutex<Child>) {
        {
            let mut guard = lock(child);
            if !matches!(guard.try_wait(), Ok(None)) {
                return;
            }
            request_termination(&mut guard);
        }

        let deadline = Instant::now() + self.options.grace_period;
        let step = self.options.poll_interval.min(Duration::from_millis(20));
        while Instant::now() < deadline {
            if !matches!(lock(child).try_wait(), Ok(None)) {
                return;
            }
            thread::sleep(step);
        }

        let mut guard = lock(child);
        if matches!(guard.try_wait(), Ok(None)) {
            tracing::debug!(pid = guard.id(), "宽限期已过，强制结束进程");
            let _ = guard.kill();
            let _ = guard.wait();
        }
    }

    /// 等待读取线程读完管道，期间检查取消标志
    fn drain(
        &self,
        mut readers: usize,
        done: &Receiver<()>,
        token: Option<&CancellationToken>,
    ) -> Result<(), JobError> {
        let deadline = Instant::now() + self.options.grace_period.max(MIN_DRAIN_WAIT);
        while readers > 0 {
            if token.is_some_and(CancellationToken::is_cancelled) {
                return Err(JobError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(readers, "输出管道仍被占用，不再等待");
                break;
            }
            match done.recv_timeout(self.options.poll_interval.min(deadline - now)) {
                Ok(()) => readers -= 1,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(())
    }

    fn spawn_reader<R>(
        &self,
        pipe: R,
        stream: OutputStream,
        captured: &Arc<Mutex<String>>,
        done: Sender<()>,
    ) where
        R: Read + Send + 'static,
    {
        let captured = Arc::clone(captured);
        let on_output = self.on_output.clone();
        thread::spawn(move || {
            let mut reader = BufReader::new(pipe);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        let trimmed = text.trim_end_matches(['\r', '\n']);
                        tracing::trace!(stream = stream.as_str(), line = %trimmed, "外部进程输出");
                        if let Some(handler) = &on_output {
                            handler(stream, trimmed);
                        }
                        lock(&captured).push_str(&text);
                    }
                }
            }
            let _ = done.send(());
        });
    }
}
