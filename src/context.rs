use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::process::{OutputHandler, ProcessManager, ProcessRunner, RunnerOptions};
use crate::progress::{NoopSink, ProgressAggregator, ProgressSink};

/// 一次流水线运行的共享上下文
///
/// 持有本次运行的取消标志、存活进程登记表和进度接收方。
/// 每次运行都应创建新的上下文。
#[derive(Clone)]
pub struct RunContext {
    token: CancellationToken,
    processes: Arc<ProcessManager>,
    sink: Arc<dyn ProgressSink>,
    runner_options: RunnerOptions,
    on_output: Option<OutputHandler>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            processes: Arc::new(ProcessManager::new()),
            sink: Arc::new(NoopSink),
            runner_options: RunnerOptions::default(),
            on_output: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_runner_options(mut self, options: RunnerOptions) -> Self {
        self.runner_options = options;
        self
    }

    /// 把引擎的每一行输出转交给 `handler`
    pub fn with_output_handler(mut self, handler: OutputHandler) -> Self {
        self.on_output = Some(handler);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn processes(&self) -> &Arc<ProcessManager> {
        &self.processes
    }

    pub fn runner(&self) -> ProcessRunner {
        let runner = ProcessRunner::new(Arc::clone(&self.processes), self.runner_options);
        match &self.on_output {
            Some(handler) => runner.with_output_handler(Arc::clone(handler)),
            None => runner,
        }
    }

    /// 为一个流水线阶段创建独立的进度计数器，共用同一个接收方
    pub fn progress(&self) -> ProgressAggregator {
        ProgressAggregator::new(Arc::clone(&self.sink))
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            token: self.token.clone(),
            processes: Arc::clone(&self.processes),
        }
    }

    pub fn abort(&self) {
        self.abort_handle().abort();
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// 可以交给其它线程的中止句柄
#[derive(Debug, Clone)]
pub struct AbortHandle {
    token: CancellationToken,
    processes: Arc<ProcessManager>,
}

impl AbortHandle {
    /// 设置取消标志并立即结束所有存活的外部进程
    pub fn abort(&self) {
        self.token.cancel();
        let killed = self.processes.kill_all();
        tracing::info!(killed, "已中止当前运行");
    }
}
