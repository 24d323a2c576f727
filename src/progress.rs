//! 进度汇总
//!
//! 所有计数都在同一把锁下更新，每次更新后把新的状态交给 [`ProgressSink`]。
//! 事件在持锁期间投递，因此消费者看到的计数单调递增；
//! sink 内部不能反过来调用同一个 [`ProgressAggregator`]。
//!
//! 需要在单线程中处理进度的消费者（界面、日志输出）应使用 [`ChannelSink`]，
//! 在自己的线程里读取事件，而不是让工作线程直接调用它。

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 当前阶段的进度状态
///
/// `done` 为成功完成的任务数，`failed` 为失败的任务数。
/// `total` 只由 [`ProgressAggregator::reset`] 设置；完成数超过它说明调用方少报了总数，
/// 此时计数照常增加并输出警告，`total` 保持不变。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressState {
    pub phase: String,
    pub total: usize,
    pub done: usize,
    pub failed: usize,
}

impl ProgressState {
    /// 已处理的任务数（成功 + 失败）
    pub fn completed(&self) -> usize {
        self.done + self.failed
    }

    pub fn is_finished(&self) -> bool {
        self.completed() == self.total
    }
}

/// 一次进度更新
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub phase: String,
    pub done: usize,
    pub failed: usize,
    pub total: usize,
    pub message: String,
}

impl ProgressEvent {
    fn from_state(state: &ProgressState, message: String) -> Self {
        Self {
            phase: state.phase.clone(),
            done: state.done,
            failed: state.failed,
            total: state.total,
            message,
        }
    }

    pub fn completed(&self) -> usize {
        self.done + self.failed
    }
}

/// 进度事件的接收方，可能在任意工作线程中被调用
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// 把事件写入 tracing 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn on_progress(&self, event: &ProgressEvent) {
        tracing::debug!(
            phase = %event.phase,
            done = event.done,
            failed = event.failed,
            total = event.total,
            "{}",
            event.message
        );
    }
}

/// 通过通道转发事件，由消费者在自己的线程中读取
#[derive(Debug)]
pub struct ChannelSink {
    tx: Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn on_progress(&self, event: &ProgressEvent) {
        // 消费者已退出时静默丢弃
        let _ = self.tx.send(event.clone());
    }
}

/// 线程安全的进度计数器
pub struct ProgressAggregator {
    state: Mutex<ProgressState>,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressAggregator {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            state: Mutex::new(ProgressState::default()),
            sink,
        }
    }

    pub fn silent() -> Self {
        Self::new(Arc::new(NoopSink))
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 开始新的阶段并清零计数
    pub fn reset(&self, total: usize, phase: impl Into<String>) {
        let mut state = self.lock();
        *state = ProgressState {
            phase: phase.into(),
            total,
            done: 0,
            failed: 0,
        };
        self.sink
            .on_progress(&ProgressEvent::from_state(&state, String::new()));
    }

    pub fn set_phase(&self, phase: impl Into<String>) {
        let mut state = self.lock();
        state.phase = phase.into();
        self.sink
            .on_progress(&ProgressEvent::from_state(&state, String::new()));
    }

    /// 记录一个成功完成的任务
    pub fn advance(&self, message: impl Into<String>) {
        self.update(message.into(), |state| state.done += 1);
    }

    /// 记录一个失败的任务
    pub fn fail(&self, message: impl Into<String>) {
        self.update(message.into(), |state| state.failed += 1);
    }

    fn update(&self, message: String, bump: impl FnOnce(&mut ProgressState)) {
        let mut state = self.lock();
        bump(&mut state);
        if state.completed() > state.total {
            tracing::warn!(
                phase = %state.phase,
                completed = state.completed(),
                total = state.total,
                "完成数超过预告的任务总数"
            );
        }
        self.sink
            .on_progress(&ProgressEvent::from_state(&state, message));
    }

    pub fn snapshot(&self) -> ProgressState {
        self.lock().clone()
    }
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::silent()
    }
}
