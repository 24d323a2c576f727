use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 协作式取消标志
///
/// 一旦设置就不会再被清除。克隆出的句柄共享同一个标志，
/// 通过 [`CancellationToken::child`] 派生的子标志会同时观察父标志。
///
/// 取消只在检查点生效（任务派发前、等待外部进程的轮询循环中），
/// 无法打断已经在进行中的阻塞系统调用。
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    parent: Option<Box<CancellationToken>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// 派生一个子标志：取消父标志会让子标志也处于取消状态，反之不会
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(self.is_cancelled())),
            parent: Some(Box::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|parent| parent.is_cancelled())
    }
}
