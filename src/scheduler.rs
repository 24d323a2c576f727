//! 有界工作线程池
//!
//! 每次调用创建 `workers` 个作用域线程，通过容量为 0 的同步通道逐个派发任务：
//! 只有当某个工作线程空闲时才会交出下一个任务，因此取消后不会再有新任务开始。
//! 工作线程取到任务后会再检查一次取消标志，已取消则跳过该任务。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Mutex, PoisonError};
use std::thread;

use crate::cancel::CancellationToken;
use crate::error::JobError;
use crate::progress::ProgressAggregator;

/// 可被调度的任务
pub trait Job: Send {
    /// 用于进度消息和日志的简短描述
    fn label(&self) -> String;
}

/// 单个任务的结果，创建后不再修改
#[derive(Debug)]
pub struct JobResult<J, T> {
    pub job: J,
    pub outcome: Result<T, JobError>,
}

impl<J, T> JobResult<J, T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// 一次调度的汇总
#[derive(Debug)]
pub struct ScheduleOutcome<J, T> {
    /// 所有已执行任务的结果，顺序不确定
    pub results: Vec<JobResult<J, T>>,
    /// 因取消而未开始的任务数
    pub skipped: usize,
    pub cancelled: bool,
}

impl<J, T> ScheduleOutcome<J, T> {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// 失败的任务数，不含被取消的任务
    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(&r.outcome, Err(e) if !e.is_cancelled()))
            .count()
    }

    pub fn interrupted(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(&r.outcome, Err(e) if e.is_cancelled()))
            .count()
    }
}

/// 用至多 `workers` 个线程并发执行 `jobs`
///
/// 每个完成的任务向 `progress` 报告一次：成功记为 done，失败记为 failed，
/// 被取消的任务不计入。调用方负责在此之前调用 [`ProgressAggregator::reset`]。
pub fn run_jobs<J, T, F>(
    jobs: Vec<J>,
    workers: usize,
    token: &CancellationToken,
    progress: &ProgressAggregator,
    handler: F,
) -> ScheduleOutcome<J, T>
where
    J: Job,
    T: Send,
    F: Fn(&J) -> Result<T, JobError> + Sync,
{
    let total = jobs.len();
    let workers = workers.clamp(1, total.max(1));
    let results = Mutex::new(Vec::with_capacity(total));
    let skipped = AtomicUsize::new(0);
    let (work_tx, work_rx) = mpsc::sync_channel::<J>(0);
    let work_rx = Mutex::new(work_rx);

    thread::scope(|scope| {
        for _ in 0..workers {
            let work_rx = &work_rx;
            let results = &results;
            let skipped = &skipped;
            let handler = &handler;

            scope.spawn(move || {
                loop {
                    let job = {
                        let rx = work_rx.lock().unwrap_or_else(PoisonError::into_inner);
                        rx.recv()
                    };
                    let job = match job {
                        Ok(job) => job,
                        Err(_) => break,
                    };

                    if token.is_cancelled() {
                        skipped.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }

                    let label = job.label();
                    let outcome = handler(&job);
                    match &outcome {
                        Ok(_) => progress.advance(label),
                        Err(err) if err.is_cancelled() => {
                            tracing::debug!(job = %label, "任务已取消");
                        }
                        Err(err) => {
                            tracing::warn!(job = %label, kind = err.kind(), error = %err, "任务失败");
                            progress.fail(format!("{label}: {err}"));
                        }
                    }

                    results
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(JobResult { job, outcome });
                }
            });
        }

        let mut dispatched = 0;
        for job in jobs {
            if token.is_cancelled() || work_tx.send(job).is_err() {
                break;
            }
            dispatched += 1;
        }
        skipped.fetch_add(total - dispatched, Ordering::Relaxed);
        drop(work_tx);
    });

    ScheduleOutcome {
        results: results.into_inner().unwrap_or_else(PoisonError::into_inner),
        skipped: skipped.into_inner(),
        cancelled: token.is_cancelled(),
    }
}
