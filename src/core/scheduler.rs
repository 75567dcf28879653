//! 任务调度器 - 固定大小的并发池
//!
//! 每个映射条目对应一个任务，最多同时运行 `workers` 个，其余排队等待。
//! 单个任务失败（包括崩溃）只影响它自己的结果，每个条目恰好产出一个结果。

use crate::config::MappingEntry;
use crate::core::executor::{JobResult, JobRunner};
use crate::core::report::Reporter;
use crate::error::ExecutionError;
use crate::logging::RunLayout;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 任务调度器
pub struct JobScheduler {
    runner: Arc<dyn JobRunner>,
    workers: usize,
    layout: RunLayout,
    cancel: CancellationToken,
    reporter: Option<Arc<dyn Reporter>>,
}

impl JobScheduler {
    pub fn new(runner: Arc<dyn JobRunner>, workers: usize, layout: RunLayout) -> Self {
        Self {
            runner,
            workers: workers.max(1),
            layout,
            cancel: CancellationToken::new(),
            reporter: None,
        }
    }

    /// 使用外部的取消信号
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 每个任务完成时通知报告器
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// 取消尚未完成的任务
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 运行全部任务，返回每个条目的结果（顺序与完成情况无关，按输入顺序排列）
    pub async fn run_all(&self, entries: Vec<MappingEntry>) -> Vec<JobResult> {
        info!("开始调度 {} 个任务，并发数 {}", entries.len(), self.workers);

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::with_capacity(entries.len());

        for entry in entries {
            let id = entry.id.clone();
            let semaphore = semaphore.clone();
            let runner = self.runner.clone();
            let layout = self.layout.clone();
            let cancel = self.cancel.clone();
            let reporter = self.reporter.clone();

            let handle = tokio::spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    _ = cancel.cancelled() => None,
                };

                let result = match permit {
                    Some(_permit) if !cancel.is_cancelled() => {
                        debug!("任务开始: {}", entry.id);
                        let ctx = layout.job_context(&entry.id);
                        runner.run_job(&entry, &ctx, &cancel).await
                    }
                    _ => {
                        warn!("任务未启动即被取消: {}", entry.id);
                        JobResult::failed(&entry.id, &ExecutionError::Cancelled)
                    }
                };

                if let Some(reporter) = &reporter {
                    reporter.job_finished(&result);
                }
                result
            });

            handles.push((id, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!("任务 {} 的工作任务异常退出: {}", id, e);
                    let result = JobResult::failed(&id, &ExecutionError::Panicked(e.to_string()));
                    if let Some(reporter) = &self.reporter {
                        reporter.job_finished(&result);
                    }
                    results.push(result);
                }
            }
        }

        let failed = results.iter().filter(|r| !r.succeeded).count();
        info!(
            "调度完成: {} 个任务, 成功 {}, 失败 {}",
            results.len(),
            results.len() - failed,
            failed
        );

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::accountant::ActionCounts;
    use crate::logging::JobLogContext;
    use async_trait::async_trait;
    use chrono::Local;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn entries(n: usize) -> Vec<MappingEntry> {
        (0..n)
            .map(|i| MappingEntry {
                id: format!("job-{}", i),
                source: format!("/src/{}", i),
                target: format!("s3://bucket/{}", i),
                include_patterns: vec![],
                exclude_patterns: vec![],
                test_mode: true,
            })
            .collect()
    }

    fn layout(dir: &tempfile::TempDir) -> RunLayout {
        RunLayout::create(dir.path(), Local::now()).unwrap()
    }

    fn success(id: &str, uploads: u64) -> JobResult {
        let mut counts = ActionCounts::new();
        counts.insert("upload".to_string(), uploads);
        JobResult {
            id: id.to_string(),
            action_counts: counts,
            succeeded: true,
            error_detail: None,
            parse_failures: 0,
            elapsed_ms: 0,
        }
    }

    /// 记录最大并发数的假执行器
    #[derive(Default)]
    struct CountingRunner {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl JobRunner for CountingRunner {
        async fn run_job(
            &self,
            entry: &MappingEntry,
            _ctx: &JobLogContext,
            _cancel: &CancellationToken,
        ) -> JobResult {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            success(&entry.id, 1)
        }
    }

    /// 偶数任务失败，job-3 直接崩溃
    struct FlakyRunner;

    #[async_trait]
    impl JobRunner for FlakyRunner {
        async fn run_job(
            &self,
            entry: &MappingEntry,
            _ctx: &JobLogContext,
            _cancel: &CancellationToken,
        ) -> JobResult {
            if entry.id == "job-3" {
                panic!("worker crashed");
            }
            let n: u64 = entry.id.trim_start_matches("job-").parse().unwrap();
            if n % 2 == 0 {
                let mut result = success(&entry.id, 1);
                result.succeeded = false;
                result.error_detail = Some("命令以非零状态退出: 1".to_string());
                result
            } else {
                success(&entry.id, n)
            }
        }
    }

    /// 一直等到被取消
    struct BlockingRunner;

    #[async_trait]
    impl JobRunner for BlockingRunner {
        async fn run_job(
            &self,
            entry: &MappingEntry,
            _ctx: &JobLogContext,
            cancel: &CancellationToken,
        ) -> JobResult {
            cancel.cancelled().await;
            JobResult::failed(&entry.id, &ExecutionError::Cancelled)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_never_exceeds_worker_limit() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(CountingRunner::default());
        let scheduler = JobScheduler::new(runner.clone(), 3, layout(&dir));

        let results = scheduler.run_all(entries(10)).await;

        assert_eq!(results.len(), 10);
        assert_eq!(runner.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_one_result_per_entry_with_failures() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = JobScheduler::new(Arc::new(FlakyRunner), 2, layout(&dir));

        let results = scheduler.run_all(entries(6)).await;

        assert_eq!(results.len(), 6);
        let ids: HashSet<_> = results.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids.len(), 6);

        let crashed = results.iter().find(|r| r.id == "job-3").unwrap();
        assert!(!crashed.succeeded);
        assert!(crashed.error_detail.as_ref().unwrap().contains("异常退出"));

        let ok: Vec<_> = results.iter().filter(|r| r.succeeded).map(|r| r.id.as_str()).collect();
        assert_eq!(ok, vec!["job-1", "job-5"]);
    }

    #[tokio::test]
    async fn test_cancel_fails_running_and_queued_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(JobScheduler::new(Arc::new(BlockingRunner), 2, layout(&dir)));

        let cancel_after = scheduler.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_after.cancel();
        });

        let results = scheduler.run_all(entries(5)).await;

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| !r.succeeded));
        assert!(results
            .iter()
            .all(|r| r.error_detail.as_deref() == Some("任务已取消")));
    }
}
