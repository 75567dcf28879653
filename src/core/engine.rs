//! 批量同步引擎 - 调度、汇总、报告

use crate::config::{MappingConfig, RunSettings};
use crate::core::aggregator::ResultAggregator;
use crate::core::executor::{JobRunner, SyncExecutor};
use crate::core::report::{Reporter, RunSummary};
use crate::core::scheduler::JobScheduler;
use crate::logging::RunLayout;
use chrono::Local;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 批量同步引擎
pub struct BulkSyncEngine {
    runner: Arc<dyn JobRunner>,
    workers: usize,
    cancel: CancellationToken,
}

impl BulkSyncEngine {
    /// 使用外部同步工具执行任务
    pub fn new(settings: &RunSettings) -> Self {
        let executor = SyncExecutor::new(settings.tool.clone()).with_timeout(settings.job_timeout);
        Self::with_runner(Arc::new(executor), settings.workers)
    }

    pub fn with_runner(runner: Arc<dyn JobRunner>, workers: usize) -> Self {
        Self {
            runner,
            workers,
            cancel: CancellationToken::new(),
        }
    }

    /// 取消信号，触发后正在运行的任务终止子进程，排队的任务不再启动
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 运行全部任务
    ///
    /// 所有任务结束后才汇总，汇总和报告失败都不会改变任务结果。
    pub async fn run(
        &self,
        config: MappingConfig,
        layout: RunLayout,
        reporter: Arc<dyn Reporter>,
    ) -> RunSummary {
        let started_at = Local::now();
        info!(
            "Sync started: {} 个任务{}",
            config.entries.len(),
            if config.test_mode { " (演练模式)" } else { "" }
        );

        let scheduler = JobScheduler::new(self.runner.clone(), self.workers, layout)
            .with_cancel(self.cancel.clone())
            .with_reporter(reporter.clone());

        let results = scheduler.run_all(config.entries).await;
        let grand_total = ResultAggregator::aggregate(&results);
        let summary = RunSummary::new(started_at, config.test_mode, results, grand_total);

        if let Err(e) = reporter.run_finished(&summary) {
            error!("输出报告失败: {:#}", e);
        }

        info!("Sync finished");
        summary
    }
}
