//! 报告输出
//!
//! 日志、控制台汇总表和 summary.json 都实现同一个 `Reporter` 接口，
//! 叠加在核心流程之上，不影响任务结果。

use crate::core::aggregator::{GrandTotal, ResultAggregator};
use crate::core::executor::JobResult;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{error, info, warn};

/// 报告接口
pub trait Reporter: Send + Sync {
    /// 单个任务完成（可能在工作任务中调用）
    fn job_finished(&self, _result: &JobResult) {}

    /// 全部任务完成
    fn run_finished(&self, summary: &RunSummary) -> Result<()>;
}

/// 一次运行的汇总
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub test_mode: bool,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub jobs: Vec<JobResult>,
    pub grand_total: GrandTotal,
}

impl RunSummary {
    pub fn new(
        started_at: DateTime<Local>,
        test_mode: bool,
        jobs: Vec<JobResult>,
        grand_total: GrandTotal,
    ) -> Self {
        let jobs_failed = jobs.iter().filter(|r| !r.succeeded).count();
        Self {
            started_at,
            finished_at: Local::now(),
            test_mode,
            jobs_succeeded: jobs.len() - jobs_failed,
            jobs_failed,
            jobs,
            grand_total,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.jobs_failed > 0
    }
}

/// 通过 tracing 输出
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn job_finished(&self, result: &JobResult) {
        if result.succeeded {
            info!(job = %result.id, "任务成功, 处理 {} 个文件", result.total_items());
        } else {
            warn!(
                job = %result.id,
                "任务失败 (已处理 {} 个文件): {}",
                result.total_items(),
                result.error_detail.as_deref().unwrap_or("未知错误")
            );
        }
    }

    fn run_finished(&self, summary: &RunSummary) -> Result<()> {
        ResultAggregator::report(&summary.grand_total);
        let elapsed = summary.finished_at - summary.started_at;
        info!(
            "Sync concluded in {:.3} seconds ({} 成功, {} 失败)",
            elapsed.num_milliseconds() as f64 / 1000.0,
            summary.jobs_succeeded,
            summary.jobs_failed
        );
        Ok(())
    }
}

/// 纯文本汇总表
pub struct ConsoleReporter<W: Write + Send> {
    out: Mutex<W>,
}

impl ConsoleReporter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> Reporter for ConsoleReporter<W> {
    fn run_finished(&self, summary: &RunSummary) -> Result<()> {
        let text = render_table(summary);
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow::anyhow!("控制台输出锁已损坏"))?;
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

fn format_counts(counts: &crate::core::accountant::ActionCounts) -> String {
    if counts.is_empty() {
        return "-".to_string();
    }
    counts
        .iter()
        .map(|(action, n)| format!("{}={}", action, n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// 每个任务一行（按 ID 排序），最后是合计
pub fn render_table(summary: &RunSummary) -> String {
    let mut jobs: Vec<&JobResult> = summary.jobs.iter().collect();
    jobs.sort_by(|a, b| a.id.cmp(&b.id));

    let id_width = jobs.iter().map(|r| r.id.len()).max().unwrap_or(0).max(2);

    let mut text = String::new();
    let _ = writeln!(text, "{:<w$}  {:<6}  {}", "ID", "STATUS", "COUNTS", w = id_width);
    for job in jobs {
        let status = if job.succeeded { "OK" } else { "FAILED" };
        let _ = write!(
            text,
            "{:<w$}  {:<6}  {}",
            job.id,
            status,
            format_counts(&job.action_counts),
            w = id_width
        );
        if let Some(detail) = &job.error_detail {
            let _ = write!(text, "  ({})", detail);
        }
        text.push('\n');
    }

    if summary.grand_total.is_empty() {
        let _ = writeln!(text, "Grand total: no files processed");
    } else {
        let _ = writeln!(
            text,
            "Grand total: {}",
            format_counts(&summary.grand_total.action_counts)
        );
    }
    text
}

/// 写出 summary.json
#[derive(Debug, Clone)]
pub struct SummaryFileReporter {
    path: PathBuf,
}

impl SummaryFileReporter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Reporter for SummaryFileReporter {
    fn run_finished(&self, summary: &RunSummary) -> Result<()> {
        let content = serde_json::to_string_pretty(summary)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("写入 {} 失败", self.path.display()))?;
        info!("运行汇总已写入 {}", self.path.display());
        Ok(())
    }
}

/// 组合多个报告器，单个报告器出错只记录日志
#[derive(Default)]
pub struct Reporters {
    inner: Vec<Box<dyn Reporter>>,
}

impl Reporters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reporter: impl Reporter + 'static) -> Self {
        self.inner.push(Box::new(reporter));
        self
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Reporter for Reporters {
    fn job_finished(&self, result: &JobResult) {
        for reporter in &self.inner {
            reporter.job_finished(result);
        }
    }

    fn run_finished(&self, summary: &RunSummary) -> Result<()> {
        for reporter in &self.inner {
            if let Err(e) = reporter.run_finished(summary) {
                error!("输出报告失败: {:#}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, counts: &[(&str, u64)], error: Option<&str>) -> JobResult {
        JobResult {
            id: id.to_string(),
            action_counts: counts.iter().map(|(a, n)| (a.to_string(), *n)).collect(),
            succeeded: error.is_none(),
            error_detail: error.map(|e| e.to_string()),
            parse_failures: 0,
            elapsed_ms: 5,
        }
    }

    fn summary(jobs: Vec<JobResult>) -> RunSummary {
        let total = ResultAggregator::aggregate(&jobs);
        RunSummary::new(Local::now(), false, jobs, total)
    }

    #[test]
    fn test_render_table() {
        let text = render_table(&summary(vec![
            result("beta", &[("upload", 2), ("delete", 1)], None),
            result("alpha", &[], Some("命令以非零状态退出: 1")),
        ]));

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ID     STATUS  COUNTS");
        assert_eq!(lines[1], "alpha  FAILED  -  (命令以非零状态退出: 1)");
        assert_eq!(lines[2], "beta   OK      delete=1, upload=2");
        assert_eq!(lines[3], "Grand total: delete=1, upload=2");
    }

    #[test]
    fn test_render_table_nothing_processed() {
        let text = render_table(&summary(vec![result("a", &[], None)]));
        assert!(text.ends_with("Grand total: no files processed\n"));
    }

    #[test]
    fn test_console_reporter_writes_table() {
        let reporter = ConsoleReporter::new(Vec::new());
        reporter
            .run_finished(&summary(vec![result("a", &[("copy", 1)], None)]))
            .unwrap();
        let out = String::from_utf8(reporter.into_inner()).unwrap();
        assert!(out.contains("Grand total: copy=1"));
    }

    #[test]
    fn test_summary_counts_failures() {
        let s = summary(vec![
            result("a", &[("upload", 1)], None),
            result("b", &[], Some("任务已取消")),
        ]);
        assert_eq!(s.jobs_succeeded, 1);
        assert_eq!(s.jobs_failed, 1);
        assert!(s.has_failures());
    }

    #[test]
    fn test_summary_file_reporter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");

        SummaryFileReporter::new(path.clone())
            .run_finished(&summary(vec![result("a", &[("upload", 3)], None)]))
            .unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["jobsSucceeded"], 1);
        assert_eq!(value["grandTotal"]["actionCounts"]["upload"], 3);
        assert_eq!(value["jobs"][0]["id"], "a");
        assert!(value["jobs"][0].get("errorDetail").is_none());
    }

    #[test]
    fn test_failing_reporter_does_not_stop_others() {
        struct Broken;
        impl Reporter for Broken {
            fn run_finished(&self, _summary: &RunSummary) -> Result<()> {
                anyhow::bail!("disk full")
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let reporters = Reporters::new()
            .with(Broken)
            .with(SummaryFileReporter::new(path.clone()));

        assert_eq!(reporters.len(), 2);
        assert!(reporters.run_finished(&summary(vec![])).is_ok());
        assert!(path.exists());
    }
}
