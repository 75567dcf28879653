//! 日志模块 - 进程日志初始化、日志目录布局和每个任务的日志上下文

use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 运行日志文件名（运行目录和任务目录共用）
pub const LOG_FILE_NAME: &str = "logfile.log";
/// 原始输出记录文件名
pub const TRANSCRIPT_FILE_NAME: &str = "files_processed.txt";
/// 表格日志文件名
pub const TABULAR_FILE_NAME: &str = "files_processed.csv";

/// 将配置的日志级别转换为 tracing Level
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}

/// 初始化日志系统
///
/// 控制台始终输出；给出运行目录时同时写入 `logfile.log`。
/// 返回的 guard 必须在进程结束前保持存活，否则文件日志可能丢失。
pub fn init_logging(run_dir: Option<&Path>, level: &str) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(parse_level(level).into())
        .from_env_lossy();

    let (file_layer, guard) = match run_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (file_writer, guard) = tracing_appender::non_blocking(appender);

            let layer = tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);

    guard
}

/// 任务目录名
///
/// 任务 ID 中的路径分隔符会逃出运行目录，统一替换为 `_`。
pub fn job_folder_name(job_id: &str) -> String {
    job_id
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

/// 一次运行的日志目录
///
/// `<log_root>/<YYYY-mm-dd_HH-MM-SS>/`，每个任务在其下有自己的子目录。
#[derive(Debug, Clone)]
pub struct RunLayout {
    run_dir: PathBuf,
}

impl RunLayout {
    pub fn create(log_root: &Path, started: DateTime<Local>) -> io::Result<Self> {
        let run_dir = log_root.join(started.format("%Y-%m-%d_%H-%M-%S").to_string());
        fs::create_dir_all(&run_dir)?;
        Ok(Self { run_dir })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// 任务目录路径（不创建）
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.run_dir.join(job_folder_name(job_id))
    }

    /// 为任务创建日志上下文
    pub fn job_context(&self, job_id: &str) -> JobLogContext {
        JobLogContext::new(job_id, self.job_dir(job_id))
    }
}

/// 单个任务的日志上下文
///
/// 由调用方创建后传入执行器和计数器。每条消息同时写入任务自己的
/// `logfile.log` 和 tracing（带 `job` 字段）；DEBUG 只进 tracing。
pub struct JobLogContext {
    job_id: String,
    dir: PathBuf,
    file: Mutex<Option<BufWriter<File>>>,
}

impl JobLogContext {
    /// 创建任务目录和日志文件，失败时只记录警告，日志继续输出到 tracing
    pub fn new(job_id: &str, dir: PathBuf) -> Self {
        let file = match Self::open_log(&dir) {
            Ok(f) => Some(f),
            Err(e) => {
                tracing::warn!(job = %job_id, "无法创建任务日志文件 {}: {}", dir.display(), e);
                None
            }
        };

        Self {
            job_id: job_id.to_string(),
            dir,
            file: Mutex::new(file),
        }
    }

    fn open_log(dir: &Path) -> io::Result<BufWriter<File>> {
        fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LOG_FILE_NAME))?;
        Ok(BufWriter::new(file))
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE_NAME)
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.dir.join(TRANSCRIPT_FILE_NAME)
    }

    pub fn tabular_path(&self) -> PathBuf {
        self.dir.join(TABULAR_FILE_NAME)
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(job = %self.job_id, "{}", message);
    }

    pub fn info(&self, message: &str) {
        tracing::info!(job = %self.job_id, "{}", message);
        self.write_file("INFO", message);
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(job = %self.job_id, "{}", message);
        self.write_file("WARNING", message);
    }

    pub fn error(&self, message: &str) {
        tracing::error!(job = %self.job_id, "{}", message);
        self.write_file("ERROR", message);
    }

    fn write_file(&self, level: &str, message: &str) {
        let Ok(mut guard) = self.file.lock() else {
            return;
        };
        let Some(writer) = guard.as_mut() else {
            return;
        };

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S,%3f");
        let result = writeln!(writer, "{} {:>8} {}", timestamp, level, message)
            .and_then(|_| writer.flush());

        if let Err(e) = result {
            // 写失败后停用文件输出，避免每条消息重复报错
            tracing::warn!(job = %self.job_id, "写入任务日志失败，后续只输出到控制台: {}", e);
            *guard = None;
        }
    }
}

impl std::fmt::Debug for JobLogContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLogContext")
            .field("job_id", &self.job_id)
            .field("dir", &self.dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), tracing::Level::DEBUG);
        assert_eq!(parse_level("warn"), tracing::Level::WARN);
        assert_eq!(parse_level("bogus"), tracing::Level::INFO);
    }

    #[test]
    fn test_run_layout_folder_names() {
        let root = tempfile::tempdir().unwrap();
        let started = Local.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        let layout = RunLayout::create(root.path(), started).unwrap();

        assert_eq!(layout.run_dir(), root.path().join("2024-03-05_07-08-09"));
        assert!(layout.run_dir().is_dir());
        assert_eq!(
            layout.job_dir("a/b"),
            root.path().join("2024-03-05_07-08-09").join("a_b")
        );
    }

    #[test]
    fn test_init_logging_with_and_without_run_dir() {
        let root = tempfile::tempdir().unwrap();
        let guard = init_logging(Some(root.path()), "debug");
        assert!(guard.is_some());
        assert!(init_logging(None, "info").is_none());
    }

    #[test]
    fn test_job_folder_name_replaces_separators() {
        assert_eq!(job_folder_name("a/b\\c"), "a_b_c");
        assert_eq!(job_folder_name("job-1"), "job-1");
    }

    #[test]
    fn test_job_context_writes_info_but_not_debug() {
        let root = tempfile::tempdir().unwrap();
        let ctx = JobLogContext::new("job-1", root.path().join("job-1"));

        ctx.info("Subprocess started");
        ctx.debug("noisy detail");
        ctx.error("boom");

        let content = fs::read_to_string(ctx.log_path()).unwrap();
        assert!(content.contains("    INFO Subprocess started"));
        assert!(content.contains("   ERROR boom"));
        assert!(!content.contains("noisy detail"));
    }
}
