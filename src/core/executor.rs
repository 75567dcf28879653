//! 同步执行器 - 调用外部同步工具并流式处理其输出

use crate::config::{MappingEntry, ToolSettings};
use crate::core::accountant::{ActionCounts, JobAccountant};
use crate::core::parser::TransferRecordParser;
use crate::error::ExecutionError;
use crate::logging::JobLogContext;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, PipeReader, Read, Write};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// 输出行通道容量
const LINE_CHANNEL_CAPACITY: usize = 1024;

/// 单个任务的执行结果，创建后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub id: String,
    pub action_counts: ActionCounts,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub parse_failures: usize,
    pub elapsed_ms: u64,
}

impl JobResult {
    /// 未执行或执行中途崩溃的任务
    pub fn failed(id: &str, error: &ExecutionError) -> Self {
        Self {
            id: id.to_string(),
            action_counts: ActionCounts::new(),
            succeeded: false,
            error_detail: Some(error.to_string()),
            parse_failures: 0,
            elapsed_ms: 0,
        }
    }

    /// 本任务处理的条目总数
    pub fn total_items(&self) -> u64 {
        self.action_counts.values().sum()
    }
}

/// 外部工具的一次调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl SyncCommand {
    /// 按固定顺序构建参数：源、目标、演练标志、exclude、include
    ///
    /// 外部工具按出现顺序处理过滤规则，后面的规则覆盖前面的，
    /// 因此各模式必须保持映射文件中的顺序。
    pub fn build(entry: &MappingEntry, tool: &ToolSettings) -> Self {
        let mut args = tool.base_args.clone();
        args.push(entry.source.clone());
        args.push(entry.target.clone());

        if entry.test_mode {
            args.push(tool.dry_run_flag.clone());
        }

        args.extend(
            entry
                .exclude_patterns
                .iter()
                .map(|p| format!("{}={}", tool.exclude_flag, p)),
        );
        args.extend(
            entry
                .include_patterns
                .iter()
                .map(|p| format!("{}={}", tool.include_flag, p)),
        );

        args.extend(tool.trailing_args.iter().cloned());

        Self {
            program: tool.program.clone(),
            args,
        }
    }

    /// 启动子进程，stdout 与 stderr 写入同一个管道
    ///
    /// 两个输出共用一个写端，读端看到的顺序就是子进程写入的顺序。
    fn spawn(&self) -> io::Result<(Child, PipeReader)> {
        let (reader, writer) = io::pipe()?;
        let stderr_writer = writer.try_clone()?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr_writer)
            .kill_on_drop(true);
        let child = command.spawn()?;
        // 父进程持有的写端必须关闭，否则读端收不到 EOF
        drop(command);

        Ok((child, reader))
    }
}

impl fmt::Display for SyncCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) || arg.contains('*') {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// 子进程 stdout 与 stderr 合并后的行流
///
/// 读端是阻塞的管道，由一个阻塞线程按行转发到通道；写端全部关闭后流结束。
pub struct OutputLines {
    stream: ReceiverStream<String>,
}

impl OutputLines {
    /// 接管合并输出管道的读端
    pub fn capture(reader: PipeReader) -> Self {
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        tokio::task::spawn_blocking(move || Self::pump(reader, tx));

        Self {
            stream: ReceiverStream::new(rx),
        }
    }

    fn pump<R: Read>(reader: R, tx: mpsc::Sender<String>) {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(|c: char| c == '\n' || c == '\r')
                        .to_string();
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("读取子进程输出失败: {}", e);
                    break;
                }
            }
        }
    }

    /// 下一行输出；可安全地用于 `select!`
    pub async fn next_line(&mut self) -> Option<String> {
        self.stream.next().await
    }
}

/// 原始输出记录，每行立即落盘
struct Transcript<'a> {
    ctx: &'a JobLogContext,
    writer: Option<BufWriter<File>>,
}

impl<'a> Transcript<'a> {
    fn create(ctx: &'a JobLogContext) -> Self {
        let path = ctx.transcript_path();
        let writer = match File::create(&path) {
            Ok(f) => Some(BufWriter::new(f)),
            Err(e) => {
                ctx.error(&format!("无法创建输出记录 {}: {}", path.display(), e));
                None
            }
        };
        Self { ctx, writer }
    }

    fn append(&mut self, line: &str) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let result = writeln!(writer, "{}", line).and_then(|_| writer.flush());
        if let Err(e) = result {
            self.ctx
                .error(&format!("写入输出记录失败，后续输出不再记录: {}", e));
            self.writer = None;
        }
    }
}

/// 执行单个映射任务
///
/// 调度器通过这个接口运行任务，测试中可替换为假实现。
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(
        &self,
        entry: &MappingEntry,
        ctx: &JobLogContext,
        cancel: &CancellationToken,
    ) -> JobResult;
}

/// 同步执行器
#[derive(Debug, Clone)]
pub struct SyncExecutor {
    tool: ToolSettings,
    timeout: Option<Duration>,
    parser: TransferRecordParser,
}

impl SyncExecutor {
    pub fn new(tool: ToolSettings) -> Self {
        Self {
            tool,
            timeout: None,
            parser: TransferRecordParser::new(),
        }
    }

    /// 设置单个任务的时限
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// 执行任务并返回结果；失败时保留失败前已累计的计数
    pub async fn execute(
        &self,
        entry: &MappingEntry,
        ctx: &JobLogContext,
        cancel: &CancellationToken,
    ) -> JobResult {
        let started = Instant::now();
        ctx.info("Subprocess started");

        let command = SyncCommand::build(entry, &self.tool);
        ctx.info(&format!("Subprocess command {}", command));

        let mut accountant = JobAccountant::new(ctx);
        let outcome = self.stream_output(&command, ctx, &mut accountant, cancel).await;

        ctx.info("Migration concluded");
        if let Err(e) = &outcome {
            ctx.error(&e.to_string());
        }

        let tally = accountant.finish();
        let elapsed = started.elapsed();
        ctx.info(&format!(
            "Subprocess concluded in {:.3} seconds",
            elapsed.as_secs_f64()
        ));
        ctx.info("Subprocess finished");

        JobResult {
            id: entry.id.clone(),
            action_counts: tally.action_counts,
            succeeded: outcome.is_ok(),
            error_detail: outcome.err().map(|e| e.to_string()),
            parse_failures: tally.parse_failures,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// 启动子进程，逐行转发输出，直到进程退出、超时或取消
    async fn stream_output(
        &self,
        command: &SyncCommand,
        ctx: &JobLogContext,
        accountant: &mut JobAccountant<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        let (mut child, output) = command.spawn().map_err(|e| ExecutionError::Spawn {
            program: command.program.clone(),
            reason: e.to_string(),
        })?;

        let deadline = self.timeout.map(|t| tokio::time::Instant::now() + t);
        let mut lines = OutputLines::capture(output);
        let mut transcript = Transcript::create(ctx);

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = wait_deadline(deadline) => {
                    kill_child(&mut child, ctx).await;
                    return Err(self.timeout_error());
                }
                _ = cancel.cancelled() => {
                    kill_child(&mut child, ctx).await;
                    return Err(ExecutionError::Cancelled);
                }
            };

            let Some(line) = line else {
                break;
            };

            transcript.append(&line);
            ctx.debug(&line);

            match self.parser.parse_line(&line) {
                Ok(Some(record)) => accountant.record(&record),
                Ok(None) => {}
                Err(e) => accountant.note_parse_failure(&e),
            }
        }

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| ExecutionError::Wait(e.to_string()))?,
            _ = wait_deadline(deadline) => {
                kill_child(&mut child, ctx).await;
                return Err(self.timeout_error());
            }
            _ = cancel.cancelled() => {
                kill_child(&mut child, ctx).await;
                return Err(ExecutionError::Cancelled);
            }
        };

        if status.success() {
            Ok(())
        } else {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "被信号终止".to_string());
            Err(ExecutionError::ExitStatus { code })
        }
    }

    fn timeout_error(&self) -> ExecutionError {
        ExecutionError::Timeout(self.timeout.unwrap_or_default())
    }
}

#[async_trait]
impl JobRunner for SyncExecutor {
    async fn run_job(
        &self,
        entry: &MappingEntry,
        ctx: &JobLogContext,
        cancel: &CancellationToken,
    ) -> JobResult {
        self.execute(entry, ctx, cancel).await
    }
}

/// 没有时限时永不返回
async fn wait_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

async fn kill_child(child: &mut Child, ctx: &JobLogContext) {
    if let Err(e) = child.kill().await {
        ctx.warn(&format!("终止子进程失败: {}", e));
    }
}
