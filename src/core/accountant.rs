//! 单个任务的传输计数和表格日志

use crate::core::parser::TransferRecord;
use crate::error::ParseError;
use crate::logging::JobLogContext;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// 按动作名统计的数量（按名称排序，输出稳定）
pub type ActionCounts = BTreeMap<String, u64>;

/// 表格日志分隔符
pub const TABULAR_DELIMITER: char = ';';

/// `;` 分隔的表格日志，列为 Action;Source;Target
pub struct TabularLog {
    writer: BufWriter<File>,
}

impl TabularLog {
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut log = Self {
            writer: BufWriter::new(File::create(path)?),
        };
        log.write_row(&["Action", "Source", "Target"])?;
        Ok(log)
    }

    /// 写入一行并立即刷新，进程中途被杀时已写入的行仍然保留
    pub fn write_row(&mut self, fields: &[&str]) -> io::Result<()> {
        let line = fields
            .iter()
            .map(|f| quote_field(f))
            .collect::<Vec<_>>()
            .join(&TABULAR_DELIMITER.to_string());
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\r\n")?;
        self.writer.flush()
    }
}

/// 含分隔符、引号或换行的字段加引号，内部引号加倍
fn quote_field(field: &str) -> String {
    let needs_quotes = field
        .chars()
        .any(|c| c == TABULAR_DELIMITER || c == '"' || c == '\n' || c == '\r');
    if needs_quotes {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// 任务计数结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobTally {
    pub action_counts: ActionCounts,
    pub parse_failures: usize,
}

/// 任务计数器
///
/// 逐条累计动作数量，并把每条记录追加到表格日志。
pub struct JobAccountant<'a> {
    ctx: &'a JobLogContext,
    tally: JobTally,
    tabular: Option<TabularLog>,
}

impl<'a> JobAccountant<'a> {
    pub fn new(ctx: &'a JobLogContext) -> Self {
        let path = ctx.tabular_path();
        let tabular = match TabularLog::create(&path) {
            Ok(log) => Some(log),
            Err(e) => {
                ctx.error(&format!("无法创建表格日志 {}: {}", path.display(), e));
                None
            }
        };

        Self {
            ctx,
            tally: JobTally::default(),
            tabular,
        }
    }

    /// 累计一条传输记录
    pub fn record(&mut self, record: &TransferRecord) {
        self.ctx.debug(&format!(
            "Action: {}, Source: {}, Target: {}",
            record.action, record.source_path, record.target_path
        ));

        *self
            .tally
            .action_counts
            .entry(record.action.clone())
            .or_insert(0) += 1;

        if let Some(log) = self.tabular.as_mut() {
            let row = [
                record.action.as_str(),
                record.source_path.as_str(),
                record.target_path.as_str(),
            ];
            if let Err(e) = log.write_row(&row) {
                self.ctx.error(&format!("写入表格日志失败，后续记录不再写入: {}", e));
                self.tabular = None;
            }
        }
    }

    /// 记录无法解析的行，不影响任务继续
    pub fn note_parse_failure(&mut self, error: &ParseError) {
        self.tally.parse_failures += 1;
        self.ctx.warn(&format!("忽略无法解析的行: {}", error));
    }

    /// 结束计数并输出统计
    pub fn finish(self) -> JobTally {
        if self.tally.action_counts.is_empty() {
            self.ctx.info("No files pending for processing");
        } else {
            self.ctx.info("Total files processed:");
            for (action, count) in &self.tally.action_counts {
                self.ctx.info(&format!("\t{} = {}", action, count));
            }
        }

        if self.tally.parse_failures > 0 {
            self.ctx
                .warn(&format!("共有 {} 行无法解析", self.tally.parse_failures));
        }

        self.tally
    }
}
