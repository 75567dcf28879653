//! 应用配置模块
//!
//! 映射文件在调度前一次性读取并校验，产出强类型的 `MappingConfig`。

use crate::error::{ConfigError, RunError, ValidationError};
use crate::logging::job_folder_name;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 默认并发任务数
pub const DEFAULT_WORKERS: usize = 10;

/// 单个映射条目（一个同步任务）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub id: String,
    pub source: String,
    pub target: String,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub test_mode: bool,
}

/// 校验后的映射配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingConfig {
    pub test_mode: bool,
    pub entries: Vec<MappingEntry>,
}

/// 映射文件中的条目（宽松格式，字段缺失留给校验报告）
#[derive(Debug, Deserialize)]
struct RawEntry {
    id: Option<String>,
    source: Option<String>,
    target: Option<String>,
    #[serde(default)]
    include: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
}

impl MappingConfig {
    /// 从映射文件加载
    pub fn load(path: &Path) -> Result<Self, RunError> {
        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            _ => ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        let document: Value = serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(Self::from_value(&document)?)
    }

    /// 校验映射文档，收集全部问题后再返回
    pub fn from_value(document: &Value) -> Result<Self, ValidationError> {
        let mut problems = Vec::new();

        let test_mode = match document.get("test") {
            None => {
                problems.push("缺少必填属性 \"test\"".to_string());
                false
            }
            Some(value) => parse_test_flag(value).unwrap_or_else(|| {
                problems.push(format!("属性 \"test\" 不是布尔值: {}", value));
                false
            }),
        };

        let items = match document.get("mapping") {
            None => {
                problems.push("缺少必填属性 \"mapping\"".to_string());
                return Err(ValidationError::new(problems));
            }
            Some(Value::Array(items)) => items,
            Some(_) => {
                problems.push("属性 \"mapping\" 必须是数组".to_string());
                return Err(ValidationError::new(problems));
            }
        };

        let mut entries = Vec::with_capacity(items.len());
        let mut seen = HashSet::new();

        for (idx, item) in items.iter().enumerate() {
            let raw: RawEntry = match serde_json::from_value(item.clone()) {
                Ok(raw) => raw,
                Err(e) => {
                    problems.push(format!("第 {} 项格式错误: {}", idx, e));
                    continue;
                }
            };

            let id = required(raw.id, "id", idx, &mut problems);
            let source = required(raw.source, "source", idx, &mut problems);
            let target = required(raw.target, "target", idx, &mut problems);

            let (Some(id), Some(source), Some(target)) = (id, source, target) else {
                continue;
            };

            // 每个任务独占一个日志目录，按目录名判重
            let folder = job_folder_name(&id);
            if folder == "." || folder == ".." {
                problems.push(format!("第 {} 项的 \"id\" 不能用作目录名: {}", idx, id));
                continue;
            }
            if !seen.insert(folder) {
                problems.push(format!("第 {} 项的 \"id\" 重复: {}", idx, id));
                continue;
            }

            entries.push(MappingEntry {
                id,
                source,
                target,
                include_patterns: raw.include,
                exclude_patterns: raw.exclude,
                test_mode,
            });
        }

        if !problems.is_empty() {
            return Err(ValidationError::new(problems));
        }

        Ok(Self { test_mode, entries })
    }
}

/// `test` 接受布尔值，也接受 "true"/"false" 字符串
fn parse_test_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn required(
    value: Option<String>,
    name: &str,
    idx: usize,
    problems: &mut Vec<String>,
) -> Option<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Some(v),
        Some(_) => {
            problems.push(format!("第 {} 项的属性 \"{}\" 为空", idx, name));
            None
        }
        None => {
            problems.push(format!("第 {} 项缺少必填属性 \"{}\"", idx, name));
            None
        }
    }
}

/// 外部同步工具的调用方式
#[derive(Debug, Clone)]
pub struct ToolSettings {
    /// 可执行文件
    pub program: String,
    /// 位于源/目标之前的固定参数
    pub base_args: Vec<String>,
    /// 追加在最后的固定参数
    pub trailing_args: Vec<String>,
    pub dry_run_flag: String,
    pub exclude_flag: String,
    pub include_flag: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            program: "aws".to_string(),
            base_args: vec!["s3".to_string(), "sync".to_string()],
            trailing_args: vec!["--no-progress".to_string()],
            dry_run_flag: "--dryrun".to_string(),
            exclude_flag: "--exclude".to_string(),
            include_flag: "--include".to_string(),
        }
    }
}

/// 运行设置
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// 最大并发任务数
    pub workers: usize,
    /// 单个任务的时限，None 表示不限
    pub job_timeout: Option<Duration>,
    /// 日志根目录
    pub log_root: PathBuf,
    /// 是否写出 summary.json
    pub summary_file: bool,
    pub tool: ToolSettings,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            job_timeout: None,
            log_root: PathBuf::from("./logs"),
            summary_file: true,
            tool: ToolSettings::default(),
        }
    }
}

impl RunSettings {
    /// 设置并发数（至少为 1）
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }
}
