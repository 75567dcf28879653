//! 错误类型
//!
//! 致命错误（配置、校验）在调度前终止运行；
//! 单个任务的错误（执行、解析、日志写入）只影响该任务自己的结果。

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// 运行前的致命错误
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// 映射文件读取错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 映射文件不存在
    #[error("映射文件不存在: {}", .0.display())]
    NotFound(PathBuf),

    /// 读取映射文件失败
    #[error("读取映射文件 {} 失败: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON 解析失败
    #[error("解析映射文件 {} 失败: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 映射内容校验错误，收集所有问题后一起报告
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("映射配置无效: {}", .problems.join("; "))]
pub struct ValidationError {
    pub problems: Vec<String>,
}

impl ValidationError {
    pub fn new(problems: Vec<String>) -> Self {
        Self { problems }
    }
}

/// 外部同步工具执行错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// 无法启动进程
    #[error("无法启动 {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// 进程以非零状态退出
    #[error("命令以非零状态退出: {code}")]
    ExitStatus { code: String },

    /// 超过任务时限，进程已被终止
    #[error("任务超时 ({:?})，进程已终止", .0)]
    Timeout(Duration),

    /// 运行被取消
    #[error("任务已取消")]
    Cancelled,

    /// 等待进程退出失败
    #[error("等待进程退出失败: {0}")]
    Wait(String),

    /// 工作任务异常退出
    #[error("工作任务异常退出: {0}")]
    Panicked(String),
}

/// 单行输出解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("缺少动作分隔符: {0}")]
    MissingActionDelimiter(String),

    #[error("缺少路径分隔符: {0}")]
    MissingPathSeparator(String),
}
