//! 命令行参数

use crate::config::{RunSettings, ToolSettings, DEFAULT_WORKERS};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "bulksync")]
#[command(about = "Run many source-to-target sync jobs in parallel and total up what was transferred", long_about = None)]
#[command(version)]
pub struct Cli {
    /// 日志级别: error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every job in the mapping file
    Run(RunArgs),
    /// Generate a mapping file from a CSV list of job ids
    GenerateMapping(GenerateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// 映射文件路径
    #[arg(long, default_value = "./mapping.json")]
    pub mapping: PathBuf,

    /// 最大并发任务数
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// 单个任务时限（秒），不设置则不限
    #[arg(long)]
    pub timeout: Option<u64>,

    /// 日志根目录
    #[arg(long, default_value = "./logs")]
    pub log_root: PathBuf,

    /// 外部同步工具
    #[arg(long, default_value = "aws")]
    pub tool: String,

    /// 不写 summary.json
    #[arg(long)]
    pub no_summary: bool,

    /// 有任务失败时以状态码 2 退出
    #[arg(long)]
    pub strict: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            mapping: PathBuf::from("./mapping.json"),
            workers: DEFAULT_WORKERS,
            timeout: None,
            log_root: PathBuf::from("./logs"),
            tool: "aws".to_string(),
            no_summary: false,
            strict: false,
        }
    }
}

impl RunArgs {
    pub fn settings(&self) -> RunSettings {
        RunSettings {
            log_root: self.log_root.clone(),
            summary_file: !self.no_summary,
            tool: ToolSettings {
                program: self.tool.clone(),
                ..ToolSettings::default()
            },
            ..RunSettings::default()
        }
        .with_workers(self.workers)
        .with_timeout(self.timeout.map(Duration::from_secs))
    }
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// 任务 ID 列表（CSV，取第一列）
    #[arg(long, default_value = "./mapping/job_ids.csv")]
    pub ids: PathBuf,

    /// 输出的映射文件
    #[arg(long, default_value = "./mapping/mapping.json")]
    pub output: PathBuf,

    /// 自定义条目模板，使用 {{job_id}} 占位
    #[arg(long)]
    pub template: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_defaults_to_run() {
        let cli = Cli::try_parse_from(["bulksync"]).unwrap();
        assert!(cli.command.is_none());
        let settings = RunArgs::default().settings();
        assert_eq!(settings.workers, DEFAULT_WORKERS);
        assert_eq!(settings.tool.program, "aws");
        assert!(settings.job_timeout.is_none());
        assert!(settings.summary_file);
    }

    #[test]
    fn test_run_args() {
        let cli = Cli::try_parse_from([
            "bulksync",
            "run",
            "--mapping",
            "m.json",
            "--workers",
            "0",
            "--timeout",
            "90",
            "--tool",
            "/usr/local/bin/aws",
            "--no-summary",
        ])
        .unwrap();

        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run");
        };
        let settings = args.settings();
        assert_eq!(args.mapping, PathBuf::from("m.json"));
        assert_eq!(settings.workers, 1);
        assert_eq!(settings.job_timeout, Some(Duration::from_secs(90)));
        assert_eq!(settings.tool.program, "/usr/local/bin/aws");
        assert_eq!(settings.tool.base_args, vec!["s3", "sync"]);
        assert!(!settings.summary_file);
    }

    #[test]
    fn test_generate_args() {
        let cli = Cli::try_parse_from(["bulksync", "--log-level", "debug", "generate-mapping"]).unwrap();
        assert_eq!(cli.log_level, "debug");
        let Some(Commands::GenerateMapping(args)) = cli.command else {
            panic!("expected generate-mapping");
        };
        assert_eq!(args.ids, PathBuf::from("./mapping/job_ids.csv"));
        assert!(args.template.is_none());
    }
}
