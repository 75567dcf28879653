use bulksync_lib::cli::{Cli, Commands, GenerateArgs, RunArgs};
use bulksync_lib::core::{
    BulkSyncEngine, ConsoleReporter, LogReporter, Reporters, SummaryFileReporter,
};
use bulksync_lib::error::RunError;
use bulksync_lib::logging::{init_logging, RunLayout};
use bulksync_lib::mapping_gen::generate_mapping_file;
use bulksync_lib::MappingConfig;
use chrono::Local;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// 运行全部映射任务
async fn run(args: RunArgs, log_level: &str) -> ExitCode {
    let settings = args.settings();
    let started = Local::now();

    // 日志目录创建失败时只输出到控制台
    let layout = RunLayout::create(&settings.log_root, started);
    let _guard = init_logging(layout.as_ref().ok().map(|l| l.run_dir()), log_level);
    let layout = match layout {
        Ok(layout) => layout,
        Err(e) => {
            error!("无法创建日志目录 {}: {}", settings.log_root.display(), e);
            return ExitCode::FAILURE;
        }
    };

    info!("Sync started");
    info!("Validate mapping configuration...");

    let config = match MappingConfig::load(&args.mapping) {
        Ok(config) => config,
        Err(RunError::Validation(e)) => {
            for problem in &e.problems {
                error!("{}", problem);
            }
            info!("Sync finished due to missing attributes");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let engine = BulkSyncEngine::new(&settings);

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在取消任务...");
            cancel.cancel();
        }
    });

    let mut reporters = Reporters::new()
        .with(LogReporter)
        .with(ConsoleReporter::stdout());
    if settings.summary_file {
        reporters = reporters.with(SummaryFileReporter::new(layout.run_dir().join("summary.json")));
    }

    let summary = engine.run(config, layout, Arc::new(reporters)).await;

    if args.strict && summary.has_failures() {
        return ExitCode::from(2);
    }
    ExitCode::SUCCESS
}

fn generate(args: GenerateArgs, log_level: &str) -> ExitCode {
    let _guard = init_logging(None, log_level);

    match generate_mapping_file(&args.ids, args.template.as_deref(), &args.output) {
        Ok(count) => {
            info!("已生成 {} 个映射条目", count);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::GenerateMapping(args)) => generate(args, &cli.log_level),
        Some(Commands::Run(args)) => run(args, &cli.log_level).await,
        None => run(RunArgs::default(), &cli.log_level).await,
    }
}
