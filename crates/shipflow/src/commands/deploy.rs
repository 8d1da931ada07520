use crate::input::{self, InputArgs};
use crate::output;
use crate::{EXIT_CANCELLED, EXIT_PARTIAL};
use clap::Args;
use colored::Colorize;
use shipflow_provider::{CommandConfig, CommandProvider, RetryConfig};
use shipflow_runner::{Executor, ExecutorOptions, RollbackPolicy};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// ステップごとの最大試行回数（一時的なエラーのみ再試行）
    #[arg(long, env = "SHIP_MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: u32,

    /// バッチ内で同時に実行するサービス数の上限
    #[arg(long, env = "SHIP_PARALLEL", value_name = "N")]
    pub parallel: Option<usize>,

    /// 一部のサービスが失敗したときの扱い (roll-forward, roll-back)
    #[arg(long, env = "SHIP_ROLLBACK", default_value = "roll-forward")]
    pub rollback: RollbackPolicy,

    /// コンテナエンジン（build / tag / push）
    #[arg(long, env = "SHIP_ENGINE", default_value = "docker")]
    pub engine: String,

    /// デプロイCLI（deploy / rollback）
    #[arg(long, env = "SHIP_DEPLOYER", default_value = "gcloud")]
    pub deployer: String,

    /// デプロイ先リージョン
    #[arg(long, env = "SHIP_REGION", default_value = "us-central1")]
    pub region: String,

    /// デプロイ先のクラウドプロジェクト
    #[arg(long = "gcp-project", env = "SHIP_GCP_PROJECT")]
    pub gcp_project: Option<String>,

    /// ビルド対象プラットフォーム (例: linux/amd64)
    #[arg(long, env = "SHIP_PLATFORM")]
    pub platform: Option<String>,

    /// コマンドを実行せずに表示のみ
    #[arg(long)]
    pub dry_run: bool,

    /// 実行結果をJSONで出力
    #[arg(long)]
    pub json: bool,
}

pub async fn handle(
    input: &InputArgs,
    run: &RunArgs,
    cancel: CancellationToken,
) -> anyhow::Result<ExitCode> {
    let (loaded, services) = input::prepare(input)?;

    let provider = Arc::new(CommandProvider::new(CommandConfig {
        engine: run.engine.clone(),
        deployer: run.deployer.clone(),
        project_name: loaded.topology.project.clone(),
        region: run.region.clone(),
        cloud_project: run.gcp_project.clone(),
        platform: run.platform.clone(),
        dry_run: run.dry_run,
    }));

    let executor = Executor::new(
        provider.clone(),
        ExecutorOptions {
            retry: RetryConfig::default().with_max_attempts(run.max_attempts),
            max_parallel: run.parallel,
            rollback: run.rollback,
        },
    );

    if !run.json {
        input::print_source(&loaded);
        output::print_plan(&loaded.plan);
        if run.dry_run {
            println!("{}", "dry-run: コマンドは実行されません".yellow());
        }
        println!();
        println!("{}", "デプロイを開始します...".blue());
    }

    let report = executor.run(&loaded.plan, &services, cancel).await;

    if run.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        if run.dry_run {
            output::print_commands(&provider.issued_commands());
        }
        output::print_report(&report);
    }

    let code = if report.cancelled {
        EXIT_CANCELLED
    } else if report.is_success() {
        0
    } else {
        EXIT_PARTIAL
    };
    Ok(ExitCode::from(code))
}
