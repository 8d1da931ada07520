mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand};
use colored::Colorize;
use shipflow_core::FlowError;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

/// 一部のサービスが deployed にならなかった
pub const EXIT_PARTIAL: u8 = 1;
/// 設定・パース・検証・循環依存のエラー
pub const EXIT_CONFIG: u8 = 2;
/// 完了前に中断された（SIGINT）
pub const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "ship")]
#[command(about = "宣言したサービスを、依存順にビルドしてデプロイする。", long_about = None)]
struct Cli {
    /// ログを詳細に出力（-v: debug, -vv: trace）
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// トポロジーをビルドしてデプロイ
    Deploy {
        #[command(flatten)]
        input: input::InputArgs,
        #[command(flatten)]
        run: commands::deploy::RunArgs,
    },
    /// 実行計画（バッチ）を表示
    Plan {
        #[command(flatten)]
        input: input::InputArgs,
        /// 計画をJSONで出力
        #[arg(long)]
        json: bool,
    },
    /// トポロジーと変数を検証（プロバイダーは呼び出さない）
    Validate {
        #[command(flatten)]
        input: input::InputArgs,
    },
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ログはstderrに出力（stdoutはレポート用）
    let default_level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let result = match cli.command {
        Commands::Version => {
            println!("shipflow {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate { input } => commands::validate::handle(&input),
        Commands::Plan { input, json } => commands::plan::handle(&input, json),
        Commands::Deploy { input, run } => {
            let cancel = CancellationToken::new();
            spawn_interrupt_handler(cancel.clone());
            commands::deploy::handle(&input, &run, cancel).await
        }
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            ExitCode::from(exit_code_for(&err))
        }
    }
}

/// 1回目の Ctrl-C で中断を要求し、2回目で即座に終了する
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!(
            "{}",
            "中断しています... 実行中のステップの完了を待っています（もう一度 Ctrl-C で強制終了）"
                .yellow()
        );
        token.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "強制終了します".red());
            std::process::exit(i32::from(EXIT_CANCELLED));
        }
    });
}

fn report_error(err: &anyhow::Error) {
    eprintln!();
    eprintln!("{}", "✗ エラー".red().bold());
    match err.downcast_ref::<FlowError>() {
        Some(flow_error) => eprintln!("  {}", flow_error.user_message()),
        None => eprintln!("  {:#}", err),
    }
}

/// 設定系のエラーは 2、それ以外の想定外のエラーは 1
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<FlowError>().is_some()
        || err.downcast_ref::<shipflow_config::ConfigError>().is_some()
    {
        EXIT_CONFIG
    } else {
        EXIT_PARTIAL
    }
}
