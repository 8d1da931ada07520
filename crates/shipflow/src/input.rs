//! トポロジーと変数の読み込み（全コマンド共通）

use clap::Args;
use colored::Colorize;
use shipflow_core::{DeploymentPlan, ResolvedService, Topology, Variables};
use std::path::PathBuf;
use tracing::debug;

#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// トポロジーファイル（省略時は SHIP_TOPOLOGY、ship.local.kdl, ship.kdl, ship.yaml, ship.yml の順に探索）
    pub topology: Option<PathBuf>,

    /// 変数を読み込む .env ファイル（複数指定可、後の指定が優先）
    #[arg(long = "env-file", value_name = "FILE")]
    pub env_files: Vec<PathBuf>,

    /// 変数を上書き（KEY=VALUE、最も優先度が高い）
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,

    /// 参照の有無にかかわらず必須とする変数
    #[arg(long = "require", value_name = "VAR")]
    pub required: Vec<String>,

    /// 対象サービス（依存先も含む、複数指定可）
    #[arg(short = 'n', long = "service", value_name = "NAME")]
    pub services: Vec<String>,
}

/// 読み込み済みのトポロジーと実行計画
pub struct Loaded {
    pub path: PathBuf,
    pub topology: Topology,
    pub plan: DeploymentPlan,
}

/// トポロジーをロードし、対象サービスを絞り込み、実行計画を作成
///
/// 構文エラー・検証エラー・循環依存はここで検出されます。
pub fn load(input: &InputArgs) -> anyhow::Result<Loaded> {
    let path = match &input.topology {
        Some(path) => path.clone(),
        None => shipflow_config::find_topology_file()?,
    };

    let topology = shipflow_core::load_topology(&path)?;
    let topology = if input.services.is_empty() {
        topology
    } else {
        topology.select(&input.services)?
    };
    let plan = shipflow_core::plan(&topology)?;

    Ok(Loaded {
        path,
        topology,
        plan,
    })
}

/// 変数セットを組み立てる
///
/// 優先順位（低 → 高）: トポロジーの variables → .env ファイル → プロセス環境変数 → --set
pub fn variables(topology: &Topology, input: &InputArgs) -> anyhow::Result<Variables> {
    let mut vars = Variables::from_topology(topology);

    for env_file in &input.env_files {
        vars.extend(shipflow_config::load_env_file(env_file)?);
    }

    vars.add_process_env();

    for assignment in &input.overrides {
        vars.add_assignment(assignment)?;
    }

    debug!(count = vars.len(), "Variables assembled");
    Ok(vars)
}

/// ロードから変数解決までを実行
///
/// 必須変数の不足はプロバイダーを呼び出す前にここで検出されます。
pub fn prepare(input: &InputArgs) -> anyhow::Result<(Loaded, Vec<ResolvedService>)> {
    let loaded = load(input)?;
    let vars = variables(&loaded.topology, input)?;
    let services = shipflow_core::resolve_topology(&loaded.topology, &vars, &input.required)?;
    Ok((loaded, services))
}

/// 読み込んだトポロジーファイルを表示
pub fn print_source(loaded: &Loaded) {
    println!(
        "📄 {} ({})",
        loaded.path.display().to_string().cyan(),
        loaded.topology.project.bold()
    );
}
