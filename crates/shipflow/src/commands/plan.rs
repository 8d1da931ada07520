use crate::input::{self, InputArgs};
use crate::output;
use std::process::ExitCode;

/// 実行計画を表示（変数は解決しない）
pub fn handle(input: &InputArgs, json: bool) -> anyhow::Result<ExitCode> {
    let loaded = input::load(input)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&loaded.plan)?);
    } else {
        input::print_source(&loaded);
        output::print_plan(&loaded.plan);
    }

    Ok(ExitCode::SUCCESS)
}
