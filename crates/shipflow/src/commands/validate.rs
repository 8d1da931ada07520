use crate::input::{self, InputArgs};
use crate::output;
use colored::Colorize;
use std::process::ExitCode;

pub fn handle(input: &InputArgs) -> anyhow::Result<ExitCode> {
    println!("{}", "設定を検証中...".blue());

    let (loaded, services) = input::prepare(input)?;
    input::print_source(&loaded);

    println!("{}", "✓ 設定は正常です！".green().bold());
    println!();
    println!("サマリー:");
    println!("  サービス: {}個", services.len());
    for service in &services {
        let deps = if service.depends_on.is_empty() {
            String::new()
        } else {
            format!(" ← {}", service.depends_on.join(", "))
        };
        println!("    - {} ({}){}", service.name.cyan(), service.image, deps);
    }
    println!();
    output::print_plan(&loaded.plan);

    Ok(ExitCode::SUCCESS)
}
