//! ターミナル出力

use colored::Colorize;
use shipflow_core::DeploymentPlan;
use shipflow_runner::{RunReport, ServiceStatus};

/// 実行計画を表示
pub fn print_plan(plan: &DeploymentPlan) {
    println!("{}", "実行計画:".bold());
    if plan.is_empty() {
        println!("  (サービスがありません)");
        return;
    }
    for (index, batch) in plan.batches().iter().enumerate() {
        let names: Vec<String> = batch.iter().map(|n| n.cyan().to_string()).collect();
        println!("  バッチ {}: {}", index + 1, names.join(", "));
    }
}

fn status_label(status: ServiceStatus) -> colored::ColoredString {
    match status {
        ServiceStatus::Deployed => "✓ deployed".green(),
        ServiceStatus::Failed => "✗ failed".red().bold(),
        ServiceStatus::Skipped => "- skipped".yellow(),
        ServiceStatus::Cancelled => "■ cancelled".yellow(),
    }
}

/// 実行結果のサマリーを表示
pub fn print_report(report: &RunReport) {
    println!();
    println!("{}", "結果:".bold());
    for service in &report.services {
        println!(
            "  {} {} ({})",
            status_label(service.status),
            service.name.cyan(),
            service.image.dimmed()
        );
        if let Some(reason) = &service.reason {
            println!("      {}", reason);
        }
        if service.status == ServiceStatus::Failed {
            if let Some(output) = &service.output {
                for line in output.lines().rev().take(10).collect::<Vec<_>>().into_iter().rev() {
                    println!("      {} {}", "│".dimmed(), line.dimmed());
                }
            }
        }
    }

    if !report.rollbacks.is_empty() {
        println!();
        println!("{}", "ロールバック:".bold());
        for rollback in &report.rollbacks {
            let label = if rollback.success {
                "✓".green()
            } else {
                "✗".red()
            };
            match &rollback.message {
                Some(message) => println!("  {} {} ({})", label, rollback.service.cyan(), message),
                None => println!("  {} {}", label, rollback.service.cyan()),
            }
        }
    }

    println!();
    let deployed = report.names_with(ServiceStatus::Deployed).len();
    let total = report.services.len();
    let elapsed = format!("{:.1}s", report.duration_ms as f64 / 1000.0);
    if report.is_success() {
        println!(
            "{} {}/{} サービスをデプロイしました ({})",
            "✓".green().bold(),
            deployed,
            total,
            elapsed
        );
    } else if report.cancelled {
        println!(
            "{} 中断されました: {}/{} サービスがデプロイ済み ({})",
            "■".yellow().bold(),
            deployed,
            total,
            elapsed
        );
    } else {
        let failed = report.names_with(ServiceStatus::Failed);
        let skipped = report.names_with(ServiceStatus::Skipped);
        println!(
            "{} 一部のサービスが失敗しました: {}/{} デプロイ済み ({})",
            "✗".red().bold(),
            deployed,
            total,
            elapsed
        );
        if !failed.is_empty() {
            println!("  failed:  {}", failed.join(", "));
        }
        if !skipped.is_empty() {
            println!("  skipped: {}", skipped.join(", "));
        }
    }
}

/// dry-run で発行されたコマンドを表示
pub fn print_commands(commands: &[String]) {
    println!();
    println!("{}", "発行されたコマンド (dry-run):".bold());
    for command in commands {
        println!("  $ {}", command);
    }
}
