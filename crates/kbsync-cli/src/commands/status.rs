//! Status command - show connectors, index and run statistics.

use super::{format_size, get_config, get_database};
use anyhow::Result;
use colored::Colorize;
use kbsync_core::RunStatus;

pub fn run() -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;
    let stats = db.get_stats()?;

    println!("{}", "kbsync Status".cyan().bold());
    println!("{}", "─".repeat(50));

    println!();
    println!("{}", "Connectors".white().bold());
    println!(
        "  Configured: {} ({} enabled)",
        stats.connectors,
        stats.enabled_connectors.to_string().green()
    );

    println!();
    println!("{}", "Index".white().bold());
    println!("  Tracked files: {}", stats.tracked_files);
    println!("  Processed files: {}", stats.processed_files);
    println!("  Index entries: {}", stats.index_entries.to_string().green());
    println!("  Embedding model: {}", config.ollama.embedding_model);

    println!();
    println!("{}", "Sync Runs".white().bold());
    println!("  Total: {}", stats.runs);
    if stats.failed_runs > 0 {
        println!("  Failed: {}", stats.failed_runs.to_string().red());
    }

    let connectors = db.list_connectors(false)?;
    if !connectors.is_empty() {
        println!();
        println!("{}", "Latest Runs".white().bold());
        for connector in &connectors {
            match db.list_runs(Some(&connector.id), 1)?.first() {
                Some(run) => {
                    let marker = match run.status {
                        RunStatus::Success => "●".green(),
                        RunStatus::PartialSuccess => "◐".yellow(),
                        RunStatus::Failed => "✗".red(),
                    };
                    println!(
                        "  {} {} {} at {} ({} errors)",
                        marker,
                        connector.name,
                        run.status,
                        run.completed_at.format("%Y-%m-%d %H:%M"),
                        run.errors.len()
                    );
                }
                None => println!("  {} {} never synced", "○".dimmed(), connector.name),
            }
        }
    }

    println!();
    println!("{}", "Storage".white().bold());
    println!("  Database size: {}", format_size(stats.database_size_bytes));

    Ok(())
}
