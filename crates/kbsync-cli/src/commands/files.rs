//! Files command - list a connector's tracked files.

use super::{find_connector, get_config, get_database};
use anyhow::Result;
use colored::Colorize;

pub fn run(id_or_name: &str) -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;
    let connector = find_connector(&db, id_or_name)?;

    let states = db.list_file_states(&connector.id)?;

    println!("{} {}", "Tracked files of".cyan().bold(), connector.name.cyan().bold());
    println!("{}", "─".repeat(70));

    if states.is_empty() {
        println!("{}", "No files synced yet.".dimmed());
        return Ok(());
    }

    for state in &states {
        let marker = if state.processed { "●".green() } else { "○".yellow() };
        let modified = state
            .signature
            .modified_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} {}  {} chunks, modified {}",
            marker,
            state.path,
            state.index_keys.len(),
            modified.dimmed()
        );
    }
    println!();
    println!("{} files", states.len());

    Ok(())
}
