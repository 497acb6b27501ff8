//! Search command - embed a query and look up the closest index entries.

use super::{get_config, get_database};
use anyhow::{Context, Result};
use colored::Colorize;
use kbsync_core::VectorStore;
use kbsync_ollama::OllamaClient;
use std::collections::HashMap;
use tokio::runtime::Runtime;

pub fn run(query: &str, limit: usize) -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;

    if db.count_index_entries(None)? == 0 {
        anyhow::bail!("The index is empty. Run 'kbsync sync --all' first.");
    }

    let client = OllamaClient::from_config(&config.ollama).context("Failed to create Ollama client")?;
    let rt = Runtime::new().context("Failed to create async runtime")?;

    if !rt.block_on(client.is_available()) {
        anyhow::bail!(
            "Ollama is not running at {}. Start it with 'ollama serve'.",
            config.ollama.host
        );
    }

    println!("{} \"{}\"", "Searching for:".cyan().bold(), query);
    println!("{}", "─".repeat(70));

    let results = rt.block_on(async {
        let vector = client.embed_one(query).await.context("Failed to embed query")?;
        db.query(&vector, limit).await.context("Vector search failed")
    })?;

    if results.is_empty() {
        println!();
        println!("{}", "No similar content found.".dimmed());
        return Ok(());
    }

    let names: HashMap<String, String> = db
        .list_connectors(false)?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect();

    println!();
    for (entry, score) in results {
        let connector = names
            .get(&entry.key.connector_id)
            .map(String::as_str)
            .unwrap_or("?");
        println!(
            "{} {} {}",
            format!("{:.0}%", score * 100.0).green(),
            format!("{}:{}", connector, entry.path).white().bold(),
            format!("[{}]", entry.key).dimmed()
        );
        println!("  {}", truncate(&entry.text, 150).dimmed());
        println!();
    }

    Ok(())
}

/// Shorten text to at most `max` characters on one line.
fn truncate(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{}...", cut.trim_end())
    }
}
