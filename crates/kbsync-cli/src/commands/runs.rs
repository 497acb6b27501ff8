//! Runs command - print the append-only sync run log.

use super::sync::print_run;
use super::{find_connector, get_config, get_database};
use anyhow::Result;
use colored::Colorize;
use std::collections::HashMap;

pub fn run(connector: Option<String>, limit: i64) -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;

    let filter = match connector {
        Some(ref id) => Some(find_connector(&db, id)?),
        None => None,
    };
    let runs = db.list_runs(filter.as_ref().map(|c| c.id.as_str()), limit)?;

    if runs.is_empty() {
        println!("{}", "No sync runs recorded yet.".dimmed());
        return Ok(());
    }

    let names: HashMap<String, String> = db
        .list_connectors(false)?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect();

    println!("{}", "Sync Runs".cyan().bold());
    println!("{}", "─".repeat(70));

    for run in &runs {
        let name = names
            .get(&run.connector_id)
            .map(String::as_str)
            .unwrap_or("(removed)");
        println!(
            "{} {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            run.id[..8].dimmed()
        );
        print_run(name, run);
    }

    Ok(())
}
