//! Initialize kbsync.

use super::get_paths;
use anyhow::{Context, Result};
use colored::Colorize;
use kbsync_config::Config;
use kbsync_db::Database;

pub fn run() -> Result<()> {
    let paths = get_paths()?;

    // Check if already initialized
    if paths.is_initialized() {
        println!("{} kbsync is already initialized.", "Note:".yellow().bold());
        println!("  Config: {}", paths.config_file.display());
        println!("  Database: {}", paths.database_file.display());
        return Ok(());
    }

    println!("{}", "Initializing kbsync...".cyan().bold());

    paths.ensure_dirs().context("Failed to create directories")?;
    println!("  {} Created directories", "✓".green());

    if !paths.config_file.exists() {
        Config::create_default_file(&paths.config_file).context("Failed to create config file")?;
        println!("  {} Created config: {}", "✓".green(), paths.config_file.display());
    }

    let _db = Database::open(&paths.database_file).context("Failed to initialize database")?;
    println!("  {} Created database: {}", "✓".green(), paths.database_file.display());

    println!();
    println!("{}", "kbsync initialized successfully!".green().bold());
    println!();
    println!("Next steps:");
    println!(
        "  1. Add a connector: {}",
        "kbsync connector add notes --provider local_folder --folder ~/Documents/notes".cyan()
    );
    println!("  2. Run a first sync: {}", "kbsync sync notes".cyan());
    println!("  3. Keep it in sync: {}", "kbsync serve".cyan());

    Ok(())
}
