//! Connector management commands.

use super::{find_connector, get_config, get_database};
use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use kbsync_core::{Connector, FileScope, ProviderKind};

/// Arguments of `connector add`.
pub struct NewConnector {
    pub name: String,
    pub provider: String,
    pub folders: Vec<String>,
    pub extensions: Vec<String>,
    pub max_size_mb: Option<u64>,
    pub credential: Option<String>,
    pub interval: Option<u32>,
}

pub fn add(args: NewConnector) -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;

    let provider = ProviderKind::from_str(&args.provider).with_context(|| {
        format!(
            "Unknown provider '{}' (expected local_folder, google_drive or onedrive)",
            args.provider
        )
    })?;

    if db.get_connector_by_name(&args.name).is_ok() {
        anyhow::bail!("A connector named '{}' already exists", args.name);
    }

    if provider == ProviderKind::LocalFolder {
        for folder in &args.folders {
            let expanded = shellexpand::tilde(folder);
            if !std::path::Path::new(expanded.as_ref()).is_dir() {
                anyhow::bail!("Directory does not exist: {}", folder);
            }
        }
    } else if args.credential.is_none() {
        println!(
            "{} {} connectors need a credential; syncs will fail until one is set.",
            "Warning:".yellow().bold(),
            provider
        );
    }

    let mut scope = FileScope::new(args.folders).with_extensions(args.extensions);
    if let Some(max) = args.max_size_mb {
        scope = scope.with_max_size_mb(max);
    }
    let mut connector = Connector::new(&args.name, provider, scope)
        .with_interval_minutes(args.interval.unwrap_or(config.sync.default_interval_minutes));
    if let Some(credential) = args.credential {
        connector = connector.with_credential(credential);
    }

    db.create_connector(&connector).context("Failed to create connector")?;

    println!(
        "{} Added connector {} ({})",
        "✓".green(),
        connector.name.cyan(),
        &connector.id[..8]
    );
    println!("  Run {} to index it now.", format!("kbsync sync {}", connector.name).cyan());

    Ok(())
}

pub fn list() -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;
    let connectors = db.list_connectors(false)?;

    if connectors.is_empty() {
        println!("{}", "No connectors configured.".dimmed());
        println!("Add one with: kbsync connector add <name> --provider <kind> --folder <folder>");
        return Ok(());
    }

    println!("{}", "Connectors".cyan().bold());
    println!("{}", "─".repeat(70));

    for connector in connectors {
        let state = if connector.enabled {
            "●".green()
        } else {
            "○".dimmed()
        };
        let last_sync = connector
            .last_sync
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {} {} {} [{}] every {}m, last sync {}",
            state,
            connector.id[..8].dimmed(),
            connector.name.white().bold(),
            connector.provider,
            connector.sync_interval_minutes,
            last_sync
        );
    }

    Ok(())
}

pub fn show(id_or_name: &str) -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;
    let connector = find_connector(&db, id_or_name)?;

    let files = db.list_file_states(&connector.id)?;
    let entries = db.count_index_entries(Some(&connector.id))?;

    println!("{}", connector.name.cyan().bold());
    println!("{}", "─".repeat(50));
    println!("  ID: {}", connector.id);
    println!("  Provider: {}", connector.provider);
    println!(
        "  Enabled: {}",
        if connector.enabled { "yes".green() } else { "no".red() }
    );
    println!("  Interval: every {} minutes", connector.sync_interval_minutes);
    if let Some(ref credential) = connector.credential_ref {
        println!("  Credential: {}", credential);
    }
    println!("  Folders:");
    for folder in &connector.scope.folders {
        println!("    {} {}", "•".dimmed(), folder);
    }
    if !connector.scope.extensions.is_empty() {
        println!("  Extensions: {}", connector.scope.extensions.join(", "));
    }
    if let Some(max) = connector.scope.max_size_mb {
        println!("  Max file size: {} MB", max);
    }
    println!(
        "  Last sync: {}",
        connector
            .last_sync
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    println!("  Tracked files: {}", files.len());
    println!("  Index entries: {}", entries);

    Ok(())
}

pub fn set_enabled(id_or_name: &str, enabled: bool) -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;
    let connector = find_connector(&db, id_or_name)?;

    db.set_connector_enabled(&connector.id, enabled)?;

    let verb = if enabled { "Enabled" } else { "Disabled" };
    println!("{} {} {}", "✓".green(), verb, connector.name.cyan());
    if !enabled && db.sync_lease(&connector.id, Utc::now())?.is_some() {
        println!("  A running sync is cancelled at the next scheduler tick of `kbsync serve`.");
    }
    if config.connectors.iter().any(|c| c.name == connector.name) {
        println!(
            "  {} this connector is declared in the config file, which wins on the next start.",
            "Note:".yellow()
        );
    }

    Ok(())
}

pub fn remove(id_or_name: &str) -> Result<()> {
    let config = get_config()?;
    let db = get_database(&config)?;
    let connector = find_connector(&db, id_or_name)?;

    let entries = db.count_index_entries(Some(&connector.id))?;
    db.delete_connector(&connector.id).context("Failed to remove connector")?;

    println!(
        "{} Removed {} and {} index entries",
        "✓".green(),
        connector.name.cyan(),
        entries
    );

    Ok(())
}
