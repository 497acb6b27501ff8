//! CLI command implementations.

pub mod config;
pub mod connector;
pub mod files;
pub mod init;
pub mod runs;
pub mod search;
pub mod serve;
pub mod status;
pub mod sync;

use anyhow::{Context, Result};
use kbsync_config::{AppPaths, Config, ConnectorConfig};
use kbsync_core::{Connector, FileScope, ProviderKind};
use kbsync_db::Database;
use kbsync_ingest::{ContentStores, EnvCredentialStore};
use kbsync_ollama::OllamaClient;
use kbsync_sync::Orchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Get the application paths, honouring `[general] data_dir` when set.
pub fn get_paths() -> Result<AppPaths> {
    let paths = AppPaths::new().context("Failed to determine application directories")?;
    if !paths.config_file.exists() {
        return Ok(paths);
    }

    let config = Config::load_from(&paths.config_file).context("Failed to load config")?;
    Ok(match config.general.data_dir {
        Some(dir) => paths.with_data_dir(PathBuf::from(shellexpand::tilde(&dir).as_ref())),
        None => paths,
    })
}

/// Load and validate the configuration file.
pub fn get_config() -> Result<Config> {
    let paths = get_paths()?;
    let config = Config::load_from(&paths.config_file).context("Failed to load config")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Open the database, ensuring kbsync is initialized and declared connectors exist.
pub fn get_database(config: &Config) -> Result<Database> {
    let paths = get_paths()?;

    if !paths.is_initialized() {
        anyhow::bail!("kbsync is not initialized. Run 'kbsync init' first.");
    }

    let db = Database::open(&paths.database_file).context("Failed to open database")?;
    for declared in &config.connectors {
        let connector = connector_from_config(declared, config.sync.default_interval_minutes)?;
        db.upsert_connector_by_name(&connector)
            .with_context(|| format!("Failed to register connector '{}'", declared.name))?;
        debug!(connector = %declared.name, "Registered declared connector");
    }
    Ok(db)
}

/// Look up a connector by ID or name.
pub fn find_connector(db: &Database, id_or_name: &str) -> Result<Connector> {
    db.find_connector(id_or_name)
        .with_context(|| format!("Connector not found: {}", id_or_name))
}

/// Build a connector from a `[[connectors]]` entry.
pub fn connector_from_config(declared: &ConnectorConfig, default_interval: u32) -> Result<Connector> {
    let provider = ProviderKind::from_str(&declared.provider).with_context(|| {
        format!(
            "Unknown provider '{}' for connector '{}' (expected local_folder, google_drive or onedrive)",
            declared.provider, declared.name
        )
    })?;

    let mut scope = FileScope::new(declared.folders.clone()).with_extensions(declared.extensions.clone());
    if let Some(max) = declared.max_size_mb {
        scope = scope.with_max_size_mb(max);
    }

    let mut connector = Connector::new(&declared.name, provider, scope)
        .with_interval_minutes(declared.interval_minutes.unwrap_or(default_interval));
    if let Some(ref credential) = declared.credential {
        connector = connector.with_credential(credential);
    }
    connector.enabled = declared.enabled;
    Ok(connector)
}

/// Wire the production sync pipeline: real content stores, Ollama embeddings, SQLite index.
pub fn build_orchestrator(config: &Config, db: &Database) -> Result<Orchestrator> {
    let stores = ContentStores::standard(
        Arc::new(EnvCredentialStore),
        Duration::from_secs(config.ollama.timeout_seconds),
    )
    .context("Failed to set up content stores")?;
    let client = OllamaClient::from_config(&config.ollama).context("Failed to create Ollama client")?;

    Ok(Orchestrator::from_config(config, db.clone(), stores, Arc::new(client)))
}

/// Format a file size in human-readable form.
pub fn format_size(bytes: i64) -> String {
    const KB: i64 = 1024;
    const MB: i64 = KB * 1024;
    const GB: i64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declared(provider: &str) -> ConnectorConfig {
        ConnectorConfig {
            name: "notes".to_string(),
            provider: provider.to_string(),
            folders: vec!["~/notes".to_string()],
            extensions: vec![".md".to_string()],
            max_size_mb: Some(2),
            credential: None,
            interval_minutes: None,
            enabled: true,
        }
    }

    #[test]
    fn test_connector_from_config() {
        let connector = connector_from_config(&declared("local_folder"), 20).unwrap();
        assert_eq!(connector.name, "notes");
        assert_eq!(connector.provider, ProviderKind::LocalFolder);
        assert_eq!(connector.sync_interval_minutes, 20);
        assert_eq!(connector.scope.max_size_mb, Some(2));
        assert_eq!(connector.scope.extensions, vec![".md"]);
        assert!(connector.enabled);
    }

    #[test]
    fn test_connector_from_config_rejects_unknown_provider() {
        assert!(connector_from_config(&declared("dropbox"), 15).is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }
}
