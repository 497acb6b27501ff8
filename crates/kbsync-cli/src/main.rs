//! kbsync CLI - Keep a knowledge base in sync with your document sources

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// kbsync - Sync documents from folders and cloud drives into a searchable index
#[derive(Parser)]
#[command(name = "kbsync")]
#[command(version)]
#[command(about = "Sync documents from folders and cloud drives into a searchable index", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize kbsync (create config and database)
    Init,

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Manage connectors
    #[command(subcommand)]
    Connector(ConnectorCommands),

    /// Run a sync now
    Sync {
        /// Connector ID or name
        #[arg(required_unless_present = "all")]
        connector: Option<String>,

        /// Sync every enabled connector
        #[arg(long, conflicts_with = "connector")]
        all: bool,
    },

    /// Show the sync run log
    Runs {
        /// Connector ID or name (all connectors if omitted)
        connector: Option<String>,

        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: i64,
    },

    /// List tracked files of a connector
    Files {
        /// Connector ID or name
        connector: String,
    },

    /// Show connectors and index statistics
    Status,

    /// Search the index
    Search {
        /// Search query
        query: String,

        /// Maximum results
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Run the scheduler, folder watcher and job runner until Ctrl-C
    Serve,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Print the config file location
    Path,
}

#[derive(Subcommand)]
enum ConnectorCommands {
    /// Add a connector
    Add {
        /// Connector name
        name: String,

        /// Provider: local_folder, google_drive or onedrive
        #[arg(short, long)]
        provider: String,

        /// Folder path or remote folder ID (repeatable)
        #[arg(short, long = "folder", required = true)]
        folders: Vec<String>,

        /// Only sync files with this extension (repeatable)
        #[arg(short, long = "ext")]
        extensions: Vec<String>,

        /// Skip files larger than this many megabytes
        #[arg(long)]
        max_size_mb: Option<u64>,

        /// Credential reference, e.g. the environment variable holding a token
        #[arg(short, long)]
        credential: Option<String>,

        /// Minutes between scheduled syncs
        #[arg(short, long)]
        interval: Option<u32>,
    },

    /// List connectors
    List,

    /// Show connector details
    Show {
        /// Connector ID or name
        connector: String,
    },

    /// Enable scheduled syncs
    Enable {
        /// Connector ID or name
        connector: String,
    },

    /// Disable scheduled syncs
    Disable {
        /// Connector ID or name
        connector: String,
    },

    /// Remove a connector with its sync state and index entries
    Remove {
        /// Connector ID or name
        connector: String,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kbsync=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kbsync=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Init => commands::init::run(),
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show => commands::config::show(),
            ConfigCommands::Path => commands::config::path(),
        },
        Commands::Connector(cmd) => match cmd {
            ConnectorCommands::Add {
                name,
                provider,
                folders,
                extensions,
                max_size_mb,
                credential,
                interval,
            } => commands::connector::add(commands::connector::NewConnector {
                name,
                provider,
                folders,
                extensions,
                max_size_mb,
                credential,
                interval,
            }),
            ConnectorCommands::List => commands::connector::list(),
            ConnectorCommands::Show { connector } => commands::connector::show(&connector),
            ConnectorCommands::Enable { connector } => commands::connector::set_enabled(&connector, true),
            ConnectorCommands::Disable { connector } => commands::connector::set_enabled(&connector, false),
            ConnectorCommands::Remove { connector } => commands::connector::remove(&connector),
        },
        Commands::Sync { connector, all } => commands::sync::run(connector, all),
        Commands::Runs { connector, limit } => commands::runs::run(connector, limit),
        Commands::Files { connector } => commands::files::run(&connector),
        Commands::Status => commands::status::run(),
        Commands::Search { query, limit } => commands::search::run(&query, limit),
        Commands::Serve => commands::serve::run(),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
