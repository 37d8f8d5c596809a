use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use idmsync::apply::ApplyOptions;
use idmsync::config::Settings;
use idmsync::reconcile::PlanSummary;
use idmsync::snapshot::Snapshot;
use idmsync::store::{SqliteStore, Store};

#[derive(Parser)]
#[command(name = "idmsync")]
#[command(
    about = "Reconcile the IdM database with an exported user/group snapshot",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InputArgs {
    /// Settings file. Defaults to $PERUN_CUSTOM_SCRIPTS_DIR/$PERUN_SERVICE.d/db_settings.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Users snapshot, overriding the settings file
    #[arg(long)]
    users: Option<PathBuf>,

    /// Groups snapshot, overriding the settings file
    #[arg(long)]
    groups: Option<PathBuf>,

    /// Print machine-readable JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database file and tables if they do not exist
    Init {
        /// Settings file. Defaults to $PERUN_CUSTOM_SCRIPTS_DIR/$PERUN_SERVICE.d/db_settings.toml
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Bring the database in line with the snapshot
    Sync {
        #[command(flatten)]
        input: InputArgs,

        /// Apply everything in one transaction, rolling back on failure
        #[arg(long)]
        single_transaction: bool,

        /// Compute and print the plan without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the actions a sync would take
    Plan {
        #[command(flatten)]
        input: InputArgs,
    },
}

fn load_settings(config: Option<PathBuf>) -> anyhow::Result<Settings> {
    let path = match config {
        Some(path) => path,
        None => Settings::default_path()?,
    };
    let settings = Settings::load(&path)?;
    info!("Loaded settings from {}", path.display());
    Ok(settings)
}

fn run_init(config: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = load_settings(config)?;
    let db_path = &settings.database.path;
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let store = SqliteStore::create(db_path)?;
    store.initialize()?;
    store.close()?;

    println!("Initialized database at {}", db_path.display());
    Ok(())
}

fn run_sync(input: InputArgs, single_transaction: bool, dry_run: bool) -> anyhow::Result<()> {
    let settings = load_settings(input.config)?;
    let users = input.users.unwrap_or(settings.snapshot.users);
    let groups = input.groups.unwrap_or(settings.snapshot.groups);

    let snapshot = Snapshot::load(&users, &groups)?;
    info!(
        users = snapshot.users.len(),
        groups = snapshot.groups.len(),
        "Loaded snapshot from {} and {}",
        users.display(),
        groups.display()
    );

    let store = SqliteStore::open(&settings.database.path)?;

    if dry_run {
        let plan = idmsync::sync::plan(&store, &snapshot)?;
        if input.json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        } else {
            print_summary("Planned", &plan.summary());
        }
    } else {
        let options = ApplyOptions {
            single_transaction: single_transaction || settings.sync.single_transaction,
        };
        let report = idmsync::sync::run(&store, &snapshot, options)?;
        if input.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_summary("Applied", &report.applied.applied);
        }
    }

    store.close()?;
    Ok(())
}

fn print_summary(heading: &str, summary: &PlanSummary) {
    println!("{heading} {} actions", summary.total());
    println!(
        "  users:       {} inserted, {} updated, {} disabled",
        summary.users_inserted, summary.users_updated, summary.users_disabled
    );
    println!(
        "  groups:      {} inserted, {} updated, {} purged",
        summary.groups_inserted, summary.groups_updated, summary.groups_purged
    );
    println!(
        "  identities:  {} inserted, {} deleted",
        summary.identities_inserted, summary.identities_deleted
    );
    println!(
        "  memberships: {} inserted, {} deleted",
        summary.memberships_inserted, summary.memberships_deleted
    );
}

fn main() -> ExitCode {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("idmsync=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { config } => run_init(config),
        Commands::Sync {
            input,
            single_transaction,
            dry_run,
        } => run_sync(input, single_transaction, dry_run),
        Commands::Plan { input } => run_sync(input, false, true),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
