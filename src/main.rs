use papertape::cli::{Cli, Commands};
use papertape::commands;
use papertape::config::Config;
use papertape::error::Result;
use papertape::logger;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse_args();

    // Initialize logging system
    logger::init(args.verbose, args.log_json)?;

    debug!("papertape starting");

    match run(args).await {
        Ok(_) => {
            info!("Operation completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Operation failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Commands::Inventory => commands::inventory::execute(&config).await,

        Commands::Load { label, drive } => commands::load::execute(&config, label, drive).await,

        Commands::Unload { drive } => commands::unload::execute(&config, drive).await,

        Commands::Manifest {
            dir,
            out,
            first_index,
            checksums,
        } => commands::manifest::execute(&config, dir, out, first_index, checksums).await,

        Commands::Dump {
            manifest,
            drive,
            mode,
            commit,
            progress,
        } => commands::dump::execute(&config, manifest, drive, mode, commit, progress).await,

        Commands::Verify {
            label,
            catalog,
            job_pid,
            drive,
            seed,
        } => commands::verify::execute(&config, label, catalog, job_pid, drive, seed).await,

        Commands::InsertLabels { labels } => commands::insert_labels::execute(&config, labels).await,

        Commands::TapeCatalog { label, drive, count } => {
            commands::tape_catalog::execute(&config, label, drive, count).await
        }
    }
}
