mod documents;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use documents::{load_payload, MetadataDocument};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tracker_core::{
    ImportOptionValues, ImportOptions, ImportReport, ImportStrategy, InMemoryStore,
    TrackerImportService, TrackerStatus,
};

#[derive(Parser)]
#[command(name = "tracker")]
#[command(about = "Validate and import tracker payloads")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a payload without writing anything
    Validate(RunArgs),
    /// Validate and commit a payload
    Import(RunArgs),
    /// Delete the records a payload names
    Delete(RunArgs),
}

#[derive(Args, Clone, Debug, Default)]
struct RunArgs {
    /// Metadata document (organisation units, programs, attributes)
    #[arg(long)]
    metadata: PathBuf,
    /// Payload document to process
    #[arg(long)]
    payload: PathBuf,
    /// Payload imported before the command runs, to populate the store
    #[arg(long)]
    seed: Option<PathBuf>,
    /// ID, CODE or UID
    #[arg(long, env = "TRACKER_ORG_UNIT_ID_SCHEME")]
    org_unit_id_scheme: Option<String>,
    /// ID, CODE or UID
    #[arg(long, env = "TRACKER_PROGRAM_ID_SCHEME")]
    program_id_scheme: Option<String>,
    /// CREATE, UPDATE, CREATE_AND_UPDATE or DELETE
    #[arg(long, env = "TRACKER_IMPORT_STRATEGY")]
    strategy: Option<String>,
    /// ALL or OBJECT
    #[arg(long, env = "TRACKER_ATOMIC_MODE")]
    atomic_mode: Option<String>,
    /// SINGLE or TRACKED_ENTITY
    #[arg(long, env = "TRACKER_PARTITION")]
    partition: Option<String>,
}

impl RunArgs {
    fn options(&self) -> anyhow::Result<ImportOptions> {
        let options = ImportOptions::from_values(ImportOptionValues {
            org_unit_id_scheme: self.org_unit_id_scheme.clone(),
            program_id_scheme: self.program_id_scheme.clone(),
            import_strategy: self.strategy.clone(),
            atomic_mode: self.atomic_mode.clone(),
            partition: self.partition.clone(),
        })?;
        Ok(options)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Validate,
    Import,
    Delete,
}

fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("tracker=info".parse()?))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let (mode, args) = match cli.command {
        Some(Commands::Validate(args)) => (Mode::Validate, args),
        Some(Commands::Import(args)) => (Mode::Import, args),
        Some(Commands::Delete(args)) => (Mode::Delete, args),
        None => {
            println!("Use --help to see available commands");
            return Ok(ExitCode::SUCCESS);
        }
    };

    let report = run(mode, &args)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.status == TrackerStatus::Error {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn run(mode: Mode, args: &RunArgs) -> anyhow::Result<ImportReport> {
    let mut options = args.options()?;
    if mode == Mode::Delete {
        options = options.with_import_strategy(ImportStrategy::Delete);
    }

    let store = Arc::new(InMemoryStore::new());
    MetadataDocument::load(&args.metadata)?
        .register(&store)
        .context("failed to register metadata")?;
    let service = TrackerImportService::new(store);

    if let Some(seed) = &args.seed {
        let seed_options = options
            .clone()
            .with_import_strategy(ImportStrategy::CreateAndUpdate);
        let report = service.import(load_payload(seed)?, seed_options);
        if report.status == TrackerStatus::Error {
            anyhow::bail!(
                "seed payload {} was not imported cleanly: {} errors, {} bundle failures",
                seed.display(),
                report.errors.len(),
                report.failures.len()
            );
        }
        tracing::info!("seeded store from {}", seed.display());
    }

    let payload = load_payload(&args.payload)?;
    let report = match mode {
        Mode::Validate => service.validate(payload, options),
        Mode::Import | Mode::Delete => service.import(payload, options),
    };
    Ok(report)
}
