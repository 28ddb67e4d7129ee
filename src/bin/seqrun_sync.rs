use std::process::ExitCode;

use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;

use seqrun_sync::config::{ConfigLoader, ResolvedConfig};
use seqrun_sync::dnanexus::DnanexusHttpClient;
use seqrun_sync::domain::{ProjectId, ResultLayout};
use seqrun_sync::error::SyncError;
use seqrun_sync::import::{BatchReport, ImportOptions, Importer};
use seqrun_sync::logging;
use seqrun_sync::output::OutputMode;
use seqrun_sync::pulsar::PulsarHttpClient;

#[derive(Parser)]
#[command(name = "seqrun-sync")]
#[command(about = "Import finished DNAnexus sequencing projects into the Pulsar LIMS")]
#[command(version, author)]
struct Cli {
    /// Path to a JSON config file (default: ./seqrun-sync.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print the batch report as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Exit with status 2 when any project was skipped.
    #[arg(long, global = true)]
    strict: bool,

    /// How sequencing results are laid out (overrides `result_layout` in the config).
    #[arg(long, global = true, value_enum)]
    layout: Option<ResultLayout>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Accept pending transfers and import every accepted project")]
    Sync,
    #[command(about = "Import the given DNAnexus projects")]
    Import {
        #[arg(required = true)]
        project_ids: Vec<String>,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<SyncError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &SyncError) -> u8 {
    if error.is_transport() { 3 } else { 1 }
}

fn run() -> miette::Result<ExitCode> {
    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let resolved = ConfigLoader::resolve(cli.config.as_deref())?;
    logging::init(&resolved.log_dir)?;
    tracing::debug!(
        lims_url = %resolved.lims_url,
        dnanexus_url = %resolved.dnanexus_url,
        org = %resolved.transfer.org,
        "configuration resolved"
    );

    let lims = PulsarHttpClient::new(&resolved.lims_url, resolved.lims_token()?)?;
    let cloud = DnanexusHttpClient::new(&resolved.dnanexus_url, resolved.dnanexus_token()?)?;
    let importer = Importer::new(
        cloud,
        lims,
        ImportOptions {
            storage_provider: resolved.storage_provider.clone(),
            result_layout: cli.layout.unwrap_or(resolved.result_layout),
        },
    );

    let sink = output_mode.sink();

    let report = match cli.command {
        Commands::Sync => importer.sync(&resolved.transfer, sink)?,
        Commands::Import { project_ids } => {
            let projects = project_ids
                .iter()
                .map(|raw| raw.parse::<ProjectId>().map(|id| (id, None)))
                .collect::<Result<Vec<_>, SyncError>>()?;
            importer.run_batch(&projects, sink)?
        }
    };

    output_mode
        .write_report(&report, &mut std::io::stdout().lock())
        .into_diagnostic()?;

    Ok(batch_exit_code(&report, &resolved, cli.strict))
}

fn batch_exit_code(report: &BatchReport, resolved: &ResolvedConfig, strict: bool) -> ExitCode {
    if report.has_failures() && (strict || resolved.fail_on_project_error) {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}
