//! stampede-import - run one file through the import pipeline

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use stampede_import::logging::{init_logging, LogConfig, LogLevel};
use stampede_import::model::{Client, Product, User};
use stampede_import::repository::InMemoryRepository;
use stampede_import::{
    AppError, ImportConfig, ImportResult, ImportService, ProcessState, ProcessorRegistry,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "stampede-import")]
#[command(author, version, about = "Validate and import a CSV or Excel entity file")]
struct Cli {
    /// File to import (.csv, .xlsx or .xls)
    file: PathBuf,

    /// Entity type: cliente, producto or usuario
    #[arg(short, long, env = "IMPORT_ENTITY")]
    entity: String,

    /// Rows per batch (overrides IMPORT_BATCH_SIZE)
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Only run the structural check and print a preview
    #[arg(long)]
    check_only: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_config = LogConfig::from_env()?;
    let log_config = if cli.verbose {
        log_config.with_level(LogLevel::Debug)
    } else {
        log_config
    };
    init_logging(&log_config)?;

    let mut config = ImportConfig::from_env()?;
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }

    let registry = ProcessorRegistry::builtin(
        Arc::new(InMemoryRepository::<Client>::new()),
        Arc::new(InMemoryRepository::<Product>::new()),
        Arc::new(InMemoryRepository::<User>::new()),
    );
    let service = ImportService::new(config, registry)?;

    let file_name = cli
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .context("file path has no usable file name")?
        .to_string();
    let bytes = tokio::fs::read(&cli.file)
        .await
        .with_context(|| format!("failed to read {}", cli.file.display()))?;

    let report = match service.validate_upload(&file_name, &bytes, &cli.entity) {
        Ok(report) => report,
        Err(e) => return reject(e),
    };
    for warning in report.warning_messages() {
        warn!("{}", warning);
    }
    if !report.ok {
        for error in report.error_messages() {
            eprintln!("error: {}", error);
        }
        return Ok(ExitCode::from(2));
    }

    if cli.check_only {
        let preview = match service.preview(&file_name, &bytes) {
            Ok(preview) => preview,
            Err(e) => return reject(e),
        };
        print_json_or(cli.json, &preview, || {
            println!("{} data rows, columns: {}", report.stats.data_rows, preview.headers.join(", "));
            for row in &preview.rows {
                let cells: Vec<String> = row.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                println!("  {}", cells.join(" | "));
            }
        })?;
        return Ok(ExitCode::SUCCESS);
    }

    let extracted = match service.extract(&file_name, &bytes) {
        Ok(extracted) => extracted,
        Err(e) => return reject(e),
    };
    let handle = match service
        .submit_import(&cli.entity, extracted.rows, &file_name, None)
        .await
    {
        Ok(handle) => handle,
        Err(e) => return reject(e),
    };
    let job_id = handle.job_id.clone();
    info!("Submitted job {}", job_id);

    let mut finished = std::pin::pin!(handle.result());
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let result = loop {
        tokio::select! {
            result = &mut finished => break result?,
            _ = ticker.tick() => {
                if let Some(status) = service.get_process_status(&job_id).await {
                    if status.state == ProcessState::InProgress {
                        info!(
                            "Progress: {}/{} rows ({:.0}%)",
                            status.processed_count,
                            status.total_records,
                            status.progress_percent()
                        );
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling job {}", job_id);
                service.cancel_process(&job_id).await;
                service.shutdown().await;
                return Ok(ExitCode::FAILURE);
            }
        }
    };
    let state = service.get_process_status(&job_id).await.map(|s| s.state);
    service.shutdown().await;

    print_result(cli.json, &result)?;

    if state == Some(ProcessState::Error) || (result.has_errors() && result.succeeded == 0) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Input errors are reported to the user with exit code 2; anything else
/// propagates.
fn reject(error: AppError) -> Result<ExitCode> {
    if !error.is_input_error() {
        return Err(error.into());
    }
    let presentation = error.to_presentation();
    eprintln!("error: {}", presentation.message);
    if let Some(action) = presentation.action {
        eprintln!("hint: {}", action);
    }
    Ok(ExitCode::from(2))
}

fn print_json_or<T: serde::Serialize>(json: bool, value: &T, text: impl FnOnce()) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text();
    }
    Ok(())
}

fn print_result(json: bool, result: &ImportResult) -> Result<()> {
    print_json_or(json, result, || {
        println!("{} ({} {})", result.summary(), result.entity_type, result.file_name);
        for message in &result.info_messages {
            println!("  info: {}", message);
        }
        for message in &result.warnings {
            println!("  warning: {}", message);
        }
        for message in &result.errors {
            println!("  error: {}", message);
        }
    })
}
