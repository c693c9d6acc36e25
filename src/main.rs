/*!
 * Conduit CLI - Command Line Interface
 *
 * Author: Shane Wall <shaneawall@gmail.com>
 */

mod cli_progress;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cli_progress::{format_bytes, CliProgressRenderer};
use conduit::adapter::AdapterRegistry;
use conduit::config::ConduitConfig;
use conduit::transform::{
    Checksum, Compress, Progress, ProgressPublisher, TransformKind, TransformRegistry,
};
use conduit::{logging, Conduit, Pipeline, TransferError, TransferOptions, TransferReport};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

const EXIT_SUCCESS: i32 = 0;
const EXIT_TRANSFER: i32 = 1;
const EXIT_FATAL: i32 = 2;

#[derive(Parser)]
#[command(name = "conduit")]
#[command(version, about = "Stream files to and from storage through checksum, compression and progress stages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Storage adapter identity (local, memory, object-store)
    #[arg(long, global = true)]
    adapter: Option<String>,

    /// Root directory for the local adapter
    #[arg(long, value_name = "DIR", global = true)]
    root: Option<PathBuf>,

    /// Compute a checksum (md5, sha1, sha256, sha512, blake3)
    #[arg(long, value_name = "ALG", global = true)]
    checksum: Option<String>,

    /// Compress on upload, decompress on download (gzip, deflate, zstd)
    #[arg(long, value_name = "ALG", global = true)]
    compress: Option<String>,

    /// Show progress bars
    #[arg(long, global = true)]
    progress: bool,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file
    Upload {
        /// File to upload
        file: PathBuf,

        /// Target directory in storage
        #[arg(long)]
        directory: Option<String>,

        /// Target name in storage (random when omitted)
        #[arg(long)]
        name: Option<String>,
    },

    /// Download a stored file
    Download {
        /// Location in storage
        location: String,

        /// Local destination file
        file: PathBuf,
    },

    /// Remove a stored file
    Remove {
        /// Location in storage
        location: String,
    },
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if e.downcast_ref::<TransferError>().is_some() {
                EXIT_TRANSFER
            } else {
                EXIT_FATAL
            }
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => ConduitConfig::from_file(path)?,
        None => ConduitConfig::default(),
    };
    apply_overrides(&mut config, &cli);

    if let Err(e) = logging::init_logging(&config.logging) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let (publisher, subscriber) = ProgressPublisher::unbounded();
    let renderer = cli
        .progress
        .then(|| CliProgressRenderer::new(subscriber, cli.verbose).spawn());

    let conduit = build_conduit(&config, publisher)?;
    let pipeline = build_pipeline(&conduit, &config, &cli)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let outcome = runtime.block_on(execute(&cli, &conduit, pipeline));

    // Dropping the facade and pipeline drops the last publisher
    drop(conduit);
    if let Some(handle) = renderer {
        let _ = handle.join();
    }

    outcome
}

fn apply_overrides(config: &mut ConduitConfig, cli: &Cli) {
    if let Some(ref adapter) = cli.adapter {
        config.adapter.identity = adapter.clone();
    }
    if let Some(ref root) = cli.root {
        config.adapter.config = json!({ "root": root });
    }
    if cli.verbose {
        config.logging.verbose = true;
    }
}

/// Transform registry whose `progress` stage publishes to `publisher`
fn build_conduit(config: &ConduitConfig, publisher: ProgressPublisher) -> Result<Conduit> {
    let transforms = TransformRegistry::new();
    transforms.register::<Checksum>()?;
    transforms.register::<Compress>()?;
    transforms.register_factory(Progress::IDENTITY, Progress::factory(publisher))?;

    let adapter = AdapterRegistry::new()
        .create(&config.adapter.identity, &config.adapter.config)
        .with_context(|| format!("Failed to create adapter '{}'", config.adapter.identity))?;

    Ok(Conduit::builder()
        .adapter(adapter)
        .transforms(Arc::new(transforms))
        .build()?)
}

fn build_pipeline(conduit: &Conduit, config: &ConduitConfig, cli: &Cli) -> Result<Pipeline> {
    let mut pipeline = conduit.pipeline_from(&config.middleware)?;
    let configured = |identity: &str| config.middleware.iter().any(|m| m.identity == identity);

    if let Some(ref algorithm) = cli.checksum {
        if !configured(Checksum::IDENTITY) {
            pipeline = pipeline.use_transform_with(Checksum::IDENTITY, json!({ "algorithm": algorithm }))?;
        }
    }
    if let Some(ref algorithm) = cli.compress {
        if !configured(Compress::IDENTITY) {
            pipeline = pipeline.use_transform_with(Compress::IDENTITY, json!({ "algorithm": algorithm }))?;
        }
    }
    if cli.progress && !configured(Progress::IDENTITY) {
        pipeline = pipeline.use_transform(Progress::IDENTITY)?;
    }
    Ok(pipeline)
}

/// Per-call options from the flags; they override configured options
fn call_options(cli: &Cli) -> TransferOptions {
    let mut options = TransferOptions::new();
    if let Some(ref algorithm) = cli.checksum {
        options = options.with(Checksum::IDENTITY, json!({ "algorithm": algorithm }));
    }
    if let Some(ref algorithm) = cli.compress {
        options = options.with(Compress::IDENTITY, json!({ "algorithm": algorithm }));
    }
    options
}

async fn execute(cli: &Cli, conduit: &Conduit, pipeline: Pipeline) -> Result<()> {
    match cli.command {
        Commands::Upload {
            ref file,
            ref directory,
            ref name,
        } => {
            let source = tokio::fs::File::open(file)
                .await
                .with_context(|| format!("Failed to open {}", file.display()))?;
            let size = source.metadata().await?.len();

            let mut options = call_options(cli).with(Progress::IDENTITY, json!({ "total": size }));
            options.directory = directory.clone();
            options.name = name.clone();

            let transfer = pipeline.upload_reader(source, options)?;
            let location = transfer.location().to_string();
            tracing::info!(file = %file.display(), %location, "Uploading");

            let report = transfer.await?;
            print_report(cli, &report)
        }

        Commands::Download {
            ref location,
            ref file,
        } => {
            if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            let destination = tokio::fs::File::create(file)
                .await
                .with_context(|| format!("Failed to create {}", file.display()))?;

            let report = pipeline.download(location, destination, call_options(cli))?.await?;
            print_report(cli, &report)
        }

        Commands::Remove { ref location } => {
            let removed = conduit.remove(location)?.await?;
            if cli.json {
                println!("{}", json!({ "location": removed }));
            } else {
                println!("✓ Removed {}", removed);
            }
            Ok(())
        }
    }
}

fn print_report(cli: &Cli, report: &TransferReport) -> Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("✓ {} ({})", report.location, report.adapter);
    for identity in &report.transforms {
        let Some(result) = report.result(identity) else {
            continue;
        };
        match identity.as_str() {
            "checksum" => println!(
                "  checksum: {} {}",
                result["algorithm"].as_str().unwrap_or_default(),
                result["value"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| result["value"].to_string())
            ),
            "compress" => println!(
                "  compress: {} in, {} out",
                format_bytes(result["bytes_in"].as_u64().unwrap_or(0)),
                format_bytes(result["bytes_out"].as_u64().unwrap_or(0))
            ),
            "progress" => println!(
                "  progress: {} in {}ms",
                format_bytes(result["processed"].as_u64().unwrap_or(0)),
                result["duration_ms"]
            ),
            _ => println!("  {}: {}", identity, result),
        }
    }
    Ok(())
}
