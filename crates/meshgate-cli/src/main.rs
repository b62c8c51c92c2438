//! Command-line interface for the meshgate device layer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use meshgate_core::config::{self as core_config, defaults};
use meshgate_core::DeviceId;
use meshgate_devices::{
    codec, AttributeRecord, AttributeReport, Gateway, GatewayConfig, MemoryEndpoint,
    SchemaRegistry,
};
use serde::Deserialize;

/// meshgate - attribute translation core for mesh-sensor gateways.
#[derive(Parser, Debug)]
#[command(name = "meshgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// List known device models and their fields.
    Models {
        /// Extra schema file to load next to the built-in models.
        #[arg(short, long, env = "MESHGATE_SCHEMA_PATH")]
        schema: Option<PathBuf>,
    },
    /// Validate a schema definition file.
    Validate {
        /// Path to the schema file.
        #[arg(required = true)]
        path: PathBuf,
    },
    /// Encode a set-command without sending it.
    Encode {
        /// Device model.
        #[arg(short, long)]
        model: String,
        /// Field to set.
        #[arg(short, long)]
        field: String,
        /// Requested value (number or label).
        value: String,
        /// Extra schema file to load next to the built-in models.
        #[arg(short, long, env = "MESHGATE_SCHEMA_PATH")]
        schema: Option<PathBuf>,
    },
    /// Replay recorded attribute reports through an in-memory gateway.
    Replay {
        /// JSON file holding an array of reports.
        #[arg(required = true)]
        reports: PathBuf,
        /// Device the reports come from.
        #[arg(short, long, default_value = "0x0000000000000001")]
        device: String,
        /// Device model.
        #[arg(short, long)]
        model: String,
        /// Extra schema file to load next to the built-in models.
        #[arg(short, long, env = "MESHGATE_SCHEMA_PATH")]
        schema: Option<PathBuf>,
        /// Commands to dispatch after the reports, as `field=value`.
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        set: Vec<String>,
        /// Reset the device to factory defaults after the commands.
        #[arg(long)]
        factory_reset: bool,
        /// Print the final device state after the events.
        #[arg(long)]
        show_state: bool,
    },
}

/// One recorded report; the device comes from the command line.
#[derive(Debug, Deserialize)]
struct RecordedReport {
    #[serde(default = "default_endpoint")]
    endpoint: u8,
    records: Vec<AttributeRecord>,
}

fn default_endpoint() -> u8 {
    defaults::ENDPOINT
}

/// What `replay` does once the reports are ingested.
struct ReplayOptions {
    set: Vec<String>,
    factory_reset: bool,
    show_state: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Models { schema } => list_models(schema.as_deref()),
        Command::Validate { path } => validate(&path),
        Command::Encode {
            model,
            field,
            value,
            schema,
        } => encode(&model, &field, &value, schema.as_deref()),
        Command::Replay {
            reports,
            device,
            model,
            schema,
            set,
            factory_reset,
            show_state,
        } => {
            let options = ReplayOptions {
                set,
                factory_reset,
                show_state,
            };
            replay(&reports, &device, &model, schema, &options).await
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // stdout carries command output; logs go to stderr.
    if core_config::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_registry(schema: Option<&Path>) -> Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::with_builtin_models()?;
    if let Some(path) = schema {
        registry
            .load_file(path)
            .with_context(|| format!("Failed to load schema file {}", path.display()))?;
    }
    Ok(registry)
}

fn list_models(schema: Option<&Path>) -> Result<()> {
    let registry = load_registry(schema)?;
    for model in registry.models() {
        let schema = registry.lookup(&model)?;
        println!("{}", schema.model());
        if !schema.vendor().is_empty() {
            println!("  vendor: {}", schema.vendor());
        }
        for mapping in schema.fields() {
            let access = if mapping.is_settable() { "rw" } else { "r " };
            let bounds = mapping
                .bounds
                .map(|b| format!(" [{}, {}]", b.min, b.max))
                .unwrap_or_default();
            println!(
                "  {} {:<16} ep{} {}/{} {}{}",
                access,
                mapping.field,
                mapping.endpoint,
                mapping.cluster,
                mapping.attribute,
                mapping.wire_type,
                bounds
            );
            for derived in &mapping.derived {
                println!("  r  {:<16} from {}", derived.field, mapping.field);
            }
        }
    }
    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    let mut registry = SchemaRegistry::new();
    let count = registry
        .load_file(path)
        .with_context(|| format!("Invalid schema file {}", path.display()))?;
    println!("OK: {} model(s) in {}", count, path.display());
    for model in registry.models() {
        println!("  {}", model);
    }
    Ok(())
}

fn encode(model: &str, field: &str, value: &str, schema: Option<&Path>) -> Result<()> {
    let registry = load_registry(schema)?;
    let schema = registry.lookup(model)?;
    let write = codec::encode(&schema, field, value)?;
    println!("{}", serde_json::to_string_pretty(&write)?);
    Ok(())
}

async fn replay(
    reports_path: &Path,
    device: &str,
    model: &str,
    schema: Option<PathBuf>,
    options: &ReplayOptions,
) -> Result<()> {
    let contents = std::fs::read_to_string(reports_path)
        .with_context(|| format!("Failed to read {}", reports_path.display()))?;
    let recorded: Vec<RecordedReport> =
        serde_json::from_str(&contents).context("Failed to parse reports")?;

    let commands = options
        .set
        .iter()
        .map(|s| match s.split_once('=') {
            Some((field, value)) => Ok((field.trim().to_string(), value.trim().to_string())),
            None => bail!("Invalid --set '{}': expected FIELD=VALUE", s),
        })
        .collect::<Result<Vec<_>>>()?;

    let registry = load_registry(schema.as_deref())?;
    let endpoint = Arc::new(MemoryEndpoint::new());
    let gateway = Gateway::new(registry, endpoint, GatewayConfig::from_env());
    let mut events = gateway.subscribe();

    let device_id = DeviceId::from(device);
    tracing::info!(reports = recorded.len(), device = %device_id, model, "Replaying reports");
    gateway.join(device_id.clone(), model).await?;

    for report in recorded {
        let report = AttributeReport {
            device_id: device_id.clone(),
            endpoint: report.endpoint,
            records: report.records,
            received_at: chrono::Utc::now(),
        };
        gateway.ingest(&report)?;
    }

    let mut failures = 0;
    for (field, value) in &commands {
        if let Err(e) = gateway.dispatch(&device_id, field, value).await {
            eprintln!("{}={}: {}", field, value, e);
            failures += 1;
        }
    }
    if options.factory_reset {
        if let Err(e) = gateway.factory_reset(&device_id).await {
            eprintln!("factory reset: {}", e);
            failures += 1;
        }
    }

    // Every event is queued for us; clock sync writes run on their own
    // tasks, so collect until the bus goes quiet.
    while let Ok(Some((event, _))) = tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
        println!("{}", serde_json::to_string(&event)?);
    }

    if options.show_state {
        if let Some(state) = gateway.state(&device_id) {
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
    }

    if failures > 0 {
        bail!("{} command(s) failed", failures);
    }
    Ok(())
}
