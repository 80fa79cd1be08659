use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use page_transform::{
    reporter::ReportError, BatchReport, ConfigError, FileSystemPlatform, FunctionRegistry, MappingError,
    MappingLoader, MappingProperties, ObserverBus, PlatformError, ReportFormat, ReportObserver, TracingObserver,
    TracingTelemetry, TransformConfig, TransformationPipeline, TransformationReporter, TransformationRequest,
};

#[derive(Parser, Debug)]
#[command(name = "page-transform")]
#[command(about = "Transform classic pages into modern pages driven by mapping files")]
struct Args {
    /// Path to the run configuration (YAML)
    config: PathBuf,

    /// Pages to transform; every page in the source container when omitted
    pages: Vec<String>,

    /// Directory holding the site content
    #[arg(long, value_name = "DIR")]
    content_root: PathBuf,

    /// Only transform pages whose name starts with this prefix
    #[arg(long, value_name = "PREFIX", conflicts_with = "pages")]
    prefix: Option<String>,

    /// Site identifier used for component lookups (defaults to the content root's name)
    #[arg(long, value_name = "ID")]
    site_id: Option<String>,

    /// Overwrite target pages that already exist
    #[arg(long)]
    overwrite: bool,

    /// Do not submit telemetry events
    #[arg(long)]
    skip_telemetry: bool,

    /// Prefix for target page names
    #[arg(long, value_name = "PREFIX")]
    target_prefix: Option<String>,

    /// Report format (overrides the config)
    #[arg(long, value_enum)]
    report_format: Option<ReportFormat>,

    /// Mapping property toggle, may be repeated (e.g. SkipUrlRewrite=true)
    #[arg(long = "property", value_name = "KEY=VALUE", value_parser = parse_property)]
    properties: Vec<(String, String)>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[derive(Debug, Error)]
enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("Failed to list source pages: {0}")]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("Failed to write report {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.trim().to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    }
}

/// Fold command line overrides into the loaded config
fn apply_overrides(config: &mut TransformConfig, args: &Args) {
    if args.overwrite {
        config.overwrite = true;
    }
    if args.skip_telemetry {
        config.skip_telemetry = true;
    }
    if let Some(ref prefix) = args.target_prefix {
        config.target_prefix = Some(prefix.clone());
    }
    if let Some(format) = args.report_format {
        config.report.format = format;
    }
}

fn build_requests(pages: Vec<String>, config: &TransformConfig, overrides: &MappingProperties) -> Vec<TransformationRequest> {
    pages
        .into_iter()
        .map(|page| {
            let request = TransformationRequest::new(page)
                .with_overwrite(config.overwrite)
                .with_skip_telemetry(config.skip_telemetry)
                .with_mapping_properties(overrides);
            match config.target_prefix {
                Some(ref prefix) => request.with_target_prefix(prefix),
                None => request,
            }
        })
        .collect()
}

async fn run(args: Args) -> Result<BatchReport, RunError> {
    let mut config = TransformConfig::load(&args.config)?;
    apply_overrides(&mut config, &args);

    let mut bus = ObserverBus::new().with_observer(TracingObserver);
    if let Some(ref path) = config.report.path {
        bus.register(ReportObserver::to_file(path, config.report.format));
    }

    let loader = MappingLoader::new().with_bus(&bus);
    let tables = config.load_tables(&loader).await?;
    let document = config.layout_mapping.load_document(&loader).await?;
    let mappings = FunctionRegistry::new().bind_document(document)?;

    let mut platform = FileSystemPlatform::new(&args.content_root);
    if let Some(ref site_id) = args.site_id {
        platform = platform.with_site_id(site_id);
    }

    let telemetry = TracingTelemetry;
    let pipeline = TransformationPipeline::new(&platform, &mappings, &tables, &bus)
        .with_telemetry(&telemetry)
        .with_containers(&config.source_container, &config.target_container)
        .with_default_properties(config.mapping_properties.clone());

    let pages = if args.pages.is_empty() {
        pipeline.source_pages(args.prefix.as_deref())?
    } else {
        args.pages.clone()
    };
    let overrides: MappingProperties = args.properties.iter().cloned().collect();
    let requests = build_requests(pages, &config, &overrides);

    let report = pipeline.run_batch(&requests);
    bus.flush();

    let rendered = TransformationReporter::new()
        .with_format(config.report.format)
        .format_report(&report)?;
    match config.report.path {
        Some(ref path) => {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut file| file.write_all(rendered.as_bytes()))
                .map_err(|source| RunError::Write {
                    path: path.clone(),
                    source,
                })?;
            println!("\n=== Transformation Complete ===");
            println!("  ✓ Report: {}", path.display());
        }
        None => println!("{}", rendered),
    }

    Ok(report)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.log_json);

    match run(args).await {
        Ok(report) if report.summary.failed == 0 => {}
        Ok(report) => {
            eprintln!("\n❌ {} page(s) failed", report.summary.failed);
            process::exit(2);
        }
        Err(e) => {
            eprintln!("\n❌ Error: {}", e);
            process::exit(1);
        }
    }
}
