use anyhow::Result;
use clap::Parser;
use png2gif::app::BatchOrchestrator;
use png2gif::metrics::PrometheusMetrics;
use png2gif::models::{AttachmentRef, Config};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Command {
    /// Convert still images, GIFs and videos.
    Transform,
    /// Re-host existing GIFs only.
    Archive,
}

#[derive(Debug, Parser)]
#[command(name = "png2gif")]
#[command(about = "Convert media attachments to hosted GIFs")]
struct CliArgs {
    /// Attachment as `<content-type>=<url>`, repeatable.
    #[arg(short, long = "attachment", value_name = "MIME=URL", value_parser = parse_attachment_arg, required = true)]
    attachments: Vec<AttachmentRef>,

    #[arg(short, long, value_enum, default_value_t = Command::Transform)]
    command: Command,

    /// Print the outcome as JSON instead of the chat message.
    #[arg(long)]
    json: bool,

    /// Dump the conversion counters after the batch.
    #[arg(long)]
    metrics: bool,
}

fn parse_attachment_arg(input: &str) -> std::result::Result<AttachmentRef, String> {
    let (mime, url) = input
        .split_once('=')
        .ok_or_else(|| format!("Invalid attachment '{}'. Expected format: MIME=URL", input))?;

    let mime = mime.trim();
    let url = url.trim();
    if mime.is_empty() || !mime.contains('/') {
        return Err(format!("Invalid content type '{}' in '{}'", mime, input));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(format!("Invalid URL '{}'. Expected http(s)", url));
    }

    Ok(AttachmentRef::new(url, mime, 0))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "png2gif=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();
    info!("Starting png2gif with {} attachment(s)", args.attachments.len());

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let registry = prometheus::Registry::new();
    let metrics = Arc::new(PrometheusMetrics::new(&registry)?);

    let orchestrator = match BatchOrchestrator::new(&config, metrics).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!("Failed to initialize pipeline: {}", e);
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight conversions");
            on_signal.cancel();
        }
    });

    let outcome = match args.command {
        Command::Transform => orchestrator.transform(&args.attachments, cancel).await,
        Command::Archive => orchestrator.archive(&args.attachments, cancel).await,
    };

    if outcome.total() == 0 {
        warn!("No attachment matched the {:?} command", args.command);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.render());
    }

    if args.metrics {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        eprintln!("{}", String::from_utf8_lossy(&buffer));
    }

    if !outcome.links.is_empty() || outcome.failed_count == 0 {
        Ok(())
    } else {
        error!("Every attachment failed to process");
        std::process::exit(1);
    }
}
