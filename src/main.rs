use anyhow::Context;
use clap::Parser;
use ddb_to_es::dynamodb::StreamEvent;
use ddb_to_es::elasticsearch::ElasticsearchClient;
use ddb_to_es::{Config, Connector, RecordProcessor};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "ddb-to-es")]
#[command(about = "DynamoDB Streams to Elasticsearch CDC connector", long_about = None)]
struct Args {
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Optional TOML config, overridden by DDB_TO_ES_* variables"
    )]
    config: Option<PathBuf>,

    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "-",
        help = "Stream event JSON, '-' for stdin"
    )]
    event: String,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting ddb-to-es");

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    info!(
        elasticsearch_url = %config.elasticsearch.url,
        index_prefix = %config.index.prefix,
        excluded_paths = ?config.index.excluded_paths,
        concurrency = config.processing.concurrency,
        fail_on_error = config.processing.fail_on_error,
        cutover = config.cutover.is_some(),
        "Configuration summary"
    );

    let client = match ElasticsearchClient::connect(&config.elasticsearch).await {
        Ok(client) => client,
        Err(e) => {
            error!(message = %e, url = %config.elasticsearch.url, "elasticsearch-connect-error");
            std::process::exit(1);
        }
    };

    let processor = RecordProcessor::from_config(&config)?;
    let connector = Connector::new(processor, client, config.processing.clone());

    let event = read_event(&args.event).await?;
    info!(records = event.records.len(), "Event loaded");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown requested, cancelling submission");
            on_signal.cancel();
        }
    });

    connector.handle(event, &cancel).await?;
    info!("Event processed");

    Ok(())
}

async fn read_event(source: &str) -> anyhow::Result<StreamEvent> {
    let bytes = if source == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("Failed to read event from stdin")?;
        buf
    } else {
        tokio::fs::read(source)
            .await
            .with_context(|| format!("Failed to read event file {}", source))?
    };

    Ok(StreamEvent::from_slice(&bytes)?)
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("ddb_to_es=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ddb_to_es=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
