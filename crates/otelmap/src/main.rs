mod api;
mod client;
mod events;
mod output;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use otelmap_core::config::Config;
use otelmap_core::filter::TimeWindow;
use otelmap_core::model::span::SpanRecord;
use otelmap_core::time::parse_time_or_relative;
use otelmap_engine::{MapOptions, map_session};
use otelmap_ingest::{PipelineConfig, SessionTagging};

use crate::api::ApiState;
use crate::client::ApiClient;
use crate::output::{print_json, print_map_human, print_session_human, print_status_human};
use crate::telemetry::{init_cli_tracing, init_run_tracing, shutdown_tracing};

const RETENTION_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "otelmap")]
#[command(about = "Build service maps from session-scoped OpenTelemetry traces")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true, help = "API address of a running `otelmap run`")]
    addr: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run OTLP ingest and the service map API")]
    Run {
        #[arg(long)]
        db_path: Option<PathBuf>,
        #[arg(long)]
        otlp_grpc_addr: Option<String>,
        #[arg(long)]
        otlp_http_addr: Option<String>,
        #[arg(long)]
        api_addr: Option<String>,
    },
    #[command(about = "Issue a new session token")]
    Session,
    #[command(about = "Compute a service map for a session or a span file")]
    Map {
        #[arg(long, conflicts_with = "spans", required_unless_present = "spans")]
        session: Option<String>,
        #[arg(long, help = "JSON array of span records, mapped offline")]
        spans: Option<PathBuf>,
        #[arg(long, help = "RFC3339 time or relative duration (e.g. 15m)")]
        since: Option<String>,
        #[arg(long, help = "RFC3339 time or relative duration (e.g. 1m)")]
        until: Option<String>,
        #[arg(long, help = "Print request flow trees")]
        flows: bool,
        #[arg(long, help = "Give client-only services a node (offline only)")]
        include_client_only: bool,
    },
    #[command(about = "Show store status")]
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            db_path,
            otlp_grpc_addr,
            otlp_http_addr,
            api_addr,
        } => {
            let mut cfg = Config::load().context("load config")?;
            if let Some(v) = db_path {
                cfg.db_path = v;
            }
            if let Some(v) = otlp_grpc_addr {
                cfg.otlp_grpc_addr = v;
            }
            if let Some(v) = otlp_http_addr {
                cfg.otlp_http_addr = v;
            }
            if let Some(v) = api_addr.or(cli.addr) {
                cfg.api_addr = v;
            }
            run_server(cfg).await
        }
        Commands::Session => {
            init_cli_tracing();
            let client = ApiClient::new(&api_addr(cli.addr)?);
            let resp = client.create_session().await?;
            if cli.json {
                print_json(&resp)
            } else {
                print_session_human(&resp);
                Ok(())
            }
        }
        Commands::Map {
            session,
            spans,
            since,
            until,
            flows,
            include_client_only,
        } => {
            init_cli_tracing();
            let analysis = match (session, spans) {
                (_, Some(path)) => {
                    let window = parse_window(since.as_deref(), until.as_deref())?;
                    map_span_file(&path, &window, include_client_only)?
                }
                (Some(token), None) => {
                    let now = Utc::now();
                    let start = since
                        .map(|v| parse_time_or_relative(&v, now).map(|t| t.to_rfc3339()))
                        .transpose()?;
                    let end = until
                        .map(|v| parse_time_or_relative(&v, now).map(|t| t.to_rfc3339()))
                        .transpose()?;
                    let client = ApiClient::new(&api_addr(cli.addr)?);
                    client.service_map(&token, start, end).await?
                }
                (None, None) => anyhow::bail!("either --session or --spans is required"),
            };
            if cli.json {
                print_json(&analysis)
            } else {
                print_map_human(&analysis, flows);
                Ok(())
            }
        }
        Commands::Status => {
            init_cli_tracing();
            let client = ApiClient::new(&api_addr(cli.addr)?);
            let status = client.status().await?;
            if cli.json {
                print_json(&status)
            } else {
                print_status_human(&status);
                Ok(())
            }
        }
    }
}

async fn run_server(cfg: Config) -> anyhow::Result<()> {
    init_run_tracing();

    let store = otelmap_store::Store::open(&cfg.db_path)
        .context("open span store")?
        .with_session_key(cfg.session_attribute_key.clone());

    eprintln!("otelmap run");
    eprintln!("  db: {}", cfg.db_path.display());
    eprintln!("  ingest grpc: {}", cfg.otlp_grpc_addr);
    eprintln!("  ingest http: {}", cfg.otlp_http_addr);
    eprintln!("  api: http://{}/api/v1", cfg.api_addr);

    let grpc_addr = cfg
        .otlp_grpc_addr
        .parse()
        .with_context(|| format!("parse otlp grpc addr {}", cfg.otlp_grpc_addr))?;
    let http_addr = cfg
        .otlp_http_addr
        .parse()
        .with_context(|| format!("parse otlp http addr {}", cfg.otlp_http_addr))?;
    let api_addr = cfg
        .api_addr
        .parse()
        .with_context(|| format!("parse api addr {}", cfg.api_addr))?;

    let ingest_task = tokio::spawn(otelmap_ingest::run_ingest_servers(
        store.clone(),
        grpc_addr,
        http_addr,
        PipelineConfig {
            channel_capacity: 512,
            flush_interval: Duration::from_millis(cfg.write_flush_ms),
            batch_size: cfg.write_batch_size,
        },
        SessionTagging {
            attribute_key: cfg.session_attribute_key.clone(),
            header: cfg.session_header.clone(),
        },
    ));

    let retention_task = tokio::spawn({
        let store = store.clone();
        let ttl = cfg.retention_ttl;
        async move {
            let mut interval = tokio::time::interval(RETENTION_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(err) = store.run_retention(ttl) {
                    tracing::warn!(error = ?err, "retention task failed");
                }
            }
        }
    });

    let state = ApiState {
        store,
        config: Arc::new(cfg),
    };
    let api_task = tokio::spawn(api::run_api_server(state, api_addr));

    tokio::select! {
        res = ingest_task => {
            res??;
        }
        res = api_task => {
            res??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }

    retention_task.abort();
    shutdown_tracing();
    Ok(())
}

fn api_addr(flag: Option<String>) -> anyhow::Result<String> {
    if let Some(addr) = flag {
        return Ok(addr);
    }
    Ok(Config::load().context("load config")?.api_addr)
}

fn parse_window(since: Option<&str>, until: Option<&str>) -> anyhow::Result<TimeWindow> {
    let now = Utc::now();
    let since = since.map(|v| parse_time_or_relative(v, now)).transpose()?;
    let until = until.map(|v| parse_time_or_relative(v, now)).transpose()?;
    Ok(TimeWindow::new(since, until)?)
}

fn map_span_file(
    path: &Path,
    window: &TimeWindow,
    include_client_only: bool,
) -> anyhow::Result<otelmap_core::model::service_map::MapAnalysis> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read span file {}", path.display()))?;
    let spans: Vec<SpanRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("parse span file {}", path.display()))?;
    let options = MapOptions {
        include_client_only_services: include_client_only,
    };
    Ok(map_session(&spans, "", window, options, Utc::now())?)
}
