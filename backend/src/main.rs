use anyhow::Context;
use clap::Parser;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cb_query_analyzer::config::{CommandLineArgs, Config};
use cb_query_analyzer::{AppState, analyze_text, create_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = CommandLineArgs::parse();
    let config = Config::load(&args)?;

    let _log_guard = init_logging(&config);
    tracing::info!("cb-query-analyzer starting up");
    tracing::info!("Configuration loaded successfully");

    if let Some(requests) = &args.requests {
        return run_offline(&config, &args, requests);
    }

    serve(config).await
}

/// Console logging plus an optional daily rolling file
fn init_logging(config: &Config) -> Option<WorkerGuard> {
    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("cb-query-analyzer.log");
        // rolling appender adds the date suffix
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
        Some(guard)
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
        None
    }
}

/// Analyze files from disk and write the snapshot JSON
fn run_offline(config: &Config, args: &CommandLineArgs, requests: &Path) -> anyhow::Result<()> {
    let read = |path: &Path| {
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
    };

    let requests_text = read(requests)?;
    let indexes_text = args.indexes.as_deref().map(read).transpose()?;
    let schema_text = args.schema.as_deref().map(read).transpose()?;

    tracing::info!("Offline analysis of {}", requests.display());
    let session = analyze_text(
        &requests_text,
        indexes_text.as_deref(),
        schema_text.as_deref(),
        &config.analysis,
    )
    .with_context(|| format!("Analysis of {} failed", requests.display()))?;

    let snapshot = serde_json::to_string_pretty(&session)?;
    match &args.output {
        Some(output) => {
            fs::write(output, snapshot)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            tracing::info!("Snapshot written to {}", output.display());
        },
        None => println!("{}", snapshot),
    }

    for insight in &session.insights.insights {
        tracing::info!(
            "[{:?}] {} ({} affected)",
            insight.severity,
            insight.title,
            insight.affected_count
        );
    }
    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let sweep_interval = Duration::from_secs((config.sessions.ttl_secs / 4).clamp(1, 300));

    let app_state = Arc::new(AppState::new(config));
    let _expiry_task = app_state.session_store.start_expiry_task(sweep_interval);
    tracing::info!(
        "Query service default: {} (timeout {}s)",
        app_state.config.cluster.query_url,
        app_state.config.cluster.timeout_secs
    );

    let app = create_router(Arc::clone(&app_state));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("cb-query-analyzer is ready to serve requests");

    axum::serve(listener, app).await?;

    Ok(())
}
