//! pipeplot — pipe a numeric stream in, watch it plotted live.
//!
//! Reads line-oriented numbers on stdin, keeps a rolling window, and
//! serves every connected browser a framed binary stream over WebSocket.

use anyhow::Context;
use clap::Parser;
use pipeplot_core::{
    Broadcaster, CsvTee, DisplayOptions, LineReader, Metadata, PipelineConfig, ReadMode, TeeSink,
};
use pipeplot_server::{acquire_listener, open_browser, router, AppState};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "pipeplot",
    version,
    about = "Plot a live numeric stream from stdin in the browser"
)]
struct Cli {
    /// Number of samples retained and replayed to newly attached clients
    #[arg(short = 'n', long, default_value_t = 1_000)]
    window_size: usize,

    /// Field index carrying the x value; -1 generates wall-clock seconds
    #[arg(short = 'x', long, default_value_t = -1, allow_hyphen_values = true)]
    x_index: i64,

    /// Tokenize input as strict quoted CSV instead of relaxed space/tab/comma
    #[arg(long)]
    csv: bool,

    /// Series label; repeat once per column
    #[arg(short = 'c', long = "column", value_name = "LABEL")]
    columns: Vec<String>,

    /// Skip rows whose value count differs from the declared columns
    #[arg(long)]
    expect_exact: bool,

    /// Listen host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Listen port; successive ports are tried on conflict
    #[arg(short, long, default_value_t = 5_274)]
    port: u16,

    /// Longest time a partial batch may wait before being flushed
    #[arg(long, default_value = "50ms", value_parser = humantime::parse_duration)]
    flush_interval: Duration,

    /// Chart title
    #[arg(short, long, default_value = "Pipe Plot")]
    title: String,

    /// X axis label
    #[arg(long, default_value = "")]
    x_label: String,

    /// Y axis label
    #[arg(long, default_value = "")]
    y_label: String,

    /// Fixed lower bound for the y axis
    #[arg(long)]
    y_min: Option<f64>,

    /// Fixed upper bound for the y axis
    #[arg(long)]
    y_max: Option<f64>,

    /// Unit suffix shown on y values
    #[arg(long, default_value = "")]
    y_unit: String,

    /// Chart kind understood by the front-end
    #[arg(long, default_value = "line")]
    chart_kind: String,

    /// Treat parsed x values as timestamps (generated x always is)
    #[arg(long)]
    x_is_timestamp: bool,

    /// Re-zero the x axis at the first received sample
    #[arg(long)]
    relative_start: bool,

    /// Echo every sample to stdout as CSV, for further piping
    #[arg(long)]
    tee: bool,

    /// Open the default browser at the served URL
    #[arg(short, long)]
    open: bool,

    /// Samples a slow client may queue before it is dropped
    #[arg(long, default_value_t = 10_000)]
    queue_bound: usize,
}

impl Cli {
    fn pipeline_config(&self) -> PipelineConfig {
        let x_index = usize::try_from(self.x_index).ok();
        let columns = if self.columns.is_empty() {
            vec!["y".to_owned()]
        } else {
            self.columns.clone()
        };

        PipelineConfig {
            window_size: self.window_size,
            x_index,
            mode: if self.csv {
                ReadMode::Strict
            } else {
                ReadMode::Relaxed
            },
            columns,
            expect_exact: self.expect_exact,
            flush_interval: self.flush_interval,
            queue_bound: self.queue_bound,
            // A generated x axis is wall-clock time by construction.
            x_is_timestamp: self.x_is_timestamp || x_index.is_none(),
            relative_start: self.relative_start,
        }
    }

    fn display_options(&self, config: &PipelineConfig) -> DisplayOptions {
        DisplayOptions {
            title: self.title.clone(),
            columns: config.columns.clone(),
            x_label: self.x_label.clone(),
            y_label: self.y_label.clone(),
            y_min: self.y_min,
            y_max: self.y_max,
            y_unit: self.y_unit.clone(),
            chart_type: self.chart_kind.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr: stdout belongs to the tee channel.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipeplot=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.pipeline_config();
    config.validate().context("invalid configuration")?;
    let metadata = Metadata::new(&config, cli.display_options(&config));

    let reader = LineReader::new(
        BufReader::new(tokio::io::stdin()),
        config.mode,
        config.x_index,
        config.series_count(),
        config.expect_exact,
    );
    let tee = cli
        .tee
        .then(|| Box::new(CsvTee::new(std::io::stdout())) as Box<dyn TeeSink>);

    let broadcaster = Arc::new(Broadcaster::new(&config));
    broadcaster
        .start(reader, tee)
        .context("starting ingest producer")?;

    let state = AppState {
        broadcaster,
        metadata: Arc::new(metadata),
        flush_interval: config.flush_interval,
        batch_capacity: config.capacity(),
    };

    let (listener, addr) = acquire_listener(&cli.host, cli.port)
        .await
        .context("acquiring listen port")?;
    let url = format!("http://{addr}");
    info!(%url, "serving");

    if cli.open {
        open_browser(&url);
    }

    // The server outlives the input: it keeps answering history and
    // terminal state until interrupted.
    let shutdown = shutdown_signal(Arc::clone(&state.broadcaster));
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("serving")?;

    Ok(())
}

/// The first ctrl-c only stops the ingest: connected clients get a clean
/// stream end and the retained history keeps being served. The second
/// ctrl-c (or the first, if the stream has already ended) shuts down.
async fn shutdown_signal(broadcaster: Arc<Broadcaster>) {
    let _ = tokio::signal::ctrl_c().await;
    if broadcaster.terminal_state().is_none() {
        info!("input stopped, still serving; press ctrl-c again to exit");
        broadcaster.interrupt();
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutting down");
}
