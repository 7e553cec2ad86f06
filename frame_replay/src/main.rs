mod report;
mod source;

use anyhow::Context;
use chrono::{Local, NaiveDateTime};
use clap::Parser;
use motion_sentry::{DirectoryStore, Monitor, MonitorConfig, SettingsStore};
use report::JsonReportNotifier;
use source::{DirectoryFrameSource, ReplayTiming};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Replay a directory of still frames through the motion monitor.
#[derive(Debug, Parser)]
#[command(name = "frame_replay", version)]
struct Args {
    /// Directory of frames (png, jpg, jpeg, bmp), played in file name order.
    input_dir: PathBuf,
    /// Where captures and alert reports are written.
    output_dir: PathBuf,
    /// Monitor configuration (JSON). Missing fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Dashboard settings payload (JSON) applied on top of the configuration.
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Frame rate used to timestamp the replayed frames.
    #[arg(long, default_value_t = 1.0)]
    fps: f64,
    /// Decode and process frames as fast as possible instead of in real time.
    #[arg(long, default_value_t = false)]
    no_pacing: bool,
    /// Timestamp of the first frame, "YYYY-MM-DD HH:MM:SS". Defaults to now.
    #[arg(long, value_parser = parse_start)]
    start: Option<NaiveDateTime>,
    /// Passes over the input directory; 0 loops until interrupted.
    #[arg(long, default_value_t = 1)]
    loop_count: u32,
    /// Override `inactivity_timeout_secs`.
    #[arg(long)]
    inactivity_timeout: Option<u64>,
    /// Override `detector.min_area`.
    #[arg(long)]
    min_area: Option<u32>,
    /// Keep persisted captures after their alert has been written.
    #[arg(long, default_value_t = false)]
    keep_captures: bool,
}

fn parse_start(text: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .map_err(|err| format!("{text:?}: {err}"))
}

fn load_config(args: &Args) -> anyhow::Result<MonitorConfig> {
    let mut config = match &args.config {
        Some(path) => MonitorConfig::from_json_file(path)?,
        None => MonitorConfig::default(),
    };
    if let Some(secs) = args.inactivity_timeout {
        config.inactivity_timeout_secs = secs;
    }
    if let Some(min_area) = args.min_area {
        config.detector.min_area = min_area;
    }
    if args.keep_captures {
        config.dispatch.cleanup_after_delivery = false;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Argument Parsing & Setup ---
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(env).init();
    let args = Args::parse();
    let config = load_config(&args)?;

    // --- 2. Collaborators ---
    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .with_context(|| format!("cannot create {}", args.output_dir.display()))?;

    let settings = SettingsStore::new(config.schedule.clone())?;
    if let Some(path) = &args.settings {
        let payload = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        settings.apply_json(&payload)?;
    }
    log::info!("settings: {}", settings.to_json()?);

    let store = Arc::new(DirectoryStore::create(args.output_dir.join("captures"))?);
    let notifier = Arc::new(JsonReportNotifier::new(&args.output_dir));
    let start = args.start.unwrap_or_else(|| Local::now().naive_local());
    let timing = ReplayTiming {
        start,
        fps: args.fps,
        paced: !args.no_pacing,
        loop_count: args.loop_count,
    };
    let mut source = DirectoryFrameSource::open(&args.input_dir, timing)?;

    // --- 3. Monitoring Loop ---
    let mut monitor = Monitor::new(&config, &settings, notifier, store)?;
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received, stopping after the current frame");
            interrupt.cancel();
        }
    });

    let outcome = monitor.run(&mut source, &cancel).await;

    // --- 4. Drain Notifications ---
    let stats = monitor.shutdown().await;
    log::info!(
        "notifications: {} delivered, {} failed, {} dropped, {} files cleaned",
        stats.delivered,
        stats.failed,
        stats.dropped,
        stats.cleaned
    );

    let summary = outcome?;
    log::info!(
        "replay finished: {} frames, {} outside hours, {} bursts completed, {} abandoned",
        summary.ticks,
        summary.gated_ticks,
        summary.bursts_completed,
        summary.bursts_abandoned
    );
    Ok(())
}
