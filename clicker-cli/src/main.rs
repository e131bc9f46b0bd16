use std::{
    collections::BTreeMap,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::NaiveTime;
use clap::{Args, Parser, Subcommand};
use clicker_record::{
    ActionBuffer, ActionKind, ActionLog, CaptureConfig, EventCapture, KeyIdentifier,
    PlaybackEvent, RepeatCount, ReplayConfig, ReplayEngine, Schedule, ScheduleDriver,
    ScheduleOutcome,
};
use tokio::signal::ctrl_c;
use tokio_stream::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Record(args) => record(args).await,
        Commands::Play(args) => play(args).await,
        Commands::Inspect { file } => inspect(&file),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Record desktop input and play it back", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record mouse and keyboard input until Ctrl+C.
    Record(RecordArgs),
    /// Play a recording back, optionally repeated or scheduled.
    Play(PlayArgs),
    /// Summarize a recording.
    Inspect {
        /// Recording to inspect.
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RecordArgs {
    /// Where to save the recording. `.clk` is appended when no extension is given.
    #[arg(short, long, default_value = "recording.clk")]
    output: PathBuf,

    /// Stop automatically after this many seconds.
    #[arg(short, long, value_parser = parse_positive)]
    duration: Option<f64>,

    /// Do not record pointer moves; clicks and scrolls still carry their position.
    #[arg(long)]
    no_moves: bool,
}

#[derive(Args, Debug)]
struct PlayArgs {
    /// Recording to play.
    file: PathBuf,

    /// Number of times to play the recording (or scheduled runs with --every).
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    repeat: u32,

    /// Repeat until Ctrl+C.
    #[arg(long, conflicts_with = "repeat")]
    infinite: bool,

    /// Playback speed factor; 2.0 plays twice as fast.
    #[arg(short, long, default_value_t = 1.0, value_parser = parse_positive)]
    speed: f64,

    /// Play one cycle every SECS seconds.
    #[arg(long, value_name = "SECS", value_parser = parse_positive, conflicts_with = "at")]
    every: Option<f64>,

    /// Play at the next occurrence of HH:MM local time.
    #[arg(long, value_name = "HH:MM", value_parser = parse_time)]
    at: Option<NaiveTime>,
}

fn parse_positive(raw: &str) -> std::result::Result<f64, String> {
    let value: f64 = raw.parse().map_err(|e| format!("{e}"))?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(format!("expected a positive number, got {raw}"))
    }
}

fn seconds(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).with_context(|| format!("{secs} seconds is out of range"))
}

fn parse_time(raw: &str) -> std::result::Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|e| format!("expected HH:MM, got {raw}: {e}"))
}

async fn record(args: RecordArgs) -> Result<()> {
    let mut output = args.output;
    if output.extension().is_none() {
        output.set_extension("clk");
    }

    let config = CaptureConfig {
        record_mouse_moves: !args.no_moves,
        ..CaptureConfig::default()
    };
    let capture = EventCapture::new(config);
    let buffer = ActionBuffer::new();

    capture
        .start(buffer.clone())
        .context("Failed to start input capture")?;
    info!("Recording started. Press Ctrl+C to stop");

    match args.duration {
        Some(secs) => {
            let limit = seconds(secs)?;
            tokio::select! {
                result = ctrl_c() => result?,
                _ = tokio::time::sleep(limit) => {
                    info!("Recording duration elapsed");
                }
            }
        }
        None => ctrl_c().await?,
    }

    info!("Stopping recording...");
    capture.stop();

    let log = buffer.take();
    log.save_to_file(&output)
        .with_context(|| format!("Failed to save recording to {}", output.display()))?;
    info!(
        actions = log.len(),
        span_secs = log.span(),
        path = %output.display(),
        "Recording saved"
    );
    Ok(())
}

async fn play(args: PlayArgs) -> Result<()> {
    let log = ActionLog::load_from_file(&args.file)
        .with_context(|| format!("Failed to load recording {}", args.file.display()))?;

    let count = if args.infinite {
        RepeatCount::Infinite
    } else {
        RepeatCount::finite(args.repeat)?
    };
    let (schedule, repeat) = match (args.every, args.at) {
        (Some(secs), _) => (
            Schedule::Every {
                interval: seconds(secs)?,
                runs: count,
            },
            RepeatCount::ONCE,
        ),
        (None, Some(time)) => (Schedule::At { time }, count),
        (None, None) => (Schedule::Once, count),
    };

    let engine = Arc::new(ReplayEngine::new(ReplayConfig::default()));
    let mut events = engine.event_stream();
    let reporter = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            report(&event);
        }
    });

    let driver = ScheduleDriver::new(engine);
    let mut handle = driver.start(schedule, log, repeat, args.speed)?;
    info!("Playback scheduled. Press Ctrl+C to cancel");

    let finished = tokio::select! {
        outcome = handle.wait() => Some(outcome),
        _ = ctrl_c() => None,
    };
    let outcome = match finished {
        Some(outcome) => outcome,
        None => {
            info!("Cancelling playback...");
            handle.cancel();
            handle.wait().await
        }
    };
    reporter.abort();
    eprintln!();

    match outcome? {
        ScheduleOutcome::Completed => info!("Playback complete"),
        ScheduleOutcome::Cancelled => info!("Playback cancelled"),
    }
    Ok(())
}

fn report(event: &PlaybackEvent) {
    if let PlaybackEvent::Progress {
        current_ms,
        total_ms,
    } = event
    {
        let mut stderr = std::io::stderr();
        let _ = write!(
            stderr,
            "\r{:>8.1}s / {:.1}s",
            *current_ms as f64 / 1000.0,
            *total_ms as f64 / 1000.0
        );
        let _ = stderr.flush();
    }
}

fn inspect(file: &Path) -> Result<()> {
    let log = ActionLog::load_from_file(file)
        .with_context(|| format!("Failed to load recording {}", file.display()))?;

    let mut kinds: BTreeMap<&str, usize> = BTreeMap::new();
    let mut unplayable = 0;
    for action in &log {
        *kinds.entry(action.kind.label()).or_default() += 1;
        if let ActionKind::KeyPress { key } | ActionKind::KeyRelease { key } = &action.kind {
            if matches!(key, KeyIdentifier::Unrecognized(_) | KeyIdentifier::Missing) {
                unplayable += 1;
            }
        }
    }

    println!("{}", file.display());
    println!("  actions       {}", log.len());
    println!("  span          {:.3}s", log.span());
    for (kind, count) in &kinds {
        println!("  {:<13} {}", kind, count);
    }
    if unplayable > 0 {
        println!("  unknown keys  {} (skipped on playback)", unplayable);
    }
    Ok(())
}
