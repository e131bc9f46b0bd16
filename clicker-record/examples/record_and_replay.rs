use clicker_record::{
    ActionBuffer, CaptureConfig, EventCapture, PlaybackEvent, RepeatCount, ReplayConfig,
    ReplayEngine,
};
use std::path::PathBuf;
use tokio::signal::ctrl_c;
use tokio_stream::StreamExt;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = CaptureConfig {
        record_mouse_moves: false,
        ..CaptureConfig::default()
    };
    debug!("Initializing capture with config: {:?}", config);
    let capture = EventCapture::new(config);
    let buffer = ActionBuffer::new();

    capture.start(buffer.clone())?;
    info!("Recording started. Interact with your desktop, then press Ctrl+C");
    ctrl_c().await?;

    info!("Stopping recording...");
    capture.stop();
    let log = buffer.take();

    let output_path = PathBuf::from("example_recording.clk");
    log.save_to_file(&output_path)?;
    info!("Recording of {} actions saved to {:?}", log.len(), output_path);

    info!("Replaying at double speed...");
    let engine = ReplayEngine::new(ReplayConfig::default());
    let mut events = engine.event_stream();
    engine.play(&log, RepeatCount::ONCE, 2.0)?;

    while let Some(event) = events.next().await {
        match event {
            PlaybackEvent::Progress { current_ms, total_ms } => {
                debug!("Progress {}/{} ms", current_ms, total_ms)
            }
            other => {
                info!("Playback ended: {:?}", other);
                break;
            }
        }
    }
    Ok(())
}
