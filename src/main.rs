use anyhow::Result;
use clap::Parser;
use crossbeam_channel::{unbounded, Sender};
use env_logger::Env;
use log::{debug, error, info};
use std::path::PathBuf;
use std::sync::Arc;

use framepump::{ChannelRenderTarget, Config, PlaybackCallback, PlaybackSessionBuilder};

/// framepump - headless video playback driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Media file to play
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Seek to this position (seconds) before playing
    #[arg(short, long, value_name = "SECONDS")]
    seek: Option<f64>,

    /// Stop after this many frames (0 = play to end)
    #[arg(short = 'n', long, default_value = "0")]
    frames: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// Lifecycle events forwarded from the engine threads to main
enum PlayerEvent {
    Prepared,
    Frame(i64),
    Finished,
}

/// Callback sink that forwards every notification over a channel
struct ChannelCallback {
    events: Sender<PlayerEvent>,
}

impl PlaybackCallback for ChannelCallback {
    fn on_prepared(&self) {
        let _ = self.events.send(PlayerEvent::Prepared);
    }

    fn on_frame_available(&self, presentation_time_us: i64) -> bool {
        let _ = self.events.send(PlayerEvent::Frame(presentation_time_us));
        // Let the engine pace the frame
        false
    }

    fn on_finished(&self) {
        let _ = self.events.send(PlayerEvent::Finished);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load();

    let log_level = if args.debug {
        "debug".to_string()
    } else {
        config.general.log_level.clone()
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("Starting framepump v{}", env!("CARGO_PKG_VERSION"));

    if !args.file.exists() {
        error!("File not found: {:?}", args.file);
        return Err(anyhow::anyhow!("File not found"));
    }

    let (event_tx, event_rx) = unbounded();
    let (frame_tx, frame_rx) = unbounded();
    let session = PlaybackSessionBuilder::new(
        Arc::new(ChannelRenderTarget::new(frame_tx)),
        Arc::new(ChannelCallback { events: event_tx }),
    )
    .with_config(config.playback.clone())
    .build()?;

    session.prepare(&args.file);

    let mut rendered: u64 = 0;
    for event in event_rx.iter() {
        match event {
            PlayerEvent::Prepared => {
                info!(
                    "Prepared: {}x{}, {:.3}s, {} bps, {} deg",
                    session.width(),
                    session.height(),
                    session.duration_us() as f64 / 1_000_000.0,
                    session.bitrate(),
                    session.rotation().degrees()
                );
                if let Some(seconds) = args.seek {
                    session.seek((seconds * 1_000_000.0) as i64);
                }
                session.play();
            }
            PlayerEvent::Frame(pts) => {
                rendered += 1;
                while let Ok(frame) = frame_rx.try_recv() {
                    debug!(
                        "rendered {}x{} frame at {} us ({} bytes)",
                        frame.width,
                        frame.height,
                        frame.pts,
                        frame.byte_size()
                    );
                }
                debug!("frame {} available at {} us", rendered, pts);
                if args.frames > 0 && rendered >= args.frames {
                    info!("Frame limit reached, stopping");
                    session.stop();
                }
            }
            PlayerEvent::Finished => {
                break;
            }
        }
    }

    info!("Rendered {} frames", rendered);
    session.release();
    Ok(())
}
