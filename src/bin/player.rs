//! Mixer Player
//!
//! Mixes the given media files and plays them on a local output device, or
//! streams them to a remote voice server described by a session file.
//!
//! ```text
//! mixer-player [--config FILE] [--remote SESSION.json] [--volume V] [--loop] FILE...
//! mixer-player --list-devices
//! ```

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_file_mixer::{
    audio::{list_output_devices, LocalOutput, PlaybackSink},
    config::{AppConfig, OutputMode},
    mixer::MixingEngine,
    network::{RemoteVoiceTransport, VoiceSession},
};

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    session: Option<PathBuf>,
    volume: Option<f32>,
    looping: bool,
    list_devices: bool,
    files: Vec<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => args.config = Some(iter.next().context("--config needs a path")?.into()),
            "--remote" => args.session = Some(iter.next().context("--remote needs a session file")?.into()),
            "--volume" => {
                let value = iter.next().context("--volume needs a value")?;
                args.volume = Some(value.parse().with_context(|| format!("invalid volume {:?}", value))?);
            }
            "--loop" => args.looping = true,
            "--list-devices" => args.list_devices = true,
            flag if flag.starts_with("--") => bail!("unknown option {}", flag),
            file => args.files.push(file.into()),
        }
    }

    Ok(args)
}

fn print_devices() {
    println!("\n=== Output Devices ===");
    for device in list_output_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        let rate_marker = if device.supports_mixer_rate() { "" } else { " (no 48kHz support)" };
        println!("  {}{}{}", device.name, default_marker, rate_marker);
        println!("    Channels at 48kHz: {:?}", device.channels);
    }
    println!();
}

/// Connect to the voice server, run discovery and return the transport
fn remote_sink(session_path: &Path, config: &AppConfig) -> Result<Box<dyn PlaybackSink>> {
    let text = std::fs::read_to_string(session_path)
        .with_context(|| format!("reading session {}", session_path.display()))?;
    let session = Arc::new(VoiceSession::from_json(&text)?);

    let transport = RemoteVoiceTransport::connect(session.clone(), config)?;
    let endpoint = transport
        .discover_local_address(Duration::from_millis(config.network.discovery_timeout_ms))
        .context("address discovery")?;
    tracing::info!("External endpoint: {} (report to signaling)", endpoint);

    if !session.has_secret_key() {
        bail!("session {} has no secret_key", session_path.display());
    }

    Ok(Box::new(transport))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;
    if args.list_devices {
        print_devices();
        return Ok(());
    }
    if args.files.is_empty() {
        bail!("no files given (usage: mixer-player [--remote SESSION.json] [--loop] FILE...)");
    }

    let config = AppConfig::load(args.config.as_deref())?;

    let sink: Box<dyn PlaybackSink> = match (&args.session, config.output.mode) {
        (Some(session), _) => remote_sink(session, &config)?,
        (None, OutputMode::Remote) => bail!("remote output needs --remote SESSION.json"),
        (None, OutputMode::Local) => {
            Box::new(LocalOutput::new(&config.output, config.mixer.handoff_frames))
        }
    };
    tracing::info!("Output: {}", sink.name());

    let (engine, handle) = MixingEngine::new(sink);
    let engine_thread = engine.spawn()?;

    let volume = args.volume.unwrap_or(config.mixer.default_volume);
    for file in &args.files {
        match handle.play(file, volume, args.looping) {
            Ok(()) => tracing::info!("Playing {}", file.display()),
            Err(e) => tracing::warn!("Skipping {}: {}", file.display(), e),
        }
    }

    tracing::info!("Press Ctrl+C to stop");
    let mut poll = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            _ = poll.tick() => {
                if handle.tracks()?.is_empty() {
                    tracing::info!("All tracks finished");
                    break;
                }
            }
        }
    }

    handle.shutdown();
    if engine_thread.join().is_err() {
        bail!("mixing thread panicked");
    }

    Ok(())
}
