use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use luquito_common::models::{EncodeOptions, StopOutcome};
use luquito_core::audio::FfmpegEncoder;
use luquito_core::config::AudioLibrary;
use luquito_core::platforms::discord::DiscordPlatform;

#[derive(Parser, Debug, Clone)]
#[command(name = "luquito")]
#[command(author, version, about = "Luquito - plays short sounds into Discord voice channels")]
struct Args {
    /// Bot token.
    #[arg(long, env = "LUQUITO_BOT", hide_env_values = true)]
    token: Option<String>,

    /// Keyword configuration: whitespace-separated `keyword path` pairs.
    #[arg(long, default_value = "audio-config.txt")]
    audio_config: PathBuf,

    /// ffmpeg binary used to transcode sounds.
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// Target voice bitrate in kbps.
    #[arg(long, default_value_t = 120)]
    bitrate: u32,
}

fn init_tracing() {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("log bridge already installed: {e}");
    }
    let filter = EnvFilter::from_default_env()
        .add_directive("luquito=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(sub)
        .expect("Failed to set global subscriber");
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Could not listen for SIGTERM: {e}"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Could not listen for Ctrl-C: {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let Some(token) = args.token.clone().filter(|t| !t.trim().is_empty()) else {
        error!("No token found");
        anyhow::bail!("no bot token configured; set LUQUITO_BOT or pass --token");
    };

    let library = match AudioLibrary::load(&args.audio_config).await {
        Ok(library) => library,
        Err(e) => {
            warn!("Could not load {}: {e}. Starting with no sounds.", args.audio_config.display());
            AudioLibrary::default()
        }
    };
    info!("Luquito starting with {} sound keywords", library.len());
    if library.is_empty() {
        warn!("No sound keywords configured; !audio will ignore every request");
    } else {
        debug!("Sound keywords: {}", library.keywords().join(", "));
    }

    let options = EncodeOptions {
        bitrate_kbps: args.bitrate,
        ..EncodeOptions::default()
    };
    let mut platform = DiscordPlatform::new(
        token,
        Arc::new(library),
        Arc::new(FfmpegEncoder::new(args.ffmpeg.clone())),
    )
    .with_options(options);

    platform
        .connect()
        .await
        .context("connecting to Discord")?;
    info!("Bot is now running. Press CTRL-C to exit.");

    shutdown_signal().await;

    if let Some(supervisor) = platform.supervisor() {
        let active = supervisor.active();
        if active.request_stop() == StopOutcome::Delivered {
            info!("Stopping the active playback");
            let drained = tokio::time::timeout(Duration::from_secs(3), async {
                while active.is_active() {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            })
            .await;
            if drained.is_err() {
                warn!("Playback did not close in time");
            }
        }
    }
    info!("Closing...");
    platform
        .disconnect()
        .await
        .context("disconnecting from Discord")?;
    Ok(())
}
