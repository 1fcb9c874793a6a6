use std::time::Duration;

use tracing::info;

use luquito_common::models::EncodeStats;

/// Receives the once-per-tick progress report while a playback is streaming.
pub trait ProgressSink: Send + Sync {
    fn report(&self, position: Duration, stats: &EncodeStats);
}

/// Default sink: one `info!` line per tick under the `luquito::progress` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn report(&self, position: Duration, stats: &EncodeStats) {
        info!(target: "luquito::progress", "{}", format_progress_line(position, stats));
    }
}

pub fn format_progress_line(position: Duration, stats: &EncodeStats) -> String {
    format!(
        "Playback: {:>10}, Transcode Stats: Time: {:>8}, Size: {:>5}kB, Bitrate: {:>6.2}kB/s, Speed: {:>5.1}x",
        format_secs(position),
        format_secs(stats.duration),
        stats.size_kb(),
        stats.bitrate_kbs,
        stats.speed,
    )
}

fn format_secs(d: Duration) -> String {
    format!("{:.2}s", d.as_secs_f64())
}
