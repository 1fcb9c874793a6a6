//! src/audio/ffmpeg.rs
//!
//! `AudioEncoder` backed by an `ffmpeg` child process. ffmpeg decodes the file,
//! reads it at native speed (`-re`) and writes interleaved f32 PCM to stdout;
//! progress records (`key=value` lines) arrive on stderr.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use luquito_common::error::EncodeError;
use luquito_common::models::{EncodeOptions, EncodeStats};

use crate::audio::encoder::{check_framing, AudioEncoder, EncoderSession, FrameSink};
use crate::Error;

/// Stderr lines kept for the error message when ffmpeg fails.
const MAX_DIAGNOSTIC_LINES: usize = 8;

pub struct FfmpegEncoder {
    ffmpeg_path: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    fn command(&self, file: &Path, options: &EncodeOptions) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-hide_banner")
            .arg("-nostdin")
            .args(["-loglevel", "error"])
            .arg("-re")
            .arg("-i")
            .arg(file)
            .args(["-map", "0:a:0", "-vn"])
            .args(["-f", "f32le"])
            .args(["-ar", &options.sample_rate.to_string()])
            .args(["-ac", &options.channels.to_string()])
            .args(["-progress", "pipe:2"])
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl AudioEncoder for FfmpegEncoder {
    async fn open(&self, file: &Path, options: &EncodeOptions) -> Result<EncoderSession, Error> {
        check_framing(options)?;
        let meta = tokio::fs::metadata(file)
            .await
            .map_err(|e| EncodeError::OpenFailed(format!("{}: {e}", file.display())))?;
        if !meta.is_file() {
            return Err(EncodeError::OpenFailed(format!("{} is not a file", file.display())).into());
        }

        let mut child = self
            .command(file, options)
            .spawn()
            .map_err(|e| EncodeError::OpenFailed(format!("could not start {}: {e}", self.ffmpeg_path.display())))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EncodeError::OpenFailed("ffmpeg stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EncodeError::OpenFailed("ffmpeg stderr not captured".into()))?;

        info!("Encoding '{}' at {} kbps", file.display(), options.bitrate_kbps);

        let frame_bytes = options.frame_bytes();
        let (ready_tx, ready_rx) = oneshot::channel();
        let session = EncoderSession::spawn(options.clone(), move |sink, cancel| {
            run_ffmpeg(child, stdout, stderr, frame_bytes, sink, cancel, ready_tx)
        });

        // Wait for the first frame so undecodable input is reported as an open failure.
        match ready_rx.await {
            Ok(Ok(())) => Ok(session),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EncodeError::OpenFailed("encoder stopped before producing audio".into()).into()),
        }
    }
}

async fn run_ffmpeg(
    mut child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    frame_bytes: usize,
    sink: FrameSink,
    cancel: CancellationToken,
    ready: oneshot::Sender<Result<(), Error>>,
) {
    let sink = std::sync::Arc::new(sink);
    let progress = tokio::spawn(read_progress(stderr, sink.clone()));
    let mut ready = Some(ready);
    let mut reader = BufReader::new(stdout);

    let read_result: Result<(), Error> = loop {
        let mut buf = BytesMut::zeroed(frame_bytes);
        let filled = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            r = read_frame(&mut reader, &mut buf) => r,
        };
        match filled {
            Ok(0) => break Ok(()),
            Ok(n) => {
                if n < frame_bytes {
                    // Short final frame: the zeroed tail is silence.
                    debug!("Padded final frame ({n}/{frame_bytes} bytes)");
                }
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
                if !sink.push(buf.freeze()).await {
                    break Ok(());
                }
            }
            Err(e) => break Err(Error::StreamFault(format!("reading encoder output: {e}"))),
        }
    };

    if cancel.is_cancelled() || sink.is_closed() {
        let _ = child.kill().await;
        progress.abort();
        return;
    }

    let status = child.wait().await;
    let diagnostics = progress.await.unwrap_or_default();
    let failure = match (read_result, status) {
        (Err(e), _) => Some(e.to_string()),
        (Ok(()), Ok(status)) if !status.success() => Some(if diagnostics.is_empty() {
            format!("ffmpeg exited with {status}")
        } else {
            diagnostics.join("; ")
        }),
        (Ok(()), Err(e)) => Some(format!("waiting for ffmpeg: {e}")),
        (Ok(()), Ok(_)) => None,
    };

    match (ready.take(), failure) {
        (Some(tx), Some(reason)) => {
            let _ = tx.send(Err(EncodeError::OpenFailed(reason).into()));
        }
        (Some(tx), None) => {
            let _ = tx.send(Err(EncodeError::OpenFailed("source contains no audio".into()).into()));
        }
        (None, Some(reason)) => {
            warn!("Encoder failed mid-stream: {reason}");
            sink.fail(Error::StreamFault(reason)).await;
        }
        (None, None) => debug!("Encoder reached end of input"),
    }
}

/// Fill `buf` from `reader`, returning how many bytes were read. Less than
/// `buf.len()` means the input ended.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Consume ffmpeg's stderr, folding progress records into the session stats.
/// Returns the last few non-progress lines for diagnostics.
async fn read_progress(stderr: ChildStderr, sink: std::sync::Arc<FrameSink>) -> Vec<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut diagnostics = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut handled = false;
        sink.update_stats(|stats| handled = apply_progress_line(stats, &line));
        if !handled && !line.trim().is_empty() {
            if diagnostics.len() == MAX_DIAGNOSTIC_LINES {
                diagnostics.remove(0);
            }
            diagnostics.push(line.trim().to_string());
        }
    }
    diagnostics
}

fn is_progress_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// Apply one `key=value` line of `-progress` output. Returns false for lines
/// that are not progress records.
pub fn apply_progress_line(stats: &mut EncodeStats, line: &str) -> bool {
    let Some((key, value)) = line.trim().split_once('=') else {
        return false;
    };
    let value = value.trim();
    match key {
        "total_size" => {
            if let Ok(size) = value.parse() {
                stats.size_bytes = size;
            }
        }
        "out_time_us" => {
            if let Ok(us) = value.parse::<i64>() {
                stats.duration = Duration::from_micros(us.max(0) as u64);
            }
        }
        "bitrate" => {
            if let Some(kbits) = value.strip_suffix("kbits/s").and_then(|v| v.trim().parse::<f32>().ok()) {
                stats.bitrate_kbs = kbits / 8.0;
            }
        }
        "speed" => {
            if let Some(speed) = value.strip_suffix('x').and_then(|v| v.trim().parse::<f32>().ok()) {
                stats.speed = speed;
            }
        }
        _ => return is_progress_key(key),
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_records_update_stats() {
        let mut stats = EncodeStats::default();
        for line in [
            "frame=0",
            "total_size=262144",
            "out_time_us=2500000",
            "out_time=00:00:02.500000",
            "bitrate=3072.0kbits/s",
            "speed=1.01x",
            "progress=continue",
        ] {
            assert!(apply_progress_line(&mut stats, line), "{line}");
        }
        assert_eq!(stats.size_kb(), 256);
        assert_eq!(stats.duration, Duration::from_millis(2500));
        assert!((stats.bitrate_kbs - 384.0).abs() < f32::EPSILON);
        assert!((stats.speed - 1.01).abs() < 1e-4);
    }

    #[test]
    fn test_not_available_values_are_ignored() {
        let mut stats = EncodeStats {
            speed: 2.0,
            bitrate_kbs: 10.0,
            ..EncodeStats::default()
        };
        assert!(apply_progress_line(&mut stats, "bitrate=N/A"));
        assert!(apply_progress_line(&mut stats, "speed=N/A"));
        assert!(apply_progress_line(&mut stats, "out_time_us=-9223372036854775807"));
        assert_eq!(stats.speed, 2.0);
        assert_eq!(stats.bitrate_kbs, 10.0);
        assert_eq!(stats.duration, Duration::ZERO);
    }

    #[test]
    fn test_error_lines_are_not_progress() {
        let mut stats = EncodeStats::default();
        assert!(!apply_progress_line(&mut stats, "missing.mp3: No such file or directory"));
        assert!(!apply_progress_line(&mut stats, "Invalid data found when processing input"));
    }

    #[tokio::test]
    async fn test_open_missing_file_fails_before_spawning() {
        let encoder = FfmpegEncoder::new("/nonexistent/ffmpeg");
        let err = encoder
            .open(Path::new("/definitely/missing.mp3"), &EncodeOptions::default())
            .await
            .err()
            .expect("missing file must fail");
        assert!(matches!(err, Error::Encode(EncodeError::OpenFailed(_))));
    }

    #[tokio::test]
    async fn test_open_rejects_unframeable_options() {
        let source = tempfile::NamedTempFile::new().unwrap();
        let options = EncodeOptions {
            raw_output_framing: false,
            frame_duration: Duration::from_millis(200),
            ..EncodeOptions::default()
        };
        match FfmpegEncoder::default().open(source.path(), &options).await {
            Err(Error::Encode(EncodeError::OpenFailed(msg))) => assert!(msg.contains("length prefix"), "{msg}"),
            other => panic!("expected open failure, got {:?}", other.err()),
        }
    }

    #[cfg(unix)]
    mod fake_ffmpeg {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        use tempfile::TempDir;

        /// A directory holding an input file and an executable standing in for ffmpeg.
        struct Fixture {
            dir: TempDir,
        }

        impl Fixture {
            fn new(script: &str) -> Self {
                let dir = tempfile::tempdir().unwrap();
                let bin = dir.path().join("ffmpeg");
                std::fs::write(&bin, format!("#!/bin/sh\n{script}\n")).unwrap();
                std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
                std::fs::write(dir.path().join("input.mp3"), b"not really audio").unwrap();
                Self { dir }
            }

            async fn open(&self) -> Result<EncoderSession, Error> {
                FfmpegEncoder::new(self.dir.path().join("ffmpeg"))
                    .open(&self.dir.path().join("input.mp3"), &EncodeOptions::default())
                    .await
            }
        }

        #[tokio::test]
        async fn test_exit_before_first_frame_is_open_failure() {
            let fixture = Fixture::new("echo 'input.mp3: Invalid data found when processing input' >&2\nexit 1");

            match fixture.open().await {
                Err(Error::Encode(EncodeError::OpenFailed(msg))) => {
                    assert!(msg.contains("Invalid data found"), "{msg}")
                }
                other => panic!("expected open failure, got {:?}", other.err()),
            }
        }

        #[tokio::test]
        async fn test_failure_after_frames_is_stream_fault() {
            let fixture = Fixture::new("head -c 15360 /dev/zero\necho 'boom decode error' >&2\nexit 1");

            let mut session = fixture.open().await.unwrap();
            let mut frames = session.take_frames().unwrap();
            assert_eq!(frames.next_frame().await.unwrap().unwrap().len(), 7680);
            assert_eq!(frames.next_frame().await.unwrap().unwrap().len(), 7680);
            match frames.next_frame().await {
                Some(Err(Error::StreamFault(msg))) => assert!(msg.contains("boom decode error"), "{msg}"),
                other => panic!("expected stream fault, got {other:?}"),
            }
            assert!(frames.next_frame().await.is_none());
        }

        #[tokio::test]
        async fn test_clean_exit_is_end_of_stream() {
            let fixture = Fixture::new(
                "head -c 15360 /dev/zero\necho 'total_size=15360' >&2\necho 'progress=end' >&2\nexit 0",
            );

            let mut session = fixture.open().await.unwrap();
            let mut frames = session.take_frames().unwrap();
            assert!(frames.next_frame().await.unwrap().is_ok());
            assert!(frames.next_frame().await.unwrap().is_ok());
            assert!(frames.next_frame().await.is_none());
            assert_eq!(session.stats().size_bytes, 15360);
        }
    }

    #[tokio::test]
    async fn test_read_frame_reports_short_tail() {
        let data = [7u8; 10];
        let mut reader: &[u8] = &data;
        let mut buf = [0u8; 6];
        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), 6);
        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), 4);
        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), 0);
    }
}
