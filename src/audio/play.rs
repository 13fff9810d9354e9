//! Audio playback via `ffplay`.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::time::sleep;
use tracing::{info, warn};

use super::ensure_tool;
use crate::errors::{SpeechError, SpeechResult};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Plays a raw PCM file (s16le) at `sample_rate` and waits for playback
/// to finish.
///
/// The file may still be growing while it plays; `ffplay` reads to the
/// current end.
pub async fn play_audio(path: impl AsRef<Path>, sample_rate: u32) -> SpeechResult<()> {
    let path = path.as_ref();
    if !tokio::fs::try_exists(path).await? {
        return Err(SpeechError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("audio file not found: {}", path.display()),
        )));
    }
    ensure_tool("ffplay", "-version").await?;

    info!(path = %path.display(), "playing");
    let status = Command::new("ffplay")
        .args(["-nodisp", "-autoexit", "-loglevel", "quiet"])
        .args(["-ar", &sample_rate.to_string(), "-f", "s16le"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if !status.success() {
        warn!(?status, "playback exited abnormally");
    }
    Ok(())
}

/// Waits until `path` holds more than `min_bytes`, polling every 500 ms.
///
/// Returns `true` once the threshold is reached, `false` if `max_wait`
/// elapses first. This is the playback watcher: synthesis appends to the
/// file concurrently, and playback starts as soon as there is enough
/// audio to be worth hearing.
pub async fn wait_for_audio(path: impl AsRef<Path>, min_bytes: u64, max_wait: Duration) -> bool {
    let path = path.as_ref();
    let started = Instant::now();
    while started.elapsed() < max_wait {
        if let Ok(metadata) = tokio::fs::metadata(path).await
            && metadata.len() > min_bytes
        {
            info!(path = %path.display(), bytes = metadata.len(), "audio ready for playback");
            return true;
        }
        sleep(POLL_INTERVAL).await;
    }
    warn!(path = %path.display(), "gave up waiting for audio");
    false
}
