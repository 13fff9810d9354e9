//! Microphone capture via `sox`.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use super::ensure_tool;
use crate::errors::SpeechResult;

/// Capture format expected by the recognizer: 16 kHz, 16-bit, mono PCM.
const SAMPLE_RATE: &str = "16000";
const BIT_DEPTH: &str = "16";
const CHANNELS: &str = "1";

/// Recordings shorter than this are probably a slip of the finger.
const MIN_FILE_SIZE: u64 = 1024;

/// Records from the default input device into `output_path` until the
/// user presses Enter.
///
/// Any stale file at the path is removed first so the recognizer never
/// sees leftovers from a previous turn.
pub async fn record_audio(output_path: impl AsRef<Path>) -> SpeechResult<()> {
    let output_path = output_path.as_ref();
    ensure_tool("sox", "--version").await?;

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    if let Err(e) = tokio::fs::remove_file(output_path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        return Err(e.into());
    }

    info!(path = %output_path.display(), "recording; press Enter to stop");

    let mut recorder = Command::new("sox")
        .args([
            "-d",
            "-r",
            SAMPLE_RATE,
            "-b",
            BIT_DEPTH,
            "-c",
            CHANNELS,
            "-e",
            "signed-integer",
        ])
        .arg(output_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    // Block on the user's Enter, then stop the recorder.
    let mut line = String::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    let _ = stdin.read_line(&mut line).await;

    recorder.kill().await?;

    validate_recording(output_path).await
}

async fn validate_recording(path: &Path) -> SpeechResult<()> {
    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() < MIN_FILE_SIZE {
        warn!(
            bytes = metadata.len(),
            "recording is very short; speak for at least a second"
        );
    }
    info!(path = %path.display(), bytes = metadata.len(), "recording complete");
    Ok(())
}
