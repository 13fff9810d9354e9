//! Audio capture and playback through external processes.
//!
//! The core sessions only ever see files of raw PCM; `sox` records them
//! and `ffplay` plays them, exactly as the surrounding shell tooling
//! would. Playback is allowed to start while the synthesis session is
//! still appending to the file.

mod play;
mod record;

pub use play::{play_audio, wait_for_audio};
pub use record::record_audio;

use std::process::Stdio;

use tokio::process::Command;

use crate::errors::{SpeechError, SpeechResult};

/// Probes that `tool` is on the PATH before relying on it.
pub(crate) async fn ensure_tool(tool: &str, probe_arg: &str) -> SpeechResult<()> {
    let status = Command::new(tool)
        .arg(probe_arg)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(_) => Ok(()),
        Err(_) => Err(SpeechError::Configuration(format!(
            "`{tool}` was not found on PATH; install it to use audio capture/playback"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_tool_missing_binary() {
        let result = ensure_tool("voxloop-definitely-not-a-real-binary", "--version").await;
        assert!(matches!(result, Err(SpeechError::Configuration(_))));
    }
}
