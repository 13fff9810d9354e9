use std::path::Path;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::{info, warn};

use voxloop::{
    AssistantConfig, ChatClient, RecognitionSession, RecognizerConfig, SpeechResult,
    SynthesisSession, SynthesizerConfig, audio,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let config = AssistantConfig::from_env()?;

    // 1. Capture a question and recognize it.
    audio::record_audio(&config.capture_path).await?;

    let recognizer =
        RecognitionSession::new(config.credentials.clone(), RecognizerConfig::default());
    let transcript = recognizer.run_file(&config.capture_path).await?;
    info!(%transcript, "recognized");
    if transcript.trim().is_empty() {
        anyhow::bail!("nothing was recognized; try speaking louder or longer");
    }

    // 2. Stream the model's reply.
    let chat = ChatClient::new(config.chat.clone());
    let deltas = chat.stream_reply(&transcript).await?;

    // 3. Synthesize the reply while a playback watcher waits for enough
    //    bytes to start playing; both run to completion together.
    let synthesizer_config = SynthesizerConfig::default();
    let sample_rate = synthesizer_config.sample_rate;
    let session = SynthesisSession::new(config.credentials.clone(), synthesizer_config);

    let (spoken, played) = tokio::join!(
        speak_stream(session, deltas, &config.reply_path),
        watch_and_play(
            &config.reply_path,
            config.playback_threshold,
            config.playback_wait,
            sample_rate,
        ),
    );

    if spoken? {
        info!("reply synthesized cleanly");
    } else {
        warn!("synthesis did not finish cleanly");
    }
    if !played? {
        warn!("playback was skipped");
    }
    Ok(())
}

/// Feeds chat deltas into the synthesis session. The connection is opened
/// lazily on the first delta so an empty reply never dials out.
async fn speak_stream(
    mut session: SynthesisSession,
    mut deltas: mpsc::UnboundedReceiver<String>,
    reply_path: &Path,
) -> SpeechResult<bool> {
    let mut initialized = false;
    while let Some(delta) = deltas.recv().await {
        if delta.trim().is_empty() {
            continue;
        }
        if !initialized {
            session.init(reply_path.to_path_buf()).await?;
            initialized = true;
        }
        session.send(&delta)?;
    }
    if !initialized {
        warn!("the model produced no speakable text");
        return Ok(false);
    }
    session.finish().await
}

/// Waits for the reply file to hold enough audio, then plays it.
async fn watch_and_play(
    reply_path: &Path,
    threshold: u64,
    max_wait: std::time::Duration,
    sample_rate: u32,
) -> SpeechResult<bool> {
    if !audio::wait_for_audio(reply_path, threshold, max_wait).await {
        return Ok(false);
    }
    audio::play_audio(reply_path, sample_rate).await?;
    Ok(true)
}
