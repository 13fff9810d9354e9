//! Recognition session: streams PCM audio to the recognizer over one
//! WebSocket connection and collects a best-effort transcript.
//!
//! # Architecture
//!
//! One session owns one connection and drives it through
//! `Idle → Connecting → Streaming → Draining → {Completed | Failed}`:
//!
//! - a paced sender task reads the audio source in fixed-size chunks and
//!   emits one frame per pacing interval (the remote protocol expects the
//!   real-time capture rate);
//! - the connection event loop multiplexes outbound frames and inbound
//!   results with `tokio::select!`;
//! - the caller blocks on a bounded poll of the session state and gets the
//!   accumulated transcript, the recorded failure, or a timeout.
//!
//! All state is created per run and dropped with it; two sessions never
//! share queues or flags.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use super::config::RecognizerConfig;
use super::messages::{RecognitionRequest, RecognitionResponse};
use crate::config::Credentials;
use crate::core::auth::build_signed_url;
use crate::core::protocol::{FrameSequencer, FrameStatus, SessionState};
use crate::errors::{SpeechError, SpeechResult};

// =============================================================================
// Transcript accumulator
// =============================================================================

/// Holds the longest transcript candidate seen so far.
///
/// With dynamic correction enabled the service streams revisable partial
/// results; a later candidate replaces the accumulator only when it is
/// strictly longer (character count). This longest-wins merge is the
/// documented compatibility policy for the revision behavior, kept as-is
/// rather than re-derived from protocol semantics.
#[derive(Debug, Default)]
pub struct TranscriptAccumulator {
    best: String,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers a candidate; returns whether it replaced the current best.
    pub fn offer(&mut self, candidate: &str) -> bool {
        if candidate.chars().count() > self.best.chars().count() {
            self.best = candidate.to_string();
            true
        } else {
            false
        }
    }

    pub fn transcript(&self) -> &str {
        &self.best
    }

    pub fn take_transcript(&mut self) -> String {
        std::mem::take(&mut self.best)
    }
}

// =============================================================================
// Recognition session
// =============================================================================

/// One streaming recognition session.
///
/// # Example
///
/// ```rust,no_run
/// use voxloop::{Credentials, RecognitionSession, RecognizerConfig};
///
/// # async fn run() -> voxloop::SpeechResult<()> {
/// let credentials = Credentials::from_env()?;
/// let session = RecognitionSession::new(credentials, RecognizerConfig::default());
/// let transcript = session.run_file("./origin_audio.raw").await?;
/// println!("recognized: {transcript}");
/// # Ok(())
/// # }
/// ```
pub struct RecognitionSession {
    credentials: Credentials,
    config: RecognizerConfig,
    state_tx: watch::Sender<SessionState>,
}

impl RecognitionSession {
    pub fn new(credentials: Credentials, config: RecognizerConfig) -> Self {
        let (state_tx, _state_rx) = watch::channel(SessionState::Idle);
        Self {
            credentials,
            config,
            state_tx,
        }
    }

    /// Observes the session state; useful for diagnostics and tests.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Runs one session over the PCM bytes of `path`.
    pub async fn run_file(self, path: impl AsRef<std::path::Path>) -> SpeechResult<String> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        self.run(file).await
    }

    /// Runs one session over an arbitrary PCM source.
    ///
    /// Blocks until the session completes, fails, or the configured
    /// session timeout elapses; on timeout the connection is force-closed
    /// and [`SpeechError::Timeout`] is returned. Consumes the session:
    /// every run starts from fresh state.
    pub async fn run<R>(self, source: R) -> SpeechResult<String>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        // Signatures are time-bound; build the URL right before connecting.
        let url = build_signed_url(&self.config.endpoint, &self.credentials, Utc::now())?;
        self.state_tx.send_replace(SessionState::Connecting);

        let accumulator = Arc::new(Mutex::new(TranscriptAccumulator::new()));
        let failure: Arc<Mutex<Option<SpeechError>>> = Arc::new(Mutex::new(None));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let mut connection = tokio::spawn(drive_connection(
            url.to_string(),
            self.credentials.app_id.clone(),
            self.config.clone(),
            source,
            accumulator.clone(),
            failure.clone(),
            self.state_tx.clone(),
            shutdown_rx,
        ));

        // Bounded poll until a terminal state or the session budget runs out.
        let started = Instant::now();
        let state_rx = self.state_tx.subscribe();
        loop {
            match *state_rx.borrow() {
                SessionState::Completed => {
                    let transcript = accumulator.lock().take_transcript();
                    info!(chars = transcript.chars().count(), "recognition complete");
                    return Ok(transcript);
                }
                SessionState::Failed => {
                    let recorded = failure.lock().take();
                    return Err(recorded.unwrap_or_else(|| {
                        SpeechError::Transport("recognition failed without a recorded cause".to_string())
                    }));
                }
                _ => {}
            }

            if started.elapsed() >= self.config.session_timeout {
                warn!("recognition session timed out, forcing connection closure");
                let _ = shutdown_tx.send(());
                if tokio::time::timeout(self.config.poll_interval * 10, &mut connection)
                    .await
                    .is_err()
                {
                    connection.abort();
                }
                return Err(SpeechError::Timeout("recognition terminal status"));
            }

            sleep(self.config.poll_interval).await;
        }
    }
}

// =============================================================================
// Connection event loop
// =============================================================================

#[derive(Debug)]
enum Flow {
    Continue,
    Complete,
}

#[allow(clippy::too_many_arguments)]
async fn drive_connection<R>(
    url: String,
    app_id: String,
    config: RecognizerConfig,
    source: R,
    accumulator: Arc<Mutex<TranscriptAccumulator>>,
    failure: Arc<Mutex<Option<SpeechError>>>,
    state_tx: watch::Sender<SessionState>,
    mut shutdown_rx: oneshot::Receiver<()>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (ws_stream, _) = tokio::select! {
        connected = connect_async(url.as_str()) => match connected {
            Ok(connected) => connected,
            Err(e) => {
                record_failure(
                    &failure,
                    &state_tx,
                    SpeechError::Transport(format!("recognizer connection failed: {e}")),
                );
                return;
            }
        },
        _ = &mut shutdown_rx => {
            debug!("recognition session shut down while connecting");
            return;
        }
    };

    info!("connected to recognizer");
    state_tx.send_replace(SessionState::Streaming);

    let (mut ws_sink, mut ws_source) = ws_stream.split();

    // The paced sender owns the audio source and hands finished frames to
    // the event loop; the channel is the only coupling between them.
    let (frame_tx, mut frame_rx) = mpsc::channel::<Message>(8);
    let sender = tokio::spawn(pace_frames(
        source,
        config,
        app_id,
        frame_tx,
        state_tx.clone(),
    ));

    loop {
        tokio::select! {
            Some(frame) = frame_rx.recv() => {
                if let Err(e) = ws_sink.send(frame).await {
                    record_failure(
                        &failure,
                        &state_tx,
                        SpeechError::Transport(format!("failed to send audio frame: {e}")),
                    );
                    break;
                }
            }

            message = ws_source.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        match handle_result_message(&text, &accumulator) {
                            Ok(Flow::Continue) => {}
                            Ok(Flow::Complete) => {
                                state_tx.send_replace(SessionState::Completed);
                                break;
                            }
                            Err(e) => {
                                record_failure(&failure, &state_tx, e);
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "recognizer closed the connection");
                    }
                    Some(Ok(other)) => {
                        debug!(kind = ?other, "ignoring non-text message from recognizer");
                    }
                    Some(Err(e)) => {
                        record_failure(
                            &failure,
                            &state_tx,
                            SpeechError::Transport(format!("websocket error: {e}")),
                        );
                        break;
                    }
                    None => {
                        record_failure(
                            &failure,
                            &state_tx,
                            SpeechError::Transport(
                                "connection ended before a terminal status".to_string(),
                            ),
                        );
                        break;
                    }
                }
            }

            _ = &mut shutdown_rx => {
                debug!("recognition session shutdown requested");
                break;
            }
        }
    }

    sender.abort();
    let _ = ws_sink.close().await;
}

/// Dispatches one inbound message: non-zero codes fail the session, result
/// payloads feed the accumulator, a terminal status completes the session.
fn handle_result_message(
    text: &str,
    accumulator: &Mutex<TranscriptAccumulator>,
) -> SpeechResult<Flow> {
    let response: RecognitionResponse = serde_json::from_str(text)
        .map_err(|e| SpeechError::Transport(format!("malformed recognizer message: {e}")))?;

    if response.header.code != 0 {
        let message = response
            .header
            .message
            .unwrap_or_else(|| "recognition rejected by the service".to_string());
        return Err(SpeechError::Protocol {
            code: response.header.code,
            message,
        });
    }

    if let Some(result) = response.payload.and_then(|p| p.result) {
        let candidate = result.decode_transcript()?;
        let replaced = accumulator.lock().offer(&candidate);
        debug!(candidate = %candidate, replaced, "partial transcript");
    }

    if response.header.status == Some(FrameStatus::Last) {
        return Ok(Flow::Complete);
    }

    Ok(Flow::Continue)
}

/// Reads the source in `frame_size` chunks and emits one frame per pacing
/// interval. An empty read produces the terminal frame with a zero-length
/// payload and moves the session into `Draining`.
async fn pace_frames<R>(
    mut source: R,
    config: RecognizerConfig,
    app_id: String,
    frames: mpsc::Sender<Message>,
    state_tx: watch::Sender<SessionState>,
) where
    R: AsyncRead + Unpin,
{
    let mut sequencer = FrameSequencer::new();
    let mut buf = vec![0u8; config.frame_size];

    loop {
        let n = match source.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "failed to read audio source");
                0
            }
        };

        if n == 0 {
            let (seq, status) = sequencer.last();
            let frame = RecognitionRequest::audio_frame(&app_id, &config, &[], status, seq);
            if let Some(message) = encode_frame(&frame) {
                let _ = frames.send(message).await;
            }
            state_tx.send_replace(SessionState::Draining);
            debug!(frames = seq + 1, "audio source drained");
            return;
        }

        let (seq, status) = sequencer.next();
        let frame = RecognitionRequest::audio_frame(&app_id, &config, &buf[..n], status, seq);
        let Some(message) = encode_frame(&frame) else {
            return;
        };
        if frames.send(message).await.is_err() {
            // Event loop is gone; nothing left to pace.
            return;
        }

        sleep(config.frame_interval).await;
    }
}

fn encode_frame(frame: &RecognitionRequest) -> Option<Message> {
    match serde_json::to_string(frame) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            error!(error = %e, "failed to encode audio frame");
            None
        }
    }
}

fn record_failure(
    failure: &Mutex<Option<SpeechError>>,
    state_tx: &watch::Sender<SessionState>,
    error: SpeechError,
) {
    error!(error = %error, "recognition session failed");
    failure.lock().get_or_insert(error);
    state_tx.send_replace(SessionState::Failed);
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Accumulator
    // =========================================================================

    #[test]
    fn test_accumulator_longest_wins() {
        let mut accumulator = TranscriptAccumulator::new();
        assert!(accumulator.offer("hel"));
        assert!(accumulator.offer("hello"));
        assert!(!accumulator.offer("bye"));
        assert_eq!(accumulator.transcript(), "hello");
    }

    #[test]
    fn test_accumulator_equal_length_keeps_earlier() {
        let mut accumulator = TranscriptAccumulator::new();
        assert!(accumulator.offer("abc"));
        assert!(!accumulator.offer("xyz"));
        assert_eq!(accumulator.transcript(), "abc");
    }

    #[test]
    fn test_accumulator_counts_characters_not_bytes() {
        let mut accumulator = TranscriptAccumulator::new();
        // Four ASCII characters outweigh three CJK characters even though
        // the CJK string is longer in bytes.
        assert!(accumulator.offer("你好吗"));
        assert!(accumulator.offer("okay"));
        assert_eq!(accumulator.transcript(), "okay");
    }

    #[test]
    fn test_accumulator_final_equals_longest_candidate_seen() {
        let candidates = ["h", "he", "hel", "hell", "hel", "hello", "hell"];
        let mut accumulator = TranscriptAccumulator::new();
        for candidate in candidates {
            accumulator.offer(candidate);
        }
        let longest = candidates
            .iter()
            .max_by_key(|c| c.chars().count())
            .unwrap();
        assert_eq!(accumulator.transcript(), *longest);
    }

    #[test]
    fn test_accumulator_take_resets() {
        let mut accumulator = TranscriptAccumulator::new();
        accumulator.offer("hello");
        assert_eq!(accumulator.take_transcript(), "hello");
        assert_eq!(accumulator.transcript(), "");
    }

    // =========================================================================
    // Message dispatch
    // =========================================================================

    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
    use serde_json::json;

    fn result_message(text: &str, status: u8) -> String {
        let document = json!({"ws": [{"cw": [{"w": text}]}]});
        json!({
            "header": {"code": 0, "status": status},
            "payload": {"result": {"text": BASE64.encode(document.to_string().as_bytes())}}
        })
        .to_string()
    }

    #[test]
    fn test_handle_partial_result_feeds_accumulator() {
        let accumulator = Mutex::new(TranscriptAccumulator::new());
        let flow = handle_result_message(&result_message("hel", 1), &accumulator).unwrap();
        assert!(matches!(flow, Flow::Continue));
        assert_eq!(accumulator.lock().transcript(), "hel");
    }

    #[test]
    fn test_handle_terminal_status_completes() {
        let accumulator = Mutex::new(TranscriptAccumulator::new());
        accumulator.lock().offer("hel");
        let flow = handle_result_message(&result_message("hello", 2), &accumulator).unwrap();
        assert!(matches!(flow, Flow::Complete));
        assert_eq!(accumulator.lock().transcript(), "hello");
    }

    #[test]
    fn test_handle_error_code_preserves_message() {
        let accumulator = Mutex::new(TranscriptAccumulator::new());
        let message = json!({
            "header": {"code": 10165, "status": 1, "message": "invalid handshake param"}
        })
        .to_string();
        let result = handle_result_message(&message, &accumulator);
        match result {
            Err(SpeechError::Protocol { code, message }) => {
                assert_eq!(code, 10165);
                assert_eq!(message, "invalid handshake param");
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn test_handle_malformed_message() {
        let accumulator = Mutex::new(TranscriptAccumulator::new());
        let result = handle_result_message("{truncated", &accumulator);
        assert!(matches!(result, Err(SpeechError::Transport(_))));
    }
}
