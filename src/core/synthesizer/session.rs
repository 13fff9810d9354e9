//! Synthesis session: streams incrementally-produced text to the
//! synthesizer and reassembles the returned audio into a playable file,
//! while text keeps arriving concurrently from the caller.
//!
//! # Architecture
//!
//! One session owns one connection and drives it through
//! `Idle → Connecting → Streaming → Draining → {Completed | Failed}`:
//!
//! - [`SynthesisSession::send`] appends fragments to the text inbox from
//!   any task; the inbox and the session state are the only shared
//!   surfaces;
//! - a flush loop batches inbox fragments into frames on a cadence (time
//!   or size triggered, whichever fires first) and ends the stream with a
//!   non-empty terminal placeholder, since the protocol rejects empty
//!   terminal payloads;
//! - the connection event loop forwards frames out and pushes decoded
//!   audio chunks to the writer's outbox as they arrive;
//! - the [`AudioFileWriter`] drains the outbox independently, so a slow
//!   disk cannot stall the receive path.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use super::config::SynthesizerConfig;
use super::messages::{SynthesisRequest, SynthesisResponse};
use super::writer::AudioFileWriter;
use crate::config::Credentials;
use crate::core::auth::build_signed_url;
use crate::core::protocol::{FrameSequencer, FrameStatus, SessionState};
use crate::errors::{SpeechError, SpeechResult};

/// The protocol rejects an empty terminal payload, so the stream ends
/// with this placeholder sentence mark.
const TERMINAL_PLACEHOLDER: &str = "。";

/// One streaming synthesis session.
///
/// # Example
///
/// ```rust,no_run
/// use voxloop::{Credentials, SynthesisSession, SynthesizerConfig};
///
/// # async fn run() -> voxloop::SpeechResult<()> {
/// let credentials = Credentials::from_env()?;
/// let mut session = SynthesisSession::new(credentials, SynthesizerConfig::default());
/// session.init("./reply_audio.raw").await?;
/// session.send("Hello")?;
/// session.send(" there.")?;
/// let clean = session.finish().await?;
/// assert!(clean);
/// # Ok(())
/// # }
/// ```
pub struct SynthesisSession {
    credentials: Credentials,
    config: SynthesizerConfig,
    state_tx: watch::Sender<SessionState>,
    /// Text inbox; `None` is the end-of-text sentinel pushed by `finish`.
    inbox_tx: Option<mpsc::UnboundedSender<Option<String>>>,
    writer: Option<AudioFileWriter>,
    connection: Option<tokio::task::JoinHandle<()>>,
    closed: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<SpeechError>>>,
}

impl SynthesisSession {
    pub fn new(credentials: Credentials, config: SynthesizerConfig) -> Self {
        let (state_tx, _state_rx) = watch::channel(SessionState::Idle);
        Self {
            credentials,
            config,
            state_tx,
            inbox_tx: None,
            writer: None,
            connection: None,
            closed: Arc::new(AtomicBool::new(false)),
            failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Current session state snapshot.
    pub fn state(&self) -> SessionState {
        *self.state_tx.subscribe().borrow()
    }

    /// Observes state transitions; useful for diagnostics and tests.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// The failure recorded against this session, if any.
    pub fn failure_message(&self) -> Option<String> {
        self.failure.lock().as_ref().map(|e| e.to_string())
    }

    /// Opens the connection, starts the audio writer bound to
    /// `output_path`, and waits up to the configured timeout for the
    /// socket to become ready.
    pub async fn init(&mut self, output_path: impl Into<PathBuf>) -> SpeechResult<()> {
        if self.connection.is_some() {
            return Err(SpeechError::Configuration(
                "synthesis session is already initialized; sessions are single-use".to_string(),
            ));
        }

        // Signatures are time-bound; build the URL right before connecting.
        let url = build_signed_url(&self.config.endpoint, &self.credentials, Utc::now())?;
        self.state_tx.send_replace(SessionState::Connecting);

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let writer = AudioFileWriter::spawn(
            output_path.into(),
            outbox_rx,
            self.closed.clone(),
            self.config.writer_timeout,
        );

        let connection = tokio::spawn(drive_connection(
            url.to_string(),
            self.credentials.app_id.clone(),
            self.config.clone(),
            inbox_rx,
            outbox_tx,
            self.state_tx.clone(),
            self.closed.clone(),
            self.failure.clone(),
            ready_tx,
        ));

        self.inbox_tx = Some(inbox_tx);
        self.writer = Some(writer);
        self.connection = Some(connection);

        match timeout(self.config.connect_timeout, ready_rx).await {
            Ok(Ok(())) => {
                info!("synthesis connection ready");
                Ok(())
            }
            Ok(Err(_)) => Err(self.take_failure().unwrap_or_else(|| {
                SpeechError::Transport("synthesis connection ended before readiness".to_string())
            })),
            Err(_) => {
                warn!("synthesis connection was not ready in time");
                self.abort_connection();
                Err(SpeechError::Timeout("synthesis connection readiness"))
            }
        }
    }

    /// Appends a text fragment to the inbox.
    ///
    /// Callable from any task. Whitespace-only fragments are dropped.
    /// Fails with [`SpeechError::SessionClosed`] once the session has
    /// reached `Draining`, `Completed`, or `Failed`.
    pub fn send(&self, text: &str) -> SpeechResult<()> {
        let Some(inbox) = &self.inbox_tx else {
            return Err(SpeechError::SessionClosed);
        };
        if !self.state().accepts_input() || self.closed.load(Ordering::Acquire) {
            return Err(SpeechError::SessionClosed);
        }
        if text.trim().is_empty() {
            return Ok(());
        }
        inbox
            .send(Some(text.to_string()))
            .map_err(|_| SpeechError::SessionClosed)
    }

    /// Pushes the end-of-text sentinel and waits for the session and the
    /// audio writer to reach their terminal states, each within its own
    /// bounded window.
    ///
    /// Returns `Ok(true)` only if the protocol session completed and the
    /// writer finished cleanly.
    pub async fn finish(&mut self) -> SpeechResult<bool> {
        let inbox = self.inbox_tx.take().ok_or(SpeechError::SessionClosed)?;
        let _ = inbox.send(None);
        drop(inbox);

        // Bounded poll for the terminal protocol state.
        let started = Instant::now();
        let state_rx = self.state_tx.subscribe();
        let protocol_clean = loop {
            match *state_rx.borrow() {
                SessionState::Completed => break true,
                SessionState::Failed => break false,
                _ => {}
            }
            if started.elapsed() >= self.config.finish_timeout {
                warn!("synthesis session did not reach a terminal state in time");
                break false;
            }
            sleep(self.config.poll_interval).await;
        };

        // Let the event loop close the socket on its own; force it only
        // if it never does.
        if let Some(mut handle) = self.connection.take() {
            if timeout(self.config.poll_interval * 10, &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }
        self.closed.store(true, Ordering::Release);

        // Bounded join of the writer, even after a protocol failure: the
        // end-of-stream sentinel guarantees it unblocks.
        let writer_clean = match self.writer.take() {
            Some(writer) => writer.join(self.config.writer_join_timeout).await,
            None => false,
        };

        info!(protocol_clean, writer_clean, "synthesis session finished");
        Ok(protocol_clean && writer_clean)
    }

    fn take_failure(&self) -> Option<SpeechError> {
        self.failure.lock().take()
    }

    fn abort_connection(&mut self) {
        if let Some(handle) = self.connection.take() {
            if !handle.is_finished() {
                handle.abort();
            }
        }
        self.closed.store(true, Ordering::Release);
    }
}

impl Drop for SynthesisSession {
    fn drop(&mut self) {
        // A session dropped without `finish` must not leave its
        // connection task running.
        if let Some(handle) = self.connection.take() {
            handle.abort();
        }
        self.closed.store(true, Ordering::Release);
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
async fn drive_connection(
    url: String,
    app_id: String,
    config: SynthesizerConfig,
    inbox_rx: mpsc::UnboundedReceiver<Option<String>>,
    outbox_tx: mpsc::UnboundedSender<Option<Bytes>>,
    state_tx: watch::Sender<SessionState>,
    closed: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<SpeechError>>>,
    ready_tx: oneshot::Sender<()>,
) {
    let (ws_stream, _) = match connect_async(url.as_str()).await {
        Ok(connected) => connected,
        Err(e) => {
            record_failure(
                &failure,
                &state_tx,
                SpeechError::Transport(format!("synthesizer connection failed: {e}")),
            );
            closed.store(true, Ordering::Release);
            // Unblock the writer: nothing will ever arrive.
            let _ = outbox_tx.send(None);
            return;
        }
    };

    info!("connected to synthesizer");
    let _ = ready_tx.send(());
    state_tx.send_replace(SessionState::Streaming);

    let (mut ws_sink, mut ws_source) = ws_stream.split();

    // The flush loop owns the text inbox and hands finished frames to the
    // event loop; the channel is the only coupling between them.
    let (frame_tx, mut frame_rx) = mpsc::channel::<Message>(8);
    let flusher = tokio::spawn(flush_text(
        inbox_rx,
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
                        SpeechError::Transport(format!("failed to send text frame: {e}")),
                    );
                    let _ = outbox_tx.send(None);
                    break;
                }
            }

            message = ws_source.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        match handle_audio_message(&text, &outbox_tx) {
                            Ok(Flow::Continue) => {}
                            Ok(Flow::Complete) => {
                                state_tx.send_replace(SessionState::Completed);
                                let _ = outbox_tx.send(None);
                                break;
                            }
                            Err(e) => {
                                record_failure(&failure, &state_tx, e);
                                let _ = outbox_tx.send(None);
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "synthesizer closed the connection");
                    }
                    Some(Ok(other)) => {
                        debug!(kind = ?other, "ignoring non-text message from synthesizer");
                    }
                    Some(Err(e)) => {
                        record_failure(
                            &failure,
                            &state_tx,
                            SpeechError::Transport(format!("websocket error: {e}")),
                        );
                        let _ = outbox_tx.send(None);
                        break;
                    }
                    None => {
                        record_failure(
                            &failure,
                            &state_tx,
                            SpeechError::Transport(
                                "connection ended before the terminal audio chunk".to_string(),
                            ),
                        );
                        let _ = outbox_tx.send(None);
                        break;
                    }
                }
            }
        }
    }

    closed.store(true, Ordering::Release);
    flusher.abort();
    let _ = ws_sink.close().await;
}

/// Dispatches one inbound message: non-zero codes fail the session,
/// non-empty audio goes to the outbox, a terminal chunk completes the
/// session.
fn handle_audio_message(
    text: &str,
    outbox: &mpsc::UnboundedSender<Option<Bytes>>,
) -> SpeechResult<Flow> {
    let response: SynthesisResponse = serde_json::from_str(text)
        .map_err(|e| SpeechError::Transport(format!("malformed synthesizer message: {e}")))?;

    if response.header.code != 0 {
        return Err(SpeechError::Protocol {
            code: response.header.code,
            message: response.error_message(),
        });
    }

    if let Some(audio) = response.payload.and_then(|p| p.audio) {
        let chunk = audio.decode_audio()?;
        if !chunk.is_empty() {
            debug!(bytes = chunk.len(), "audio chunk received");
            let _ = outbox.send(Some(Bytes::from(chunk)));
        }
        if audio.status.is_last() {
            return Ok(Flow::Complete);
        }
    }

    Ok(Flow::Continue)
}

/// Pulls the text inbox on a short poll, batching fragments into frames.
///
/// A frame is flushed when the send interval has elapsed or the pending
/// buffer outgrows the size limit, whichever fires first. The end-of-text
/// sentinel flushes any residue and then emits the terminal placeholder
/// frame before the loop stops.
async fn flush_text(
    mut inbox: mpsc::UnboundedReceiver<Option<String>>,
    config: SynthesizerConfig,
    app_id: String,
    frames: mpsc::Sender<Message>,
    state_tx: watch::Sender<SessionState>,
) {
    let mut sequencer = FrameSequencer::new();
    let mut pending = String::new();
    let mut last_flush = Instant::now();

    loop {
        match timeout(config.inbox_poll, inbox.recv()).await {
            Ok(Some(Some(fragment))) => pending.push_str(&fragment),
            Ok(Some(None)) | Ok(None) => {
                // End of text: flush the residue, then the terminal frame.
                if !pending.trim().is_empty() {
                    let (seq, status) = sequencer.next();
                    if !send_text_frame(&frames, &app_id, &config, &pending, status, seq).await {
                        return;
                    }
                }
                let (seq, status) = sequencer.last();
                let _ =
                    send_text_frame(&frames, &app_id, &config, TERMINAL_PLACEHOLDER, status, seq)
                        .await;
                state_tx.send_replace(SessionState::Draining);
                debug!(frames = seq + 1, "text stream drained");
                return;
            }
            Err(_) => {} // poll timeout; fall through to the cadence check
        }

        if !pending.trim().is_empty()
            && (last_flush.elapsed() >= config.send_interval
                || pending.chars().count() > config.max_buffer_size)
        {
            let (seq, status) = sequencer.next();
            if !send_text_frame(&frames, &app_id, &config, &pending, status, seq).await {
                return;
            }
            pending.clear();
            last_flush = Instant::now();
        }
    }
}

async fn send_text_frame(
    frames: &mpsc::Sender<Message>,
    app_id: &str,
    config: &SynthesizerConfig,
    text: &str,
    status: FrameStatus,
    seq: u64,
) -> bool {
    let frame = SynthesisRequest::text_frame(app_id, config, text, status, seq);
    let json = match serde_json::to_string(&frame) {
        Ok(json) => json,
        Err(e) => {
            error!(error = %e, "failed to encode text frame");
            return false;
        }
    };
    debug!(seq, status = status.code(), chars = text.chars().count(), "flushing text frame");
    frames.send(Message::Text(json.into())).await.is_ok()
}

fn record_failure(
    failure: &Mutex<Option<SpeechError>>,
    state_tx: &watch::Sender<SessionState>,
    error: SpeechError,
) {
    error!(error = %error, "synthesis session failed");
    failure.lock().get_or_insert(error);
    state_tx.send_replace(SessionState::Failed);
}
