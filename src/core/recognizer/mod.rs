//! Streaming speech recognition over a framed WebSocket session.

pub mod config;
pub mod messages;
pub mod session;

pub use config::{RECOGNIZER_ENDPOINT, RecognizerConfig};
pub use session::{RecognitionSession, TranscriptAccumulator};
