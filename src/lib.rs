//! voxloop chains streaming speech recognition, a chat model, and
//! streaming speech synthesis into a spoken conversation loop.
//!
//! The core of the crate is the pair of WebSocket protocol engines in
//! [`core`]: [`RecognitionSession`] streams microphone PCM to the
//! recognizer and collects a transcript, and [`SynthesisSession`] streams
//! incrementally-produced text to the synthesizer while reassembling the
//! returned audio into a playable file through a decoupled writer.

pub mod audio;
pub mod chat;
pub mod config;
pub mod core;
pub mod errors;

// Re-export commonly used items for convenience
pub use crate::chat::{ChatClient, ChatConfig};
pub use crate::config::{AssistantConfig, Credentials};
pub use crate::core::protocol::SessionState;
pub use crate::core::recognizer::{RecognitionSession, RecognizerConfig};
pub use crate::core::synthesizer::{SynthesisSession, SynthesizerConfig};
pub use crate::errors::{SpeechError, SpeechResult};
