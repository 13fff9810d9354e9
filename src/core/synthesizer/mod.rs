//! Streaming speech synthesis over a framed WebSocket session, with a
//! decoupled audio writer so playback can start before synthesis ends.

pub mod config;
pub mod messages;
pub mod session;
pub mod writer;

pub use config::{SYNTHESIZER_ENDPOINT, SynthesizerConfig};
pub use session::SynthesisSession;
pub use writer::AudioFileWriter;
