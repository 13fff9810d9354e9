//! Wire messages for the synthesis protocol.
//!
//! Outbound frames carry base64-encoded text in `payload.text` together
//! with the frame's status and sequence number; the synthesis parameters
//! ride along under `parameter.tts` on every frame. Inbound audio arrives
//! as base64 chunks in `payload.audio` with its own status marker; status
//! `2` is the terminal chunk.

use serde::{Deserialize, Serialize};

use super::config::SynthesizerConfig;
use crate::core::protocol::{
    FrameStatus, RequestHeader, ResponseHeader, decode_payload, encode_payload,
};
use crate::errors::{SpeechError, SpeechResult};

// =============================================================================
// Outbound frames
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisRequest {
    pub header: RequestHeader,
    pub parameter: SynthesisParameter,
    pub payload: TextPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisParameter {
    pub tts: TtsParameter,
}

#[derive(Debug, Clone, Serialize)]
pub struct TtsParameter {
    /// Voice model name.
    pub vcn: String,
    pub volume: u32,
    pub speed: u32,
    pub pitch: u32,
    pub audio: AudioFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub frame_size: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPayload {
    pub text: TextFrame,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextFrame {
    pub encoding: String,
    pub compress: String,
    pub format: String,
    pub status: FrameStatus,
    pub seq: u64,
    /// Base64-encoded UTF-8 text.
    pub text: String,
}

impl SynthesisRequest {
    /// Builds one text frame carrying `text`.
    pub fn text_frame(
        app_id: &str,
        config: &SynthesizerConfig,
        text: &str,
        status: FrameStatus,
        seq: u64,
    ) -> Self {
        Self {
            header: RequestHeader {
                app_id: app_id.to_string(),
                status,
            },
            parameter: SynthesisParameter {
                tts: TtsParameter {
                    vcn: config.voice.clone(),
                    volume: config.volume,
                    speed: config.speed,
                    pitch: config.pitch,
                    audio: AudioFormat {
                        encoding: config.encoding.clone(),
                        sample_rate: config.sample_rate,
                        channels: config.channels,
                        bit_depth: config.bit_depth,
                        frame_size: 0,
                    },
                },
            },
            payload: TextPayload {
                text: TextFrame {
                    encoding: "utf8".to_string(),
                    compress: "raw".to_string(),
                    format: "plain".to_string(),
                    status,
                    seq,
                    text: encode_payload(text.as_bytes()),
                },
            },
        }
    }
}

// =============================================================================
// Inbound messages
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisResponse {
    pub header: ResponseHeader,
    #[serde(default)]
    pub payload: Option<SynthesisResponsePayload>,
    /// Some error responses carry the human-readable message at the top
    /// level rather than inside the header.
    #[serde(default)]
    pub message: Option<String>,
}

impl SynthesisResponse {
    /// Best diagnostic message for a failed response.
    pub fn error_message(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.header.message.clone())
            .unwrap_or_else(|| "synthesis rejected by the service".to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisResponsePayload {
    #[serde(default)]
    pub audio: Option<AudioBlock>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioBlock {
    /// Base64-encoded PCM chunk; may be empty.
    pub audio: String,
    pub status: FrameStatus,
}

impl AudioBlock {
    pub fn decode_audio(&self) -> SpeechResult<Vec<u8>> {
        decode_payload(&self.audio)
            .map_err(|e| SpeechError::Transport(format!("malformed audio payload: {e}")))
    }
}
