//! Wire messages for the recognition protocol.
//!
//! Outbound frames carry base64-encoded PCM in `payload.audio`; the first
//! frame additionally carries the recognition parameters under
//! `parameter.iat`. Inbound results arrive as `payload.result.text`, a
//! base64-encoded JSON document of word segments (`ws` → `cw` → `w`)
//! which decodes to one transcript candidate.

use serde::{Deserialize, Serialize};

use super::config::RecognizerConfig;
use crate::core::protocol::{
    FrameStatus, RequestHeader, ResponseHeader, decode_payload, encode_payload,
};
use crate::errors::{SpeechError, SpeechResult};

// =============================================================================
// Outbound frames
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RecognitionRequest {
    pub header: RequestHeader,
    /// Serialized as `{}` on every frame but the first, matching the
    /// service's envelope shape.
    pub parameter: RecognitionParameter,
    pub payload: AudioPayload,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecognitionParameter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<IatParameter>,
}

/// Session parameters carried by the first frame.
#[derive(Debug, Clone, Serialize)]
pub struct IatParameter {
    pub domain: String,
    pub language: String,
    pub accent: String,
    pub dwa: String,
    pub result: ResultFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultFormat {
    pub encoding: String,
    pub compress: String,
    pub format: String,
}

impl IatParameter {
    pub fn from_config(config: &RecognizerConfig) -> Self {
        Self {
            domain: config.domain.clone(),
            language: config.language.clone(),
            accent: config.accent.clone(),
            dwa: config.dynamic_correction.clone(),
            result: ResultFormat {
                encoding: "utf8".to_string(),
                compress: "raw".to_string(),
                format: "plain".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioPayload {
    pub audio: AudioChunk,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioChunk {
    /// Base64-encoded PCM; empty for the terminal frame.
    pub audio: String,
    pub sample_rate: u32,
    pub encoding: String,
    pub status: FrameStatus,
    pub seq: u64,
}

impl RecognitionRequest {
    /// Builds one audio frame. The first frame carries the recognition
    /// parameters; the terminal frame carries an empty payload.
    pub fn audio_frame(
        app_id: &str,
        config: &RecognizerConfig,
        audio: &[u8],
        status: FrameStatus,
        seq: u64,
    ) -> Self {
        let parameter = if status == FrameStatus::First {
            RecognitionParameter {
                iat: Some(IatParameter::from_config(config)),
            }
        } else {
            RecognitionParameter::default()
        };

        Self {
            header: RequestHeader {
                app_id: app_id.to_string(),
                status,
            },
            parameter,
            payload: AudioPayload {
                audio: AudioChunk {
                    audio: encode_payload(audio),
                    sample_rate: config.sample_rate,
                    encoding: config.encoding.clone(),
                    status,
                    seq,
                },
            },
        }
    }
}

// =============================================================================
// Inbound messages
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionResponse {
    pub header: ResponseHeader,
    #[serde(default)]
    pub payload: Option<RecognitionResponsePayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionResponsePayload {
    #[serde(default)]
    pub result: Option<ResultBlock>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultBlock {
    /// Base64-encoded JSON word-segment document.
    pub text: String,
}

impl ResultBlock {
    /// Decodes the candidate transcript: base64, then the word-segment
    /// document, concatenating every `w` field in order.
    pub fn decode_transcript(&self) -> SpeechResult<String> {
        let raw = decode_payload(&self.text)
            .map_err(|e| SpeechError::Transport(format!("malformed result payload: {e}")))?;
        let document: WordsDocument = serde_json::from_slice(&raw)
            .map_err(|e| SpeechError::Transport(format!("malformed result document: {e}")))?;
        Ok(document.concat())
    }
}

#[derive(Debug, Deserialize)]
struct WordsDocument {
    #[serde(default)]
    ws: Vec<WordSegment>,
}

#[derive(Debug, Deserialize)]
struct WordSegment {
    #[serde(default)]
    cw: Vec<CandidateWord>,
}

#[derive(Debug, Deserialize)]
struct CandidateWord {
    #[serde(default)]
    w: String,
}

impl WordsDocument {
    fn concat(&self) -> String {
        let mut text = String::new();
        for segment in &self.ws {
            for candidate in &segment.cw {
                text.push_str(&candidate.w);
            }
        }
        text
    }
}
