//! Wire-protocol pieces shared by the recognition and synthesis sessions.
//!
//! Both protocols exchange JSON envelopes of the shape
//! `{header, parameter, payload}` where binary data travels as base64
//! text fields and a status marker tags each frame as the first, an
//! interior, or the final frame of the stream.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// =============================================================================
// Frame status
// =============================================================================

/// Position of a frame within a streamed session.
///
/// Serialized as the bare integers `0`/`1`/`2` the wire protocol uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// First frame of the session; carries the session parameters.
    First,
    /// Interior frame.
    Continue,
    /// Final frame; the session drains after this.
    Last,
}

impl FrameStatus {
    /// The wire integer for this status.
    pub fn code(self) -> u8 {
        match self {
            FrameStatus::First => 0,
            FrameStatus::Continue => 1,
            FrameStatus::Last => 2,
        }
    }

    /// Parses a wire integer.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FrameStatus::First),
            1 => Some(FrameStatus::Continue),
            2 => Some(FrameStatus::Last),
            _ => None,
        }
    }

    #[inline]
    pub fn is_last(self) -> bool {
        matches!(self, FrameStatus::Last)
    }
}

impl Serialize for FrameStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for FrameStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        FrameStatus::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid frame status {code}")))
    }
}

// =============================================================================
// Frame sequencer
// =============================================================================

/// Hands out `(sequence, status)` pairs for outbound frames.
///
/// Sequence numbers are strictly increasing from 0. `next` yields
/// [`FrameStatus::First`] exactly once (for sequence 0) and
/// [`FrameStatus::Continue`] afterwards; [`FrameSequencer::last`]
/// consumes the sequencer, so a session can emit at most one
/// [`FrameStatus::Last`] and nothing after it.
#[derive(Debug, Default)]
pub struct FrameSequencer {
    next_seq: u64,
}

impl FrameSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next interior frame: `(0, First)` the first time, `(n, Continue)`
    /// afterwards.
    pub fn next(&mut self) -> (u64, FrameStatus) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let status = if seq == 0 {
            FrameStatus::First
        } else {
            FrameStatus::Continue
        };
        (seq, status)
    }

    /// The terminal frame. Consumes the sequencer.
    ///
    /// When no frame was emitted yet the terminal frame is also the first
    /// one and takes sequence 0 (an empty audio source produces a single
    /// `Last` frame).
    pub fn last(self) -> (u64, FrameStatus) {
        (self.next_seq, FrameStatus::Last)
    }
}

// =============================================================================
// Session state
// =============================================================================

/// Lifecycle of one streaming session, owned exclusively by the session
/// object and published through a `tokio::sync::watch` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    /// The logical end of input was sent; in-flight data is flushing.
    Draining,
    Completed,
    Failed,
}

impl SessionState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    /// `send` is only legal before the drain begins.
    #[inline]
    pub fn accepts_input(self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Connecting | SessionState::Streaming
        )
    }
}

// =============================================================================
// Shared envelope headers
// =============================================================================

/// Outbound envelope header.
#[derive(Debug, Clone, Serialize)]
pub struct RequestHeader {
    pub app_id: String,
    pub status: FrameStatus,
}

/// Inbound envelope header. `code` 0 means success; any other value is a
/// protocol failure and ends the session.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseHeader {
    pub code: i64,
    #[serde(default)]
    pub status: Option<FrameStatus>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub sid: Option<String>,
}

// =============================================================================
// Payload encoding
// =============================================================================

/// Encodes binary payload bytes into the text-safe wire form.
pub fn encode_payload(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decodes a text-safe payload field back into bytes.
pub fn decode_payload(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_codes() {
        assert_eq!(FrameStatus::First.code(), 0);
        assert_eq!(FrameStatus::Continue.code(), 1);
        assert_eq!(FrameStatus::Last.code(), 2);
        assert_eq!(FrameStatus::from_code(2), Some(FrameStatus::Last));
        assert_eq!(FrameStatus::from_code(3), None);
    }

    #[test]
    fn test_status_serializes_as_bare_integer() {
        assert_eq!(serde_json::to_string(&FrameStatus::First).unwrap(), "0");
        assert_eq!(serde_json::to_string(&FrameStatus::Last).unwrap(), "2");

        let status: FrameStatus = serde_json::from_str("1").unwrap();
        assert_eq!(status, FrameStatus::Continue);
        assert!(serde_json::from_str::<FrameStatus>("7").is_err());
    }

    #[test]
    fn test_sequencer_yields_gapless_sequence() {
        let mut sequencer = FrameSequencer::new();
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(sequencer.next());
        }
        seen.push(sequencer.last());

        let seqs: Vec<u64> = seen.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5]);

        let firsts = seen
            .iter()
            .filter(|(_, s)| *s == FrameStatus::First)
            .count();
        let lasts = seen.iter().filter(|(_, s)| *s == FrameStatus::Last).count();
        assert_eq!(firsts, 1);
        assert_eq!(lasts, 1);
        assert_eq!(seen[0].1, FrameStatus::First);
        assert_eq!(seen[5].1, FrameStatus::Last);
    }

    #[test]
    fn test_sequencer_empty_source_emits_last_at_zero() {
        let sequencer = FrameSequencer::new();
        assert_eq!(sequencer.last(), (0, FrameStatus::Last));
    }

    #[test]
    fn test_session_state_transitions() {
        assert!(!SessionState::Streaming.is_terminal());
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Failed.is_terminal());

        assert!(SessionState::Streaming.accepts_input());
        assert!(!SessionState::Draining.accepts_input());
        assert!(!SessionState::Failed.accepts_input());
    }

    #[test]
    fn test_payload_round_trip() {
        let bytes = [0u8, 1, 2, 250, 255];
        let encoded = encode_payload(&bytes);
        assert_eq!(decode_payload(&encoded).unwrap(), bytes);
        assert!(decode_payload("not//valid==base64!").is_err());
    }

    #[test]
    fn test_response_header_optional_fields() {
        let header: ResponseHeader =
            serde_json::from_str(r#"{"code":0,"status":2,"sid":"abc"}"#).unwrap();
        assert_eq!(header.code, 0);
        assert_eq!(header.status, Some(FrameStatus::Last));
        assert_eq!(header.sid.as_deref(), Some("abc"));
        assert!(header.message.is_none());

        let header: ResponseHeader = serde_json::from_str(r#"{"code":10165}"#).unwrap();
        assert_eq!(header.code, 10165);
        assert!(header.status.is_none());
    }
}
