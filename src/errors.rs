//! Error types shared by the recognition and synthesis sessions.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type SpeechResult<T> = Result<T, SpeechError>;

/// Error taxonomy for the streaming speech sessions.
///
/// Network and decode failures inside the connection event loops never
/// escape as panics; they are recorded against the session and surface
/// through the terminal outcome of `run`/`init`/`finish`.
#[derive(Debug, Error)]
pub enum SpeechError {
    /// Bad credentials, endpoint, or environment. Fatal, surfaced immediately.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The remote service answered with a non-zero response code.
    /// The message is preserved verbatim for diagnostics.
    #[error("protocol error {code}: {message}")]
    Protocol { code: i64, message: String },

    /// The connection itself failed: socket errors, handshake failures,
    /// malformed payloads, streams that end before a terminal status.
    #[error("transport error: {0}")]
    Transport(String),

    /// No terminal signal arrived within the configured window.
    /// The connection is force-closed before this is returned.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// `send` was called after the session reached a terminal state.
    /// Local and recoverable; the caller should stop sending.
    #[error("session is closed")]
    SessionClosed,

    /// Local file I/O failure on the audio writer side. Reported, but it
    /// does not abort the network half of the session.
    #[error("audio file error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_preserves_message() {
        let err = SpeechError::Protocol {
            code: 10165,
            message: "invalid handshake param".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("10165"));
        assert!(rendered.contains("invalid handshake param"));
    }

    #[test]
    fn test_timeout_is_distinct_from_protocol() {
        let err = SpeechError::Timeout("recognition terminal status");
        assert!(matches!(err, SpeechError::Timeout(_)));
        assert!(err.to_string().contains("recognition terminal status"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SpeechError = io.into();
        assert!(matches!(err, SpeechError::Io(_)));
    }
}
