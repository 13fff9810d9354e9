use std::time::Duration;

/// Default recognition endpoint.
pub const RECOGNIZER_ENDPOINT: &str = "ws://iat.xf-yun.com/v1";

/// Options for one recognition session.
///
/// The defaults match the service's expectations for 16 kHz mono PCM:
/// 1280-byte frames sent every 40 ms emulate the real-time capture rate
/// the remote protocol requires.
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    /// WebSocket endpoint; signed query parameters are appended per attempt.
    pub endpoint: String,
    /// Recognition language, e.g. `zh_cn`.
    pub language: String,
    /// Recognition domain.
    pub domain: String,
    /// Accent hint.
    pub accent: String,
    /// Dynamic-correction mode; `wpgs` enables revisable partial results.
    pub dynamic_correction: String,
    /// Bytes of audio per frame.
    pub frame_size: usize,
    /// Pacing interval between frames. Protocol rate limiting, not a knob
    /// to tune for throughput.
    pub frame_interval: Duration,
    /// Sample rate of the source audio in Hz.
    pub sample_rate: u32,
    /// Audio encoding label, `raw` for PCM.
    pub encoding: String,
    /// Overall budget for one session, connect included.
    pub session_timeout: Duration,
    /// Granularity of the terminal-state poll.
    pub poll_interval: Duration,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            endpoint: RECOGNIZER_ENDPOINT.to_string(),
            language: "zh_cn".to_string(),
            domain: "slm".to_string(),
            accent: "mandarin".to_string(),
            dynamic_correction: "wpgs".to_string(),
            frame_size: 1280,
            frame_interval: Duration::from_millis(40),
            sample_rate: 16_000,
            encoding: "raw".to_string(),
            session_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        }
    }
}
