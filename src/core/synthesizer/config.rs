use std::time::Duration;

/// Default synthesis endpoint.
pub const SYNTHESIZER_ENDPOINT: &str = "wss://cbm01.cn-huabei-1.xf-yun.com/v1/private/mcd9m97e6";

/// Options for one synthesis session.
///
/// The flush cadence (`send_interval` / `max_buffer_size`) trades latency
/// against frame count: text accumulates until either the interval
/// elapses or the buffer outgrows the limit, whichever comes first.
#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    /// WebSocket endpoint; signed query parameters are appended per attempt.
    pub endpoint: String,
    /// Voice model name.
    pub voice: String,
    pub volume: u32,
    pub speed: u32,
    pub pitch: u32,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    /// Audio encoding label, `raw` for PCM.
    pub encoding: String,
    /// Time-based flush trigger.
    pub send_interval: Duration,
    /// Size-based flush trigger, in characters.
    pub max_buffer_size: usize,
    /// Poll timeout of the text-inbox pull.
    pub inbox_poll: Duration,
    /// Budget for socket readiness during `init`.
    pub connect_timeout: Duration,
    /// Budget for the terminal protocol state during `finish`.
    pub finish_timeout: Duration,
    /// Receive timeout of the audio writer loop.
    pub writer_timeout: Duration,
    /// Budget for joining the audio writer during `finish`.
    pub writer_join_timeout: Duration,
    /// Granularity of the terminal-state poll.
    pub poll_interval: Duration,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            endpoint: SYNTHESIZER_ENDPOINT.to_string(),
            voice: "x5_lingxiaoyue_flow".to_string(),
            volume: 50,
            speed: 50,
            pitch: 50,
            sample_rate: 24_000,
            channels: 1,
            bit_depth: 16,
            encoding: "raw".to_string(),
            send_interval: Duration::from_secs(1),
            max_buffer_size: 500,
            inbox_poll: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(10),
            finish_timeout: Duration::from_secs(30),
            writer_timeout: Duration::from_secs(5),
            writer_join_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
        }
    }
}
