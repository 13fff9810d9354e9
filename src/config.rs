use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::chat::ChatConfig;
use crate::errors::{SpeechError, SpeechResult};

/// Credentials for the speech platform.
///
/// Supplied once per session and never persisted by the crate. There are
/// no embedded fallback keys: missing credentials fail fast at startup.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Application identifier issued by the platform console.
    pub app_id: String,
    /// API key, embedded in the signed authorization string.
    pub api_key: String,
    /// API secret, used only as the HMAC signing key.
    pub api_secret: String,
}

impl Credentials {
    /// Creates credentials, rejecting empty fields.
    pub fn new(
        app_id: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> SpeechResult<Self> {
        let credentials = Self {
            app_id: app_id.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        };
        credentials.validate()?;
        Ok(credentials)
    }

    /// Reads `VOXLOOP_APP_ID`, `VOXLOOP_API_KEY` and `VOXLOOP_API_SECRET`.
    pub fn from_env() -> SpeechResult<Self> {
        Self::new(
            require_env("VOXLOOP_APP_ID")?,
            require_env("VOXLOOP_API_KEY")?,
            require_env("VOXLOOP_API_SECRET")?,
        )
    }

    fn validate(&self) -> SpeechResult<()> {
        if self.app_id.is_empty() || self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(SpeechError::Configuration(
                "app id, api key and api secret must all be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn require_env(name: &str) -> SpeechResult<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(SpeechError::Configuration(format!(
            "environment variable {name} is not set"
        ))),
    }
}

/// Configuration for the conversation-loop binary.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub credentials: Credentials,
    pub chat: ChatConfig,
    /// Where the microphone capture lands before recognition.
    pub capture_path: PathBuf,
    /// Where synthesized reply audio is written.
    pub reply_path: PathBuf,
    /// Playback starts once the reply file holds at least this many bytes.
    pub playback_threshold: u64,
    /// Give up on playback if the threshold is never reached.
    pub playback_wait: Duration,
}

impl AssistantConfig {
    /// Loads the full assistant configuration from the environment,
    /// reading a `.env` file first if one is present.
    pub fn from_env() -> SpeechResult<Self> {
        let _ = dotenvy::dotenv();

        let capture_path = env::var("VOXLOOP_CAPTURE_PATH")
            .unwrap_or_else(|_| "./origin_audio.raw".to_string())
            .into();
        let reply_path = env::var("VOXLOOP_REPLY_PATH")
            .unwrap_or_else(|_| "./reply_audio.raw".to_string())
            .into();
        let playback_threshold = env::var("VOXLOOP_PLAYBACK_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(48_000);
        let playback_wait = env::var("VOXLOOP_PLAYBACK_WAIT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60));

        Ok(Self {
            credentials: Credentials::from_env()?,
            chat: ChatConfig::from_env()?,
            capture_path,
            reply_path,
            playback_threshold,
            playback_wait,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_reject_empty_fields() {
        let result = Credentials::new("", "key", "secret");
        assert!(matches!(result, Err(SpeechError::Configuration(_))));

        let result = Credentials::new("app", "key", "");
        assert!(matches!(result, Err(SpeechError::Configuration(_))));
    }

    #[test]
    fn test_credentials_accept_complete_set() {
        let credentials = Credentials::new("app", "key", "secret").unwrap();
        assert_eq!(credentials.app_id, "app");
        assert_eq!(credentials.api_key, "key");
        assert_eq!(credentials.api_secret, "secret");
    }

    #[test]
    fn test_missing_env_is_a_configuration_error() {
        // Deliberately unlikely variable name.
        let result = require_env("VOXLOOP_TEST_DOES_NOT_EXIST_7F3A");
        assert!(matches!(result, Err(SpeechError::Configuration(_))));
    }
}
