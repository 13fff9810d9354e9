//! Signed connection URLs for the speech platform.
//!
//! Both the recognition and the synthesis endpoints authenticate through
//! query parameters: an RFC 1123 date, the host, and a base64-encoded
//! authorization string whose signature is an HMAC-SHA256 over
//! `host`/`date`/request-line, keyed by the API secret.
//!
//! Signatures are only valid around the instant they are computed, so
//! callers must build a fresh URL immediately before each connection
//! attempt and never reuse one across attempts.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;

use crate::config::Credentials;
use crate::errors::{SpeechError, SpeechResult};

type HmacSha256 = Hmac<Sha256>;

/// Builds a signed WebSocket URL for `endpoint` at the instant `now`.
///
/// Pure and deterministic given `now`. The only failure mode is a
/// malformed endpoint, which is a [`SpeechError::Configuration`].
pub fn build_signed_url(
    endpoint: &str,
    credentials: &Credentials,
    now: DateTime<Utc>,
) -> SpeechResult<Url> {
    let mut url = Url::parse(endpoint).map_err(|e| {
        SpeechError::Configuration(format!("invalid endpoint {endpoint}: {e}"))
    })?;
    let host = url
        .host_str()
        .ok_or_else(|| {
            SpeechError::Configuration(format!("endpoint {endpoint} has no host"))
        })?
        .to_string();
    let path = url.path().to_string();

    let date = format_http_date(now);
    let canonical = format!("host: {host}\ndate: {date}\nGET {path} HTTP/1.1");

    let mut mac = HmacSha256::new_from_slice(credentials.api_secret.as_bytes())
        .map_err(|e| SpeechError::Configuration(format!("invalid api secret: {e}")))?;
    mac.update(canonical.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());

    let authorization_origin = format!(
        "api_key=\"{}\", algorithm=\"hmac-sha256\", headers=\"host date request-line\", signature=\"{signature}\"",
        credentials.api_key
    );
    let authorization = BASE64.encode(authorization_origin.as_bytes());

    url.query_pairs_mut()
        .append_pair("authorization", &authorization)
        .append_pair("date", &date)
        .append_pair("host", &host);

    Ok(url)
}

/// Formats `now` as an RFC 1123 date with the literal `GMT` zone the
/// service expects (`chrono::to_rfc2822` would emit `+0000` instead).
fn format_http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_credentials() -> Credentials {
        Credentials::new("app-id", "test-key", "test-secret").unwrap()
    }

    fn fixed_instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 12, 10, 7, 7, 28).unwrap()
    }

    #[test]
    fn test_http_date_format() {
        assert_eq!(
            format_http_date(fixed_instant()),
            "Fri, 10 Dec 2021 07:07:28 GMT"
        );
    }

    #[test]
    fn test_signed_url_is_deterministic() {
        let a = build_signed_url("ws://iat.example.com/v1", &test_credentials(), fixed_instant())
            .unwrap();
        let b = build_signed_url("ws://iat.example.com/v1", &test_credentials(), fixed_instant())
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_signed_url_query_parameters() {
        let url = build_signed_url(
            "wss://tts.example.com/v1/private/abc",
            &test_credentials(),
            fixed_instant(),
        )
        .unwrap();

        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/v1/private/abc");

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].0, "authorization");
        assert_eq!(pairs[1], ("date".to_string(), "Fri, 10 Dec 2021 07:07:28 GMT".to_string()));
        assert_eq!(pairs[2], ("host".to_string(), "tts.example.com".to_string()));

        // The authorization parameter decodes to the documented shape.
        let decoded = BASE64.decode(pairs[0].1.as_bytes()).unwrap();
        let decoded = String::from_utf8(decoded).unwrap();
        assert!(decoded.starts_with("api_key=\"test-key\""));
        assert!(decoded.contains("algorithm=\"hmac-sha256\""));
        assert!(decoded.contains("headers=\"host date request-line\""));
        assert!(decoded.contains("signature=\""));
    }

    #[test]
    fn test_signature_depends_on_secret() {
        let other = Credentials::new("app-id", "test-key", "other-secret").unwrap();
        let a = build_signed_url("ws://iat.example.com/v1", &test_credentials(), fixed_instant())
            .unwrap();
        let b = build_signed_url("ws://iat.example.com/v1", &other, fixed_instant()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_signature_depends_on_instant() {
        let later = Utc.with_ymd_and_hms(2021, 12, 10, 7, 7, 29).unwrap();
        let a = build_signed_url("ws://iat.example.com/v1", &test_credentials(), fixed_instant())
            .unwrap();
        let b = build_signed_url("ws://iat.example.com/v1", &test_credentials(), later).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_endpoint_is_configuration_error() {
        let result = build_signed_url("not a url", &test_credentials(), fixed_instant());
        assert!(matches!(result, Err(SpeechError::Configuration(_))));
    }
}
