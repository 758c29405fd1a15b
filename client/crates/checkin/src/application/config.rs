//! Application Configuration
//!
//! Configuration for the check-in application layer.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use kernel::error::app_error::{AppError, AppResult};

use crate::domain::services::CodePayloadCodec;

/// Check-in client configuration
#[derive(Debug, Clone)]
pub struct CheckinConfig {
    /// Attendance API base URL, without trailing slash
    pub api_base_url: String,
    /// Bearer token for the signed-in account
    pub access_token: Option<String>,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// First field of the literal code form
    pub code_prefix: String,
    /// Lifetime of a scanned code whose payload carries no expiry
    pub code_ttl: Duration,
    /// Countdown and auto-refresh cadence
    pub tick_interval: Duration,
    /// How long before expiry the display refetches its code
    pub refresh_lead: Duration,
    /// TTL requested when rotating a code manually
    pub rotate_ttl: Duration,
    /// Upper bound on a single location request
    pub location_timeout: Duration,
    /// Local state file holding the device identifier
    pub state_path: PathBuf,
    /// Key of the device identifier inside the state file
    pub device_id_key: String,
}

impl Default for CheckinConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api/v1".to_string(),
            access_token: None,
            request_timeout: Duration::from_secs(10),
            code_prefix: CodePayloadCodec::DEFAULT_PREFIX.to_string(),
            code_ttl: Duration::from_secs(30),
            tick_interval: Duration::from_secs(1),
            refresh_lead: Duration::ZERO,
            rotate_ttl: Duration::from_secs(60),
            location_timeout: Duration::from_secs(10),
            state_path: PathBuf::from(".absense/state.json"),
            device_id_key: "absense.device_id".to_string(),
        }
    }
}

impl CheckinConfig {
    /// Defaults overlaid with `ABSENSE_*` environment variables
    ///
    /// ## Errors
    /// `BadRequest` when a numeric variable does not parse
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("ABSENSE_API_URL") {
            config.api_base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(token) = get("ABSENSE_ACCESS_TOKEN") {
            config.access_token = Some(token.trim().to_string());
        }
        if let Some(prefix) = get("ABSENSE_CODE_PREFIX") {
            config.code_prefix = prefix.trim().to_string();
        }
        if let Some(path) = get("ABSENSE_STATE_PATH") {
            config.state_path = PathBuf::from(path);
        }
        if let Some(secs) = get("ABSENSE_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(parse_number("ABSENSE_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = get("ABSENSE_CODE_TTL_SECS") {
            config.code_ttl = Duration::from_secs(parse_number("ABSENSE_CODE_TTL_SECS", &secs)?);
        }
        if let Some(secs) = get("ABSENSE_ROTATE_TTL_SECS") {
            config.rotate_ttl = Duration::from_secs(parse_number("ABSENSE_ROTATE_TTL_SECS", &secs)?);
        }

        Ok(config)
    }

    pub fn codec(&self) -> CodePayloadCodec {
        CodePayloadCodec::new(self.code_prefix.clone())
    }

    pub fn code_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.code_ttl).unwrap_or(chrono::Duration::MAX)
    }

    pub fn refresh_lead_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.refresh_lead).unwrap_or(chrono::Duration::zero())
    }

    pub fn rotate_ttl_secs(&self) -> u64 {
        self.rotate_ttl.as_secs()
    }
}

fn parse_number<T: FromStr>(key: &'static str, raw: &str) -> AppResult<T> {
    raw.trim().parse::<T>().map_err(|_| {
        AppError::bad_request(format!("{key} must be a whole number, got {raw:?}"))
            .with_action("Fix the value in your environment or .env file")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CheckinConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.code_ttl, Duration::from_secs(30));
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.refresh_lead, Duration::ZERO);
        assert_eq!(config.code_prefix, "ABSENSE");
        assert!(config.access_token.is_none());
    }

    #[test]
    fn test_overlay() {
        let config = CheckinConfig::from_lookup(lookup(&[
            ("ABSENSE_API_URL", "https://attend.example.edu/api/v1/"),
            ("ABSENSE_ACCESS_TOKEN", "tok"),
            ("ABSENSE_TIMEOUT_SECS", "5"),
            ("ABSENSE_CODE_PREFIX", "CLASS"),
            ("ABSENSE_ROTATE_TTL_SECS", "90"),
            ("ABSENSE_STATE_PATH", "/tmp/absense.json"),
        ]))
        .unwrap();
        assert_eq!(config.api_base_url, "https://attend.example.edu/api/v1");
        assert_eq!(config.access_token.as_deref(), Some("tok"));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.codec().prefix(), "CLASS");
        assert_eq!(config.rotate_ttl_secs(), 90);
        assert_eq!(config.state_path, PathBuf::from("/tmp/absense.json"));
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let config = CheckinConfig::from_lookup(lookup(&[("ABSENSE_ACCESS_TOKEN", "  ")])).unwrap();
        assert!(config.access_token.is_none());
    }

    #[test]
    fn test_malformed_number_is_rejected() {
        let err = CheckinConfig::from_lookup(lookup(&[("ABSENSE_CODE_TTL_SECS", "thirty")]))
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.message().contains("ABSENSE_CODE_TTL_SECS"));
    }
}
