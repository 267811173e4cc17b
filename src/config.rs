//! Process configuration
//!
//! Both credentials come from the environment (a `.env` file is loaded first
//! by the binary). A missing credential is fatal at startup, never a
//! per-call failure.

use std::env;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Missing credential: set {0}")]
    MissingCredential(String),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: String, value: String },
}

/// Settings for the media-service client
#[derive(Debug, Clone)]
pub struct FrameioConfig {
    /// Bearer token for the media service
    pub token: String,

    /// Base URL for API (default: https://api.frame.io/v2)
    pub base_url: String,

    /// Team new projects are created in
    pub team_id: Option<String>,

    pub timeout_secs: u64,

    /// Retries on rate limits and transport failures
    pub max_retries: u32,

    pub retry_base_delay_ms: u64,

    /// Children requested per listing page
    pub page_size: u32,
}

impl Default for FrameioConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            base_url: "https://api.frame.io/v2".to_string(),
            team_id: None,
            timeout_secs: 120,
            max_retries: 3,
            retry_base_delay_ms: 2000,
            page_size: 100,
        }
    }
}

/// Settings for the generative-text client
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 2048,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub frameio: FrameioConfig,
    pub ai: AiConfig,
}

const FRAMEIO_TOKEN_VARS: &[&str] = &["FRAMEIO_TOKEN", "FrameAPI"];
const AI_KEY_VARS: &[&str] = &["ANTHROPIC_API_KEY", "REEL_SYNC_AI_KEY"];

impl AppConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to
    /// its value
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let first_set = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(name))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        let token = first_set(FRAMEIO_TOKEN_VARS)
            .ok_or_else(|| ConfigError::MissingCredential(FRAMEIO_TOKEN_VARS.join(" or ")))?;
        let api_key = first_set(AI_KEY_VARS)
            .ok_or_else(|| ConfigError::MissingCredential(AI_KEY_VARS.join(" or ")))?;

        let mut frameio = FrameioConfig {
            token,
            team_id: first_set(&["FRAMEIO_TEAM_ID"]),
            ..Default::default()
        };
        if let Some(url) = first_set(&["FRAMEIO_BASE_URL"]) {
            frameio.base_url = url;
        }

        let mut ai = AiConfig {
            api_key,
            ..Default::default()
        };
        if let Some(model) = first_set(&["REEL_SYNC_AI_MODEL"]) {
            ai.model = model;
        }

        if let Some(raw) = first_set(&["REEL_SYNC_HTTP_TIMEOUT_SECS"]) {
            let secs = raw
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| ConfigError::Invalid {
                    name: "REEL_SYNC_HTTP_TIMEOUT_SECS".to_string(),
                    value: raw.clone(),
                })?;
            frameio.timeout_secs = secs;
            ai.timeout_secs = secs;
        }

        Ok(Self { frameio, ai })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_missing_media_token_is_fatal() {
        let result = AppConfig::from_lookup(lookup(&[("ANTHROPIC_API_KEY", "k")]));
        assert!(matches!(result, Err(ConfigError::MissingCredential(v)) if v.contains("FRAMEIO_TOKEN")));
    }

    #[test]
    fn test_blank_ai_key_is_missing() {
        let result = AppConfig::from_lookup(lookup(&[
            ("FRAMEIO_TOKEN", "t"),
            ("ANTHROPIC_API_KEY", "   "),
        ]));
        assert!(matches!(result, Err(ConfigError::MissingCredential(v)) if v.contains("ANTHROPIC_API_KEY")));
    }

    #[test]
    fn test_fallback_names_and_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("FrameAPI", "legacy-token"),
            ("REEL_SYNC_AI_KEY", "k"),
            ("FRAMEIO_TEAM_ID", "team-1"),
            ("REEL_SYNC_AI_MODEL", "claude-haiku-4-5"),
            ("REEL_SYNC_HTTP_TIMEOUT_SECS", "30"),
        ]))
        .unwrap();

        assert_eq!(config.frameio.token, "legacy-token");
        assert_eq!(config.frameio.team_id.as_deref(), Some("team-1"));
        assert_eq!(config.frameio.timeout_secs, 30);
        assert_eq!(config.ai.model, "claude-haiku-4-5");
        assert_eq!(config.ai.timeout_secs, 30);
        assert_eq!(config.frameio.base_url, "https://api.frame.io/v2");
    }

    #[test]
    fn test_invalid_timeout() {
        let result = AppConfig::from_lookup(lookup(&[
            ("FRAMEIO_TOKEN", "t"),
            ("ANTHROPIC_API_KEY", "k"),
            ("REEL_SYNC_HTTP_TIMEOUT_SECS", "soon"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
