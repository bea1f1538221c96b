use std::env;

use anyhow::{anyhow, Result};

use crate::classify::default_tag_vocabulary;

pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub telegram_token: String,
    pub telegram_api_base: String,
    pub webhook_secret: Option<String>,
    pub gemini_api_key: String,
    pub gemini_api_base: String,
    pub gemini_model: String,
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub tag_vocabulary: Vec<String>,
    pub telegram_timeout_ms: u64,
    pub gemini_timeout_ms: u64,
    pub supabase_timeout_ms: u64,
    pub max_request_bytes: Option<usize>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let telegram_token = require_env("TELEGRAM_BOT_TOKEN")?;
        let gemini_api_key = require_env("GEMINI_API_KEY")?;
        let supabase_url = normalize_base(require_env("SUPABASE_URL")?);
        let supabase_service_key = require_env("SUPABASE_SERVICE_ROLE_KEY")?;

        let telegram_api_base = optional_env("TELEGRAM_API_BASE")
            .map(normalize_base)
            .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string());
        let gemini_api_base = optional_env("GEMINI_API_BASE")
            .map(normalize_base)
            .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string());
        let gemini_model =
            optional_env("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());

        let webhook_secret = optional_env("TELEGRAM_WEBHOOK_SECRET");

        let tag_vocabulary = optional_env("NOTEDROP_TAG_VOCAB")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
            })
            .filter(|tags| !tags.is_empty())
            .unwrap_or_else(default_tag_vocabulary);

        let telegram_timeout_ms =
            parse_optional_u64("NOTEDROP_TELEGRAM_TIMEOUT_MS")?.unwrap_or(10_000);
        let gemini_timeout_ms = parse_optional_u64("NOTEDROP_GEMINI_TIMEOUT_MS")?.unwrap_or(25_000);
        let supabase_timeout_ms =
            parse_optional_u64("NOTEDROP_SUPABASE_TIMEOUT_MS")?.unwrap_or(10_000);
        let max_request_bytes =
            parse_optional_u64("NOTEDROP_MAX_REQUEST_BYTES")?.map(|v| v as usize);

        Ok(Self {
            telegram_token,
            telegram_api_base,
            webhook_secret,
            gemini_api_key,
            gemini_api_base,
            gemini_model,
            supabase_url,
            supabase_service_key,
            tag_vocabulary,
            telegram_timeout_ms,
            gemini_timeout_ms,
            supabase_timeout_ms,
            max_request_bytes,
        })
    }
}

fn require_env(var: &str) -> Result<String> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Ok(_) => Err(anyhow!("{} must not be empty", var)),
        Err(env::VarError::NotPresent) => Err(anyhow!("{} must be set", var)),
        Err(err) => Err(err.into()),
    }
}

fn optional_env(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

// Upstream bases are joined with path fragments; a trailing slash would
// produce double-slash URLs.
fn normalize_base(raw: String) -> String {
    raw.trim_end_matches('/').to_string()
}
