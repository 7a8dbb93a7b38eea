use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_LLM_BASE_URL: &str = "https://api.siliconflow.cn/v1";
const DEFAULT_LLM_MODEL: &str = "deepseek-ai/DeepSeek-V3";
const DEFAULT_TTS_MODEL: &str = "FunAudioLLM/CosyVoice2-0.5B";
const DEFAULT_TTS_VOICE: &str = "FunAudioLLM/CosyVoice2-0.5B:alex";
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;
const DEFAULT_TTS_TIMEOUT_SECS: u64 = 60;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub rust_log: String,
    pub log_format: LogFormat,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub wechat: WechatConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Connection settings for the chat-completion provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Bounds a buffered call, and the gap between chunks of a streamed one.
    pub timeout: Duration,
}

/// Connection settings for the speech synthesis provider.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub voice: String,
    /// Bounds the wait for the provider to answer, then each gap between audio chunks.
    pub timeout: Duration,
}

/// WeChat mini-program credentials. Both must be set for code exchange.
#[derive(Debug, Clone, Default)]
pub struct WechatConfig {
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
}

impl WechatConfig {
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.app_id, &self.app_secret) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let llm_api_key = require_env("LLM_API_KEY")?;
        let llm_base_url = optional_env("LLM_BASE_URL")
            .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string());
        let timeout_secs = parse_secs("LLM_TIMEOUT_SECS", DEFAULT_LLM_TIMEOUT_SECS)?;
        let tts_timeout_secs = parse_secs("TTS_TIMEOUT_SECS", DEFAULT_TTS_TIMEOUT_SECS)?;

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            port: optional_env("PORT")
                .unwrap_or_else(|| "8000".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: optional_env("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            log_format: match optional_env("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            tts: TtsConfig {
                api_key: optional_env("TTS_API_KEY").unwrap_or_else(|| llm_api_key.clone()),
                base_url: optional_env("TTS_BASE_URL").unwrap_or_else(|| llm_base_url.clone()),
                model: optional_env("TTS_MODEL").unwrap_or_else(|| DEFAULT_TTS_MODEL.to_string()),
                voice: optional_env("TTS_VOICE").unwrap_or_else(|| DEFAULT_TTS_VOICE.to_string()),
                timeout: Duration::from_secs(tts_timeout_secs),
            },
            llm: LlmConfig {
                api_key: llm_api_key,
                base_url: llm_base_url,
                model: optional_env("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
                timeout: Duration::from_secs(timeout_secs),
            },
            wechat: WechatConfig {
                app_id: optional_env("WECHAT_APP_ID"),
                app_secret: optional_env("WECHAT_APP_SECRET"),
            },
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_secs(key: &str, default: u64) -> Result<u64> {
    match optional_env(key) {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{key} must be a whole number of seconds")),
        None => Ok(default),
    }
}

/// Reads an optional variable, treating an empty value as unset.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wechat_credentials_require_both_values() {
        let partial = WechatConfig {
            app_id: Some("wx123".to_string()),
            app_secret: None,
        };
        assert!(partial.credentials().is_none());

        let full = WechatConfig {
            app_id: Some("wx123".to_string()),
            app_secret: Some("secret".to_string()),
        };
        assert_eq!(full.credentials(), Some(("wx123", "secret")));
    }

    #[test]
    fn test_default_wechat_config_has_no_credentials() {
        assert!(WechatConfig::default().credentials().is_none());
    }
}
