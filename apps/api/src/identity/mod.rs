//! WeChat mini-program identity.
//!
//! Three ways to establish an openid, in priority order:
//! 1. `x-wx-openid` header injected by WeChat cloud hosting (trusted as-is)
//! 2. `test_` codes when no app credentials are configured (local development)
//! 3. `jscode2session` code exchange against the WeChat API

use std::time::Duration;

use anyhow::Context;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::config::WechatConfig;

pub mod handlers;
pub mod users;

const CODE2SESSION_URL: &str = "https://api.weixin.qq.com/sns/jscode2session";
const MOCK_CODE_PREFIX: &str = "test_";

pub const CLOUD_SESSION_KEY: &str = "cloud_hosted_session";
pub const MOCK_SESSION_KEY: &str = "mock_session_key";

#[derive(Debug, Error)]
pub enum WechatError {
    #[error("WeChat credentials not configured")]
    NotConfigured,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WeChat rejected the code: {errmsg} (errcode {errcode})")]
    Rejected { errcode: i64, errmsg: String },

    #[error("WeChat response missing field '{0}'")]
    MissingField(&'static str),
}

/// How a login request will be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginPlan {
    Trusted { openid: String },
    Mock { openid: String },
    Exchange,
    Unconfigured,
}

/// Decides the login path. Pure, so the priority rules are testable.
pub fn plan_login(header_openid: Option<&str>, code: &str, has_credentials: bool) -> LoginPlan {
    if let Some(openid) = header_openid.map(str::trim).filter(|s| !s.is_empty()) {
        return LoginPlan::Trusted {
            openid: openid.to_string(),
        };
    }
    if has_credentials {
        return LoginPlan::Exchange;
    }
    if code.starts_with(MOCK_CODE_PREFIX) {
        return LoginPlan::Mock {
            openid: format!("openid_{code}"),
        };
    }
    LoginPlan::Unconfigured
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WechatSession {
    pub openid: String,
    pub session_key: String,
}

#[derive(Debug, Deserialize)]
struct Code2SessionResponse {
    openid: Option<String>,
    session_key: Option<String>,
    #[serde(default)]
    errcode: i64,
    errmsg: Option<String>,
}

impl Code2SessionResponse {
    fn into_session(self) -> Result<WechatSession, WechatError> {
        if self.errcode != 0 {
            return Err(WechatError::Rejected {
                errcode: self.errcode,
                errmsg: self.errmsg.unwrap_or_default(),
            });
        }
        Ok(WechatSession {
            openid: self.openid.ok_or(WechatError::MissingField("openid"))?,
            session_key: self
                .session_key
                .ok_or(WechatError::MissingField("session_key"))?,
        })
    }
}

#[derive(Clone)]
pub struct WechatClient {
    client: Client,
    config: WechatConfig,
}

impl WechatClient {
    pub fn new(config: WechatConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build WeChat HTTP client")?;
        Ok(Self { client, config })
    }

    pub fn has_credentials(&self) -> bool {
        self.config.credentials().is_some()
    }

    /// Exchanges a `wx.login` code for the user's openid and session key.
    pub async fn code_to_session(&self, code: &str) -> Result<WechatSession, WechatError> {
        let (app_id, secret) = self.config.credentials().ok_or(WechatError::NotConfigured)?;

        let response: Code2SessionResponse = self
            .client
            .get(CODE2SESSION_URL)
            .query(&[
                ("appid", app_id),
                ("secret", secret),
                ("js_code", code),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?
            .json()
            .await?;

        let session = response.into_session()?;
        info!("WeChat code exchange succeeded");
        Ok(session)
    }
}
