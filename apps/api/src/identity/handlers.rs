use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::AppError;
use crate::identity::users::{create_user_if_missing, upsert_profile};
use crate::identity::{plan_login, LoginPlan, WechatError, CLOUD_SESSION_KEY, MOCK_SESSION_KEY};
use crate::state::AppState;

pub const OPENID_HEADER: &str = "x-wx-openid";

const CLOUD_DEFAULT_NICKNAME: &str = "WeChat User";
const MOCK_DEFAULT_NICKNAME: &str = "Test User";
const EXCHANGE_DEFAULT_NICKNAME: &str = "微信用户";

#[derive(Debug, Default, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "nickName")]
    pub nick_name: Option<String>,
    #[serde(rename = "avatarUrl")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub code: String,
    #[serde(rename = "userInfo", default)]
    pub user_info: Option<UserProfile>,
}

impl LoginRequest {
    fn nickname(&self) -> Option<&str> {
        self.user_info.as_ref().and_then(|p| p.nick_name.as_deref())
    }

    fn avatar_url(&self) -> Option<&str> {
        self.user_info.as_ref().and_then(|p| p.avatar_url.as_deref())
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub openid: String,
    pub session_key: String,
}

/// POST /api/v1/login
pub async fn handle_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let header_openid = headers
        .get(OPENID_HEADER)
        .and_then(|v| v.to_str().ok());

    let plan = plan_login(header_openid, &request.code, state.wechat.has_credentials());

    if plan == LoginPlan::Exchange && request.code.trim().is_empty() {
        return Err(AppError::Validation("code cannot be empty".to_string()));
    }

    let response = match plan {
        LoginPlan::Trusted { openid } => {
            create_user_if_missing(
                &state.db,
                &openid,
                request.nickname().unwrap_or(CLOUD_DEFAULT_NICKNAME),
                request.avatar_url().unwrap_or_default(),
            )
            .await?;
            LoginResponse {
                openid,
                session_key: CLOUD_SESSION_KEY.to_string(),
            }
        }
        LoginPlan::Mock { openid } => {
            create_user_if_missing(
                &state.db,
                &openid,
                request.nickname().unwrap_or(MOCK_DEFAULT_NICKNAME),
                request.avatar_url().unwrap_or_default(),
            )
            .await?;
            LoginResponse {
                openid,
                session_key: MOCK_SESSION_KEY.to_string(),
            }
        }
        LoginPlan::Exchange => {
            let session = state.wechat.code_to_session(&request.code).await?;
            upsert_profile(
                &state.db,
                &session.openid,
                EXCHANGE_DEFAULT_NICKNAME,
                request.nickname(),
                request.avatar_url(),
            )
            .await?;
            LoginResponse {
                openid: session.openid,
                session_key: session.session_key,
            }
        }
        LoginPlan::Unconfigured => return Err(WechatError::NotConfigured.into()),
    };

    info!("Login succeeded for {}", response.openid);
    Ok(Json(response))
}
