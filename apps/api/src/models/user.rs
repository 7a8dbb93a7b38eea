use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub openid: String,
    pub nickname: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}
