use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LearningRecordRow {
    pub id: i64,
    pub user_name: String,
    pub openid: Option<String>,
    pub word: String,
    pub meaning: String,
    pub source_level: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuizHistoryRow {
    pub id: i64,
    pub openid: Option<String>,
    pub user_name: String,
    pub topic: String,
    pub level: String,
    pub score: i32,
    pub created_at: DateTime<Utc>,
}
