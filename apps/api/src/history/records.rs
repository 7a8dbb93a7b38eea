//! Learning and quiz history persistence. Append-only: rows are inserted and
//! read, never updated.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::info;

use crate::history::leaderboard::LearningCount;
use crate::models::history::{LearningRecordRow, QuizHistoryRow};

pub const UNKNOWN_USER: &str = "Unknown User";

#[derive(Debug, Clone, Deserialize)]
pub struct LearnedWord {
    pub word: String,
    pub meaning: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordLearningRequest {
    pub user_name: Option<String>,
    pub openid: Option<String>,
    pub words: Vec<LearnedWord>,
    pub source_level: String,
    pub topic: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitQuizRequest {
    pub user_name: Option<String>,
    pub openid: Option<String>,
    pub topic: String,
    pub level: String,
    pub score: i32,
}

/// Name stored alongside a history row: the registered nickname wins, then the
/// name the client sent, then a placeholder.
pub fn display_name(nickname: Option<String>, user_name: Option<&str>) -> String {
    nickname
        .or_else(|| {
            user_name
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| UNKNOWN_USER.to_string())
}

/// Treats blank strings from the client as absent.
pub fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Inserts one row per word in a single transaction. Returns the number of rows.
pub async fn insert_learning_records(
    pool: &PgPool,
    user_name: &str,
    openid: Option<&str>,
    words: &[LearnedWord],
    source_level: &str,
    topic: &str,
) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    for item in words {
        sqlx::query(
            r#"
            INSERT INTO learning_records (user_name, openid, word, meaning, source_level, topic)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user_name)
        .bind(openid)
        .bind(&item.word)
        .bind(&item.meaning)
        .bind(source_level)
        .bind(topic)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    info!("Recorded {} learned words for {user_name}", words.len());
    Ok(words.len() as u64)
}

pub async fn learning_history_by_openid(
    pool: &PgPool,
    openid: &str,
) -> Result<Vec<LearningRecordRow>, sqlx::Error> {
    sqlx::query_as::<_, LearningRecordRow>(
        "SELECT * FROM learning_records WHERE openid = $1 ORDER BY created_at DESC, id DESC",
    )
    .bind(openid)
    .fetch_all(pool)
    .await
}

pub async fn learning_history_by_user_name(
    pool: &PgPool,
    user_name: &str,
) -> Result<Vec<LearningRecordRow>, sqlx::Error> {
    sqlx::query_as::<_, LearningRecordRow>(
        "SELECT * FROM learning_records WHERE user_name = $1 ORDER BY created_at DESC, id DESC",
    )
    .bind(user_name)
    .fetch_all(pool)
    .await
}

pub async fn insert_quiz_result(
    pool: &PgPool,
    openid: Option<&str>,
    user_name: &str,
    request: &SubmitQuizRequest,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO quiz_history (openid, user_name, topic, level, score)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(openid)
    .bind(user_name)
    .bind(&request.topic)
    .bind(&request.level)
    .bind(request.score)
    .execute(pool)
    .await?;

    info!("Recorded quiz score {} for {user_name}", request.score);
    Ok(())
}

pub async fn quiz_history(pool: &PgPool, openid: &str) -> Result<Vec<QuizHistoryRow>, sqlx::Error> {
    sqlx::query_as::<_, QuizHistoryRow>(
        "SELECT * FROM quiz_history WHERE openid = $1 ORDER BY created_at DESC, id DESC",
    )
    .bind(openid)
    .fetch_all(pool)
    .await
}

/// Quiz rows created at or after `since` (all rows when `None`).
pub async fn quiz_rows_since(
    pool: &PgPool,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<QuizHistoryRow>, sqlx::Error> {
    sqlx::query_as::<_, QuizHistoryRow>(
        "SELECT * FROM quiz_history WHERE $1::timestamptz IS NULL OR created_at >= $1",
    )
    .bind(since)
    .fetch_all(pool)
    .await
}

/// Words learned per display name since `since`, most first.
pub async fn learning_counts_since(
    pool: &PgPool,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<LearningCount>, sqlx::Error> {
    sqlx::query_as::<_, LearningCount>(
        r#"
        SELECT user_name, COUNT(*) AS count
        FROM learning_records
        WHERE $1::timestamptz IS NULL OR created_at >= $1
        GROUP BY user_name
        ORDER BY count DESC, user_name ASC
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await
}
