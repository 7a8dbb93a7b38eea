//! Axum route handlers for learning/quiz history and leaderboards.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::history::leaderboard::{
    aggregate_scores, rank_entries, LeaderboardEntry, LearningCount, Period,
};
use crate::history::records::{
    display_name, insert_learning_records, insert_quiz_result, learning_counts_since,
    learning_history_by_openid, learning_history_by_user_name, non_blank, quiz_history,
    quiz_rows_since, RecordLearningRequest, SubmitQuizRequest,
};
use crate::identity::users::{find_user, nicknames_for};
use crate::models::history::{LearningRecordRow, QuizHistoryRow};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct RecordLearningResponse {
    pub status: &'static str,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct SubmitQuizResponse {
    pub status: &'static str,
    pub score: i32,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub openid: Option<String>,
    pub user_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuizHistoryQuery {
    pub openid: String,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(rename = "type", default = "default_period")]
    pub period: String,
}

fn default_period() -> String {
    "total".to_string()
}

impl LeaderboardQuery {
    fn period(&self) -> Result<Period, AppError> {
        Period::parse(&self.period).ok_or_else(|| {
            AppError::Validation(format!(
                "type must be one of total, weekly, daily (got '{}')",
                self.period
            ))
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/learning/records
pub async fn handle_record_learning(
    State(state): State<AppState>,
    Json(request): Json<RecordLearningRequest>,
) -> Result<Json<RecordLearningResponse>, AppError> {
    let openid = non_blank(&request.openid);
    let user_name = non_blank(&request.user_name);

    if openid.is_none() && user_name.is_none() {
        return Err(AppError::Validation(
            "Either openid or user_name is required".to_string(),
        ));
    }
    if request.words.is_empty() {
        return Err(AppError::Validation("words cannot be empty".to_string()));
    }

    let nickname = match openid {
        Some(id) => find_user(&state.db, id).await?.map(|u| u.nickname),
        None => None,
    };
    let name = display_name(nickname, user_name);

    let count = insert_learning_records(
        &state.db,
        &name,
        openid,
        &request.words,
        &request.source_level,
        &request.topic,
    )
    .await?;

    Ok(Json(RecordLearningResponse {
        status: "success",
        count,
    }))
}

/// GET /api/v1/learning/history?openid=…|user_name=…
pub async fn handle_learning_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<LearningRecordRow>>, AppError> {
    let records = match (non_blank(&params.openid), non_blank(&params.user_name)) {
        (Some(openid), _) => learning_history_by_openid(&state.db, openid).await?,
        (None, Some(user_name)) => learning_history_by_user_name(&state.db, user_name).await?,
        (None, None) => {
            return Err(AppError::Validation(
                "Either openid or user_name is required".to_string(),
            ))
        }
    };
    Ok(Json(records))
}

/// POST /api/v1/quiz/submit
pub async fn handle_submit_quiz(
    State(state): State<AppState>,
    Json(request): Json<SubmitQuizRequest>,
) -> Result<Json<SubmitQuizResponse>, AppError> {
    if request.score < 0 {
        return Err(AppError::Validation("score cannot be negative".to_string()));
    }

    let openid = non_blank(&request.openid);
    let nickname = match openid {
        Some(id) => find_user(&state.db, id).await?.map(|u| u.nickname),
        None => None,
    };
    let name = display_name(nickname, non_blank(&request.user_name));

    insert_quiz_result(&state.db, openid, &name, &request).await?;

    Ok(Json(SubmitQuizResponse {
        status: "success",
        score: request.score,
    }))
}

/// GET /api/v1/quiz/history?openid=…
pub async fn handle_quiz_history(
    State(state): State<AppState>,
    Query(params): Query<QuizHistoryQuery>,
) -> Result<Json<Vec<QuizHistoryRow>>, AppError> {
    let openid = params.openid.trim();
    if openid.is_empty() {
        return Err(AppError::Validation("openid cannot be empty".to_string()));
    }
    Ok(Json(quiz_history(&state.db, openid).await?))
}

/// GET /api/v1/leaderboard?type=total|weekly|daily
///
/// Quiz score totals over a rolling window, top 20.
pub async fn handle_leaderboard(
    State(state): State<AppState>,
    Query(params): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    let period = params.period()?;
    let now = Utc::now();

    let rows = quiz_rows_since(&state.db, period.rolling_since(now)).await?;
    let scores = aggregate_scores(&rows, period, now);

    let openids: Vec<String> = scores.iter().filter_map(|s| s.openid.clone()).collect();
    let nicknames = nicknames_for(&state.db, &openids).await?;

    Ok(Json(rank_entries(scores, &nicknames)))
}

/// GET /api/v1/leaderboard/learning?type=total|weekly|daily
///
/// Words learned per user since the start of the current day / week.
pub async fn handle_learning_leaderboard(
    State(state): State<AppState>,
    Query(params): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LearningCount>>, AppError> {
    let period = params.period()?;
    let counts = learning_counts_since(&state.db, period.calendar_start(Utc::now())).await?;
    Ok(Json(counts))
}
