//! Leaderboard aggregation.
//!
//! Quiz scores are summed in-process over a rolling window (`now - created_at < window`).
//! Learning counts use calendar windows (start of the UTC day / ISO week) and are
//! grouped in SQL; only the window start is computed here.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use serde::Serialize;

use crate::models::history::QuizHistoryRow;

pub const LEADERBOARD_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Total,
    Weekly,
    Daily,
}

impl Period {
    pub fn parse(label: &str) -> Option<Period> {
        match label {
            "total" => Some(Period::Total),
            "weekly" => Some(Period::Weekly),
            "daily" => Some(Period::Daily),
            _ => None,
        }
    }

    /// Rolling window for quiz scores. `None` means all time.
    pub fn rolling_window(self) -> Option<Duration> {
        match self {
            Period::Total => None,
            Period::Weekly => Some(Duration::days(7)),
            Period::Daily => Some(Duration::days(1)),
        }
    }

    /// Calendar window start for learning counts: today 00:00 or Monday 00:00 (UTC).
    pub fn calendar_start(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let midnight = |d: DateTime<Utc>| d.date_naive().and_time(NaiveTime::MIN).and_utc();
        match self {
            Period::Total => None,
            Period::Daily => Some(midnight(now)),
            Period::Weekly => {
                let days_since_monday = now.weekday().num_days_from_monday() as i64;
                Some(midnight(now - Duration::days(days_since_monday)))
            }
        }
    }

    /// Earliest timestamp that can fall inside the rolling window.
    pub fn rolling_since(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.rolling_window().map(|w| now - w)
    }
}

/// Summed score for one player key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerScore {
    /// `openid:<id>`, or `name:<display name>` for rows without an openid.
    pub key: String,
    pub openid: Option<String>,
    /// Display name stored with the player's most recent row.
    pub stored_name: String,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub username: String,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LearningCount {
    pub user_name: String,
    pub count: i64,
}

/// Sums scores per player inside the window, highest first, capped at `LEADERBOARD_SIZE`.
/// Ties are ordered by key so the output is deterministic.
pub fn aggregate_scores(rows: &[QuizHistoryRow], period: Period, now: DateTime<Utc>) -> Vec<PlayerScore> {
    let window = period.rolling_window();
    let mut totals: HashMap<String, (PlayerScore, DateTime<Utc>)> = HashMap::new();

    for row in rows {
        if let Some(window) = window {
            if now - row.created_at >= window {
                continue;
            }
        }

        let key = player_key(row.openid.as_deref(), &row.user_name);
        let entry = totals.entry(key.clone()).or_insert_with(|| {
            (
                PlayerScore {
                    key,
                    openid: row.openid.clone(),
                    stored_name: row.user_name.clone(),
                    total: 0,
                },
                row.created_at,
            )
        });
        entry.0.total += i64::from(row.score);
        if row.created_at > entry.1 {
            entry.0.stored_name = row.user_name.clone();
            entry.1 = row.created_at;
        }
    }

    let mut scores: Vec<PlayerScore> = totals.into_values().map(|(score, _)| score).collect();
    scores.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.key.cmp(&b.key)));
    scores.truncate(LEADERBOARD_SIZE);
    scores
}

/// Separate namespaces so a display name can never collide with an openid.
fn player_key(openid: Option<&str>, user_name: &str) -> String {
    match openid {
        Some(id) => format!("openid:{id}"),
        None => format!("name:{user_name}"),
    }
}

/// Assigns ranks and display names. `nicknames` maps openid → current nickname.
pub fn rank_entries(scores: Vec<PlayerScore>, nicknames: &HashMap<String, String>) -> Vec<LeaderboardEntry> {
    scores
        .into_iter()
        .enumerate()
        .map(|(i, score)| LeaderboardEntry {
            rank: i as u32 + 1,
            username: display_name(&score, nicknames),
            score: score.total,
        })
        .collect()
}

fn display_name(score: &PlayerScore, nicknames: &HashMap<String, String>) -> String {
    if let Some(nickname) = score.openid.as_ref().and_then(|id| nicknames.get(id)) {
        return nickname.clone();
    }
    if !score.stored_name.trim().is_empty() {
        return score.stored_name.clone();
    }
    let id = score.openid.as_deref().unwrap_or(&score.stored_name);
    let tail: String = {
        let chars: Vec<char> = id.chars().collect();
        chars[chars.len().saturating_sub(4)..].iter().collect()
    };
    format!("User {tail}")
}
