use std::collections::HashMap;

use sqlx::PgPool;
use tracing::info;

use crate::models::user::User;

pub async fn find_user(pool: &PgPool, openid: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE openid = $1")
        .bind(openid)
        .fetch_optional(pool)
        .await
}

/// Creates the user if the openid is new. Existing profiles are left untouched.
pub async fn create_user_if_missing(
    pool: &PgPool,
    openid: &str,
    nickname: &str,
    avatar_url: &str,
) -> Result<(), sqlx::Error> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO users (openid, nickname, avatar_url)
        VALUES ($1, $2, $3)
        ON CONFLICT (openid) DO NOTHING
        "#,
    )
    .bind(openid)
    .bind(nickname)
    .bind(avatar_url)
    .execute(pool)
    .await?
    .rows_affected();

    if inserted > 0 {
        info!("Created user {openid}");
    }
    Ok(())
}

/// Creates the user, or refreshes nickname/avatar from whichever profile fields were sent.
pub async fn upsert_profile(
    pool: &PgPool,
    openid: &str,
    default_nickname: &str,
    nickname: Option<&str>,
    avatar_url: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO users (openid, nickname, avatar_url)
        VALUES ($1, $2, $3)
        ON CONFLICT (openid) DO UPDATE
        SET nickname = COALESCE($4, users.nickname),
            avatar_url = COALESCE($5, users.avatar_url)
        "#,
    )
    .bind(openid)
    .bind(nickname.unwrap_or(default_nickname))
    .bind(avatar_url.unwrap_or_default())
    .bind(nickname)
    .bind(avatar_url)
    .execute(pool)
    .await?;
    Ok(())
}

/// Nicknames for the given openids. Unknown openids are absent from the map.
pub async fn nicknames_for(
    pool: &PgPool,
    openids: &[String],
) -> Result<HashMap<String, String>, sqlx::Error> {
    if openids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT openid, nickname FROM users WHERE openid = ANY($1)")
            .bind(openids)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().collect())
}
