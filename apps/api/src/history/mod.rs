// Learning/quiz history and leaderboards.
// Plain create/read persistence plus in-process score aggregation.

pub mod handlers;
pub mod leaderboard;
pub mod records;
