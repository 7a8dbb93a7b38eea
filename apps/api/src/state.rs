use sqlx::PgPool;

use crate::generation::generator::StoryGenerator;
use crate::identity::WechatClient;
use crate::tts::TtsClient;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Story and chat generation. Wraps the provider behind `ChatProvider` so tests can swap it.
    pub generator: StoryGenerator,
    pub tts: TtsClient,
    pub wechat: WechatClient,
}
