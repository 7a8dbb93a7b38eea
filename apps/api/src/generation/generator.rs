//! Story generation. Drives one request through the provider.
//!
//! Buffered:  Built → Sent → (Retrying ≤2× → Sent) → Validated | Failed
//! Streaming: Built → Sent → Streaming → Completed | Truncated
//!
//! The two paths differ: buffered output is validated before it
//! is returned, streamed fragments are relayed raw and never validated.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::{info, warn, Instrument, Span};

use crate::generation::validator::{validate, GenerationResult};
use crate::generation::GenerationError;
use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::llm_client::{ChatProvider, ChatRequest, LlmError};
use crate::retry::RetryPolicy;

/// 3 attempts total, 2 s apart.
pub const GENERATION_RETRY: RetryPolicy = RetryPolicy::fixed(3, Duration::from_secs(2));

/// Raw text fragments relayed to a streaming caller. May end early.
pub type TextStream = BoxStream<'static, String>;

/// Outcome of `StoryGenerator::generate`.
pub enum Generation {
    Buffered(GenerationResult),
    Streaming(TextStream),
}

#[derive(Clone)]
pub struct StoryGenerator {
    provider: Arc<dyn ChatProvider>,
    retry: RetryPolicy,
}

impl StoryGenerator {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self::with_retry(provider, GENERATION_RETRY)
    }

    pub fn with_retry(provider: Arc<dyn ChatProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    pub fn provider(&self) -> &Arc<dyn ChatProvider> {
        &self.provider
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Runs the prompt in the requested mode.
    pub async fn generate(&self, prompt: &str, stream: bool) -> Result<Generation, GenerationError> {
        if stream {
            Ok(Generation::Streaming(self.generate_stream(prompt).await))
        } else {
            self.generate_buffered(prompt).await.map(Generation::Buffered)
        }
    }

    /// Buffered call with bounded retry, then strict validation.
    ///
    /// Only provider failures are retried; a malformed answer fails at once.
    pub async fn generate_buffered(&self, prompt: &str) -> Result<GenerationResult, GenerationError> {
        let request = ChatRequest::json(JSON_ONLY_SYSTEM, prompt);
        let started = std::time::Instant::now();

        info!("Sending generation request (buffered)");
        let raw = self
            .retry
            .run(
                "Generation",
                |attempt| {
                    let provider = Arc::clone(&self.provider);
                    let request = &request;
                    async move {
                        if attempt > 1 {
                            info!("Re-sending generation request (attempt {attempt})");
                        }
                        provider.complete(request).await
                    }
                },
                LlmError::is_retryable,
            )
            .await
            .map_err(|e| {
                warn!("Generation failed after {:?}: {e}", started.elapsed());
                GenerationError::ProviderTransport(e)
            })?;

        info!(
            "Generation response received in {:.2}s ({} chars)",
            started.elapsed().as_secs_f64(),
            raw.len()
        );

        let result = validate(&raw)?;
        info!("Generation response validated");
        Ok(result)
    }

    /// Single streamed call, no retry. Fragments are relayed in arrival order.
    ///
    /// Failing to open the stream or failing mid-stream simply ends it. Dropping
    /// the returned stream drops the upstream response and closes the connection.
    pub async fn generate_stream(&self, prompt: &str) -> TextStream {
        let request = ChatRequest::json(JSON_ONLY_SYSTEM, prompt);

        info!("Sending generation request (streaming)");
        let upstream = match self.provider.stream(&request).await {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!("Generation stream could not be opened: {e}");
                return stream::empty().boxed();
            }
        };

        // The body is polled by the HTTP layer after the handler returns, so the
        // caller's span is carried along explicitly.
        let span = Span::current();
        stream::unfold(Some((upstream, 0usize)), move |state| {
            async move {
                let (mut upstream, relayed) = state?;
                match upstream.next().await {
                    Some(Ok(fragment)) => Some((fragment, Some((upstream, relayed + 1)))),
                    Some(Err(e)) => {
                        warn!("Generation stream truncated after {relayed} fragments: {e}");
                        None
                    }
                    None => {
                        info!("Generation stream completed after {relayed} fragments");
                        None
                    }
                }
            }
            .instrument(span.clone())
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::llm_client::FragmentStream;

    const VALID: &str = r#"{
        "content": "The **cat** sat.",
        "translation": "猫坐着。",
        "translation_map": {"cat": "猫"},
        "quiz": [
            {"question": "Who sat?", "options": ["cat", "dog", "cow", "pig"], "answer": "cat"},
            {"question": "Q2", "options": ["a", "b", "c", "d"], "answer": "a"},
            {"question": "Q3", "options": ["a", "b", "c", "d"], "answer": "d"}
        ]
    }"#;

    /// Replays scripted outcomes and counts calls.
    struct ScriptedProvider {
        buffered: Mutex<VecDeque<Result<String, LlmError>>>,
        fragments: Mutex<Option<Vec<Result<String, LlmError>>>>,
        calls: AtomicU32,
        stream_calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn buffered(outcomes: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                buffered: Mutex::new(outcomes.into()),
                fragments: Mutex::new(None),
                calls: AtomicU32::new(0),
                stream_calls: AtomicU32::new(0),
            })
        }

        fn streaming(fragments: Option<Vec<Result<String, LlmError>>>) -> Arc<Self> {
            Arc::new(Self {
                buffered: Mutex::new(VecDeque::new()),
                fragments: Mutex::new(fragments),
                calls: AtomicU32::new(0),
                stream_calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn complete(&self, _request: &ChatRequest) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.buffered
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyContent))
        }

        async fn stream(&self, _request: &ChatRequest) -> Result<FragmentStream, LlmError> {
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            match self.fragments.lock().unwrap().take() {
                Some(items) => Ok(stream::iter(items).boxed()),
                None => Err(LlmError::Api {
                    status: 503,
                    message: "unavailable".to_string(),
                }),
            }
        }
    }

    fn transport_error() -> LlmError {
        LlmError::Api {
            status: 502,
            message: "bad gateway".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds_with_three_attempts() {
        let provider = ScriptedProvider::buffered(vec![
            Err(transport_error()),
            Err(transport_error()),
            Ok(VALID.to_string()),
        ]);
        let generator = StoryGenerator::new(provider.clone());

        let result = generator.generate_buffered("prompt").await.unwrap();

        assert_eq!(result.quiz.len(), 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_propagate_without_fourth_attempt() {
        let provider = ScriptedProvider::buffered(vec![
            Err(transport_error()),
            Err(transport_error()),
            Err(transport_error()),
            Ok(VALID.to_string()),
        ]);
        let generator = StoryGenerator::new(provider.clone());

        let err = generator.generate_buffered("prompt").await.unwrap_err();

        assert!(matches!(err, GenerationError::ProviderTransport(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_two_seconds_between_attempts() {
        let provider = ScriptedProvider::buffered(vec![Err(transport_error()), Ok(VALID.to_string())]);
        let generator = StoryGenerator::new(provider);
        let started = tokio::time::Instant::now();

        generator.generate_buffered("prompt").await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_non_retryable_provider_error_fails_fast() {
        let provider = ScriptedProvider::buffered(vec![Err(LlmError::Api {
            status: 401,
            message: "invalid key".to_string(),
        })]);
        let generator = StoryGenerator::new(provider.clone());

        let err = generator.generate_buffered("prompt").await.unwrap_err();

        assert!(matches!(err, GenerationError::ProviderTransport(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_output_is_not_retried() {
        let provider = ScriptedProvider::buffered(vec![Ok("not json".to_string())]);
        let generator = StoryGenerator::new(provider.clone());

        let err = generator.generate_buffered("prompt").await.unwrap_err();

        assert!(matches!(err, GenerationError::MalformedResponse { .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_relays_fragments_in_order_without_validation() {
        let provider = ScriptedProvider::streaming(Some(vec![
            Ok("Hel".to_string()),
            Ok("lo".to_string()),
        ]));
        let generator = StoryGenerator::new(provider.clone());

        let fragments: Vec<String> = generator.generate_stream("prompt").await.collect().await;

        assert_eq!(fragments, vec!["Hel".to_string(), "lo".to_string()]);
        assert_eq!(fragments.concat(), "Hello");
        assert_eq!(provider.stream_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stream_ends_at_first_upstream_error() {
        let provider = ScriptedProvider::streaming(Some(vec![
            Ok("{\"content\": ".to_string()),
            Err(transport_error()),
            Ok("never".to_string()),
        ]));
        let generator = StoryGenerator::new(provider);

        let fragments: Vec<String> = generator.generate_stream("prompt").await.collect().await;

        assert_eq!(fragments, vec!["{\"content\": ".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_open_failure_yields_empty_stream_without_retry() {
        let provider = ScriptedProvider::streaming(None);
        let generator = StoryGenerator::new(provider.clone());

        let fragments: Vec<String> = generator.generate_stream("prompt").await.collect().await;

        assert!(fragments.is_empty());
        assert_eq!(provider.stream_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generate_dispatches_on_mode() {
        let provider = ScriptedProvider::buffered(vec![Ok(VALID.to_string())]);
        let generator = StoryGenerator::new(provider);
        assert!(matches!(
            generator.generate("prompt", false).await,
            Ok(Generation::Buffered(_))
        ));

        let provider = ScriptedProvider::streaming(Some(vec![Ok("x".to_string())]));
        let generator = StoryGenerator::new(provider);
        assert!(matches!(
            generator.generate("prompt", true).await,
            Ok(Generation::Streaming(_))
        ));
    }

    /// Sets its flag when the upstream body is dropped.
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Streams "tick" forever; the body owns a `DropFlag`.
    struct EndlessProvider {
        dropped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ChatProvider for EndlessProvider {
        async fn complete(&self, _request: &ChatRequest) -> Result<String, LlmError> {
            Err(LlmError::EmptyContent)
        }

        async fn stream(&self, _request: &ChatRequest) -> Result<FragmentStream, LlmError> {
            let guard = DropFlag(Arc::clone(&self.dropped));
            Ok(stream::repeat(())
                .map(move |_| {
                    let _body = &guard;
                    Ok("tick".to_string())
                })
                .boxed())
        }
    }

    #[tokio::test]
    async fn test_dropping_relayed_stream_drops_upstream_body() {
        let dropped = Arc::new(AtomicBool::new(false));
        let generator = StoryGenerator::new(Arc::new(EndlessProvider {
            dropped: Arc::clone(&dropped),
        }));

        let mut relayed = generator.generate_stream("prompt").await;
        assert_eq!(relayed.next().await.as_deref(), Some("tick"));
        assert!(!dropped.load(Ordering::SeqCst));

        drop(relayed);
        assert!(dropped.load(Ordering::SeqCst));
    }

    /// Records (enclosing span name, message) for every event.
    #[derive(Clone, Default)]
    struct SpanRecorder {
        events: Arc<Mutex<Vec<(Option<String>, String)>>>,
    }

    struct MessageVisitor(String);

    impl tracing::field::Visit for MessageVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{value:?}");
            }
        }
    }

    impl<S> tracing_subscriber::Layer<S> for SpanRecorder
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        fn on_event(&self, event: &tracing::Event<'_>, ctx: tracing_subscriber::layer::Context<'_, S>) {
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            let span = ctx.event_span(event).map(|s| s.name().to_string());
            self.events.lock().unwrap().push((span, visitor.0));
        }
    }

    #[tokio::test]
    async fn test_stream_end_is_logged_inside_request_span() {
        use tracing_subscriber::layer::SubscriberExt;

        let recorder = SpanRecorder::default();
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(recorder.clone()));

        let provider = ScriptedProvider::streaming(Some(vec![
            Ok("{".to_string()),
            Err(transport_error()),
        ]));
        let generator = StoryGenerator::new(provider);
        let span = tracing::info_span!("generation", request_id = "req-1");

        let relayed = generator.generate_stream("prompt").instrument(span).await;
        // Polled outside the span, the way the HTTP layer polls a response body.
        let fragments: Vec<String> = relayed.collect().await;
        assert_eq!(fragments, vec!["{".to_string()]);

        let events = recorder.events.lock().unwrap();
        let truncated = events
            .iter()
            .find(|(_, message)| message.starts_with("Generation stream truncated"))
            .expect("truncation is logged");
        assert_eq!(truncated.0.as_deref(), Some("generation"));
    }
}
