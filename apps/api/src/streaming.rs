//! Idle timeout for streamed upstream bodies.
//!
//! A total request timeout would also cap long but healthy streams, so streamed
//! calls bound the gap between chunks instead.

use std::pin::Pin;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};

/// Relays `body` until it ends or goes `idle` without producing an item.
/// On idle, yields `on_idle(idle)` once and ends. Dropping the adapter drops `body`.
pub fn idle_timeout<S, T, E, F>(body: S, idle: Duration, on_idle: F) -> impl Stream<Item = Result<T, E>>
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    F: Fn(Duration) -> E + Send + 'static,
{
    let body: Option<Pin<Box<S>>> = Some(Box::pin(body));

    stream::unfold((body, on_idle), move |(body, on_idle)| async move {
        let mut body = body?;
        match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(item)) => Some((item, (Some(body), on_idle))),
            Ok(None) => None,
            Err(_) => {
                let err = on_idle(idle);
                Some((Err(err), (None, on_idle)))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Idle(Duration),
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_body_times_out_once() {
        let body = stream::iter(vec![Ok::<_, TestError>(1)]).chain(stream::pending());
        let items: Vec<Result<i32, TestError>> =
            idle_timeout(body, Duration::from_secs(5), TestError::Idle)
                .collect()
                .await;

        assert_eq!(items, vec![Ok(1), Err(TestError::Idle(Duration::from_secs(5)))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_but_steady_body_is_not_cut_off() {
        // 10 chunks, 3 s apart: 30 s total, never idle for 5 s.
        let body = stream::iter(0..10).then(|i| async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok::<_, TestError>(i)
        });
        let items: Vec<Result<i32, TestError>> =
            idle_timeout(body, Duration::from_secs(5), TestError::Idle)
                .collect()
                .await;

        assert_eq!(items.len(), 10);
        assert!(items.iter().all(Result::is_ok));
    }
}
