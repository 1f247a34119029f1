//! Single-resolution, multi-reader dependency futures.
//!
//! The background task is spawned once at construction. Every reader clones a
//! [`Shared`] handle, so resolving it never re-runs the work and a resolved
//! value is handed out without waiting.

use crate::error::{Result, TolkError};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A value produced once in the background and read by many chunks.
#[derive(Clone)]
pub struct DependencyFuture<T: Clone + Send + Sync + 'static> {
    name: &'static str,
    inner: Shared<BoxFuture<'static, T>>,
}

impl<T: Clone + Send + Sync + 'static> DependencyFuture<T> {
    /// Spawn `task` now. A failed or panicked task resolves to `default`.
    pub fn spawn<F>(name: &'static str, task: F, default: T) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let inner = async move {
            match handle.await {
                Ok(Ok(value)) => {
                    debug!("{} resolved", name);
                    value
                }
                Ok(Err(e)) => {
                    warn!("{} failed, continuing without it: {}", name, e);
                    default
                }
                Err(e) => {
                    warn!("{} task aborted, continuing without it: {}", name, e);
                    default
                }
            }
        }
        .boxed()
        .shared();

        Self { name, inner }
    }

    /// An already-resolved future.
    pub fn ready(name: &'static str, value: T) -> Self {
        let inner = futures::future::ready(value).boxed().shared();
        // Poll once so `peek` sees the value immediately.
        let _ = inner.clone().now_or_never();
        Self { name, inner }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for the value, or fail with `Cancelled` if the token fires first.
    pub async fn get(&self, cancel: &CancellationToken) -> Result<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TolkError::Cancelled(Duration::ZERO)),
            value = self.inner.clone() => Ok(value),
        }
    }

    /// The value, if it has already resolved.
    pub fn peek(&self) -> Option<T> {
        self.inner.peek().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_task_runs_once_for_many_readers() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let dep = DependencyFuture::spawn(
            "glossary",
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(vec!["term".to_string()])
            },
            Vec::new(),
        );

        let cancel = CancellationToken::new();
        let readers: Vec<_> = (0..8)
            .map(|_| {
                let dep = dep.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { dep.get(&cancel).await.unwrap() })
            })
            .collect();

        for reader in readers {
            assert_eq!(reader.await.unwrap(), vec!["term".to_string()]);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(dep.peek(), Some(vec!["term".to_string()]));
    }

    #[tokio::test]
    async fn test_failure_resolves_to_default() {
        let dep: DependencyFuture<Vec<String>> = DependencyFuture::spawn(
            "glossary",
            async { Err(TolkError::Provider("rate limited".into())) },
            vec!["user term".to_string()],
        );

        let value = dep.get(&CancellationToken::new()).await.unwrap();
        assert_eq!(value, vec!["user term".to_string()]);
    }

    #[tokio::test]
    async fn test_panic_resolves_to_default() {
        async fn explode() -> Result<u32> {
            panic!("boom")
        }

        let dep = DependencyFuture::spawn("speakers", explode(), 7);
        assert_eq!(dep.get(&CancellationToken::new()).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_slow_task() {
        let dep: DependencyFuture<u32> = DependencyFuture::spawn(
            "speakers",
            async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(1)
            },
            0,
        );

        let cancel = CancellationToken::new();
        let waiter = {
            let dep = dep.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { dep.get(&cancel).await })
        };
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.unwrap_err().is_cancelled());
        assert!(dep.peek().is_none());
    }

    #[tokio::test]
    async fn test_ready_is_resolved() {
        let dep = DependencyFuture::ready("glossary", 3u8);
        assert_eq!(dep.peek(), Some(3));
        tokio_test::assert_ok!(dep.get(&CancellationToken::new()).await);
    }
}
