//! Stream combinators for recomputation on input change.
//!
//! [`combine_latest`] emits the latest value of every source whenever any
//! source emits. [`switch_map`] replaces (and thereby cancels) the inner
//! stream whenever the outer stream yields. Both are plain `Stream`
//! implementations over boxed streams, so dropping them drops every
//! subordinate stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::{BoxStream, Stream, StreamExt};

// =============================================================================
// Combine Latest
// =============================================================================

pub struct CombineLatest<T> {
    sources: Vec<Option<BoxStream<'static, T>>>,
    latest: Vec<Option<T>>,
    next_source: usize,
    empty_emitted: bool,
}

// No field is ever pinned structurally.
impl<T> Unpin for CombineLatest<T> {}

/// Emits a snapshot of the latest value of every source once all sources
/// have produced at least one value, then again on every further emission.
///
/// Completes when all sources completed, or as soon as one source completes
/// without ever emitting. Zero sources yield one empty snapshot.
pub fn combine_latest<T>(sources: Vec<BoxStream<'static, T>>) -> CombineLatest<T>
where
    T: Clone + Send + 'static,
{
    let latest = sources.iter().map(|_| None).collect();
    CombineLatest {
        sources: sources.into_iter().map(Some).collect(),
        latest,
        next_source: 0,
        empty_emitted: false,
    }
}

impl<T: Clone> CombineLatest<T> {
    fn snapshot(&self) -> Option<Vec<T>> {
        self.latest.iter().cloned().collect()
    }
}

impl<T: Clone> Stream for CombineLatest<T> {
    type Item = Vec<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let count = this.sources.len();
        if count == 0 {
            if this.empty_emitted {
                return Poll::Ready(None);
            }
            this.empty_emitted = true;
            return Poll::Ready(Some(Vec::new()));
        }

        loop {
            let mut progressed = false;
            for offset in 0..count {
                let index = (this.next_source + offset) % count;
                let Some(source) = this.sources[index].as_mut() else {
                    continue;
                };
                match source.poll_next_unpin(cx) {
                    Poll::Ready(Some(value)) => {
                        this.latest[index] = Some(value);
                        progressed = true;
                        if let Some(snapshot) = this.snapshot() {
                            this.next_source = (index + 1) % count;
                            return Poll::Ready(Some(snapshot));
                        }
                    }
                    Poll::Ready(None) => {
                        this.sources[index] = None;
                        if this.latest[index].is_none() {
                            this.sources.iter_mut().for_each(|s| *s = None);
                            return Poll::Ready(None);
                        }
                    }
                    Poll::Pending => {}
                }
            }
            if this.sources.iter().all(Option::is_none) {
                return Poll::Ready(None);
            }
            if !progressed {
                return Poll::Pending;
            }
        }
    }
}

// =============================================================================
// Switch Map
// =============================================================================

pub struct SwitchMap<T, U, F> {
    outer: Option<BoxStream<'static, T>>,
    inner: Option<BoxStream<'static, U>>,
    project: F,
}

// The projection is only ever called through `&mut`, never pinned.
impl<T, U, F> Unpin for SwitchMap<T, U, F> {}

/// Maps every outer item to an inner stream, dropping the previous inner
/// stream first. At most one inner stream is alive at any time.
///
/// Completes once the outer stream and the current inner stream completed.
pub fn switch_map<T, U, F>(outer: BoxStream<'static, T>, project: F) -> SwitchMap<T, U, F>
where
    F: FnMut(T) -> BoxStream<'static, U>,
{
    SwitchMap {
        outer: Some(outer),
        inner: None,
        project,
    }
}

impl<T, U, F> Stream for SwitchMap<T, U, F>
where
    F: FnMut(T) -> BoxStream<'static, U>,
{
    type Item = U;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<U>> {
        let this = self.get_mut();
        loop {
            let mut switched = false;
            if let Some(outer) = this.outer.as_mut() {
                match outer.poll_next_unpin(cx) {
                    Poll::Ready(Some(item)) => {
                        this.inner = None;
                        this.inner = Some((this.project)(item));
                        switched = true;
                    }
                    Poll::Ready(None) => this.outer = None,
                    Poll::Pending => {}
                }
            }
            if let Some(inner) = this.inner.as_mut() {
                match inner.poll_next_unpin(cx) {
                    Poll::Ready(Some(value)) => return Poll::Ready(Some(value)),
                    Poll::Ready(None) => this.inner = None,
                    Poll::Pending => {}
                }
            }
            if this.outer.is_none() && this.inner.is_none() {
                return Poll::Ready(None);
            }
            if !switched {
                return Poll::Pending;
            }
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Suppresses consecutive items the comparator considers identical.
pub fn distinct_until_changed<T, F>(source: BoxStream<'static, T>, mut same: F) -> BoxStream<'static, T>
where
    T: Clone + Send + 'static,
    F: FnMut(&T, &T) -> bool + Send + 'static,
{
    let mut last: Option<T> = None;
    source
        .filter(move |item| {
            let duplicate = last.as_ref().is_some_and(|previous| same(previous, item));
            if !duplicate {
                last = Some(item.clone());
            }
            futures_util::future::ready(!duplicate)
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn channel_stream<T: Send + 'static>() -> (mpsc::UnboundedSender<T>, BoxStream<'static, T>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stream = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed();
        (tx, stream)
    }

    /// Counts how many inner streams are currently alive.
    struct Guard(Arc<AtomicUsize>);

    impl Drop for Guard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_combine_latest_waits_for_all_sources() {
        let (tx_a, a) = channel_stream::<i32>();
        let (tx_b, b) = channel_stream::<i32>();
        let mut combined = combine_latest(vec![a, b]);

        tx_a.send(1).unwrap();
        let pending = tokio::time::timeout(Duration::from_millis(20), combined.next()).await;
        assert!(pending.is_err());

        tx_b.send(10).unwrap();
        assert_eq!(combined.next().await, Some(vec![1, 10]));
        tx_a.send(2).unwrap();
        assert_eq!(combined.next().await, Some(vec![2, 10]));
        tx_b.send(20).unwrap();
        assert_eq!(combined.next().await, Some(vec![2, 20]));

        drop(tx_a);
        drop(tx_b);
        assert_eq!(combined.next().await, None);
    }

    #[tokio::test]
    async fn test_combine_latest_emits_every_update() {
        let a = stream::iter(vec![1, 2, 3]).boxed();
        let b = stream::iter(vec![10]).boxed();
        let all: Vec<Vec<i32>> = combine_latest(vec![a, b]).collect().await;
        assert_eq!(all.last(), Some(&vec![3, 10]));
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_combine_latest_completes_when_source_is_empty() {
        let a = stream::iter(vec![1]).boxed();
        let b = stream::empty::<i32>().boxed();
        let all: Vec<Vec<i32>> = combine_latest(vec![a, b]).collect().await;
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_combine_latest_of_nothing_emits_empty_snapshot() {
        let all: Vec<Vec<i32>> = combine_latest(Vec::new()).collect().await;
        assert_eq!(all, vec![Vec::<i32>::new()]);
    }

    #[tokio::test]
    async fn test_switch_map_cancels_previous_inner_stream() {
        let alive = Arc::new(AtomicUsize::new(0));
        let (tx, outer) = channel_stream::<i32>();
        let counter = alive.clone();
        let mut switched = switch_map(outer, move |n: i32| {
            counter.fetch_add(1, Ordering::SeqCst);
            let guard = Guard(counter.clone());
            stream::iter(vec![n * 10])
                .chain(stream::pending())
                .map(move |v| {
                    let _keep = &guard;
                    v
                })
                .boxed()
        });

        tx.send(1).unwrap();
        assert_eq!(switched.next().await, Some(10));
        assert_eq!(alive.load(Ordering::SeqCst), 1);

        tx.send(2).unwrap();
        assert_eq!(switched.next().await, Some(20));
        assert_eq!(alive.load(Ordering::SeqCst), 1);

        drop(switched);
        assert_eq!(alive.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_switch_map_prefers_newest_outer_item() {
        let outer = stream::iter(vec![1, 2]).boxed();
        let all: Vec<i32> = switch_map(outer, |n: i32| stream::iter(vec![n, n + 100]).boxed())
            .collect()
            .await;
        // 101 is never seen: the second outer item replaced its stream first.
        assert_eq!(all, vec![1, 2, 102]);
    }

    #[tokio::test]
    async fn test_distinct_until_changed() {
        let source = stream::iter(vec![1, 1, 2, 2, 2, 1]).boxed();
        let all: Vec<i32> = distinct_until_changed(source, |a, b| a == b).collect().await;
        assert_eq!(all, vec![1, 2, 1]);
    }
}
