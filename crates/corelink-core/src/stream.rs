// ── Reactive control streams ──
//
// `Stream` adapters over the cache's notification channels, for consumers
// that prefer `StreamExt` combinators over raw channel receivers.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tracing::warn;

use crate::model::ControlState;

/// Stream of individual control changes.
///
/// A consumer that falls behind the delta channel skips the missed
/// changes (logged) and continues with current ones; the cache snapshot
/// is always available to resynchronize from.
pub struct ChangeStream {
    inner: BroadcastStream<Arc<ControlState>>,
}

impl ChangeStream {
    pub(crate) fn new(receiver: broadcast::Receiver<Arc<ControlState>>) -> Self {
        Self { inner: BroadcastStream::new(receiver) }
    }
}

impl Stream for ChangeStream {
    type Item = Arc<ControlState>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(state))) => return Poll::Ready(Some(state)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!(skipped, "change stream lagged");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// `Stream` of whole-cache snapshots, yielding a new name-sorted
/// `Arc<Vec<Arc<ControlState>>>` each time the cache mutates.
pub struct SnapshotStream {
    inner: WatchStream<Arc<Vec<Arc<ControlState>>>>,
}

impl SnapshotStream {
    pub(crate) fn new(receiver: watch::Receiver<Arc<Vec<Arc<ControlState>>>>) -> Self {
        Self { inner: WatchStream::new(receiver) }
    }
}

impl Stream for SnapshotStream {
    type Item = Arc<Vec<Arc<ControlState>>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
