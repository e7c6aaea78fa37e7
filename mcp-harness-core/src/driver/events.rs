//! Merging of per-type page event sources.
//!
//! Backends usually expose one listener per event type. Polling those
//! listeners round-robin reorders everything that queued up while the consumer
//! was busy, so each source gets a forwarder task that moves events into one
//! shared channel as soon as they arrive.

use super::PageEvent;
use futures::channel::mpsc;
use futures::future::{self, BoxFuture};
use futures::stream::{BoxStream, Stream};
use futures::{FutureExt, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

/// An event whose conversion may still need a round trip to the backend.
pub type PendingEvent = BoxFuture<'static, PageEvent>;

/// Wrap an already converted event.
pub fn ready_event(event: PageEvent) -> PendingEvent {
    future::ready(event).boxed()
}

/// Merge event sources into a single stream ordered by arrival.
///
/// Pending conversions resolve one at a time in arrival order, so a slow
/// conversion holds back later events instead of being overtaken. Dropping
/// the returned stream stops the forwarders and releases the sources.
pub fn merge_page_events(
    sources: Vec<BoxStream<'static, PendingEvent>>,
) -> BoxStream<'static, PageEvent> {
    let (tx, rx) = mpsc::unbounded::<PendingEvent>();
    let forwarders = sources
        .into_iter()
        .map(|mut source| {
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(event) = source.next().await {
                    if tx.unbounded_send(event).is_err() {
                        break;
                    }
                }
            })
        })
        .collect();

    MergedEvents {
        inner: rx.then(|pending| pending).boxed(),
        forwarders,
    }
    .boxed()
}

struct MergedEvents {
    inner: BoxStream<'static, PageEvent>,
    forwarders: Vec<JoinHandle<()>>,
}

impl Stream for MergedEvents {
    type Item = PageEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<PageEvent>> {
        self.get_mut().inner.poll_next_unpin(cx)
    }
}

impl Drop for MergedEvents {
    fn drop(&mut self) {
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
    }
}
