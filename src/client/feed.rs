//! Cancellable notification feeds
//!
//! Both watch subscriptions and keep-alive streams are a backend-owned
//! producer pushing into an unbounded channel. The consumer side wraps the
//! receiver in a [`Feed`], which can be cancelled locally or through a
//! [`CancelHandle`] held by another task. Cancelling closes the channel, so
//! the producer notices (`Sender::closed`) and releases its server-side
//! resources. Items already queued are still handed out.

use futures_util::Stream;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Cancels a [`Feed`] from outside the task consuming it
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// Lazy, non-restartable sequence of items produced by a backend
#[derive(Debug)]
pub struct Feed<T> {
    rx: mpsc::UnboundedReceiver<T>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl<T> Feed<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            rx,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        }
    }

    /// Wait for the next item.
    ///
    /// Returns `None` once the feed is cancelled and drained, or when the
    /// producer went away (session closed, lease expired, stream ended).
    pub async fn next(&mut self) -> Option<T> {
        if *self.stop_rx.borrow_and_update() {
            self.rx.close();
            return self.rx.recv().await;
        }

        tokio::select! {
            biased;
            item = self.rx.recv() => item,
            _ = self.stop_rx.changed() => {
                self.rx.close();
                self.rx.recv().await
            }
        }
    }

    /// Stop the producer. Queued items remain readable.
    pub fn cancel(&mut self) {
        self.stop_tx.send_replace(true);
        self.rx.close();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.stop_tx.clone())
    }

    pub fn is_cancelled(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Adapt into a `Stream`; the stream ends where `next` would return `None`.
    pub fn into_stream(mut self) -> impl Stream<Item = T>
    where
        T: Send + 'static,
    {
        async_stream::stream! {
            while let Some(item) = self.next().await {
                yield item;
            }
        }
    }
}
