//! Wraps a `kube::runtime::watcher` stream so that transport failures never
//! terminate the loop. Grounded in the teacher's `k8s/api/src/watch.rs`
//! `Watch` type; the backoff here is 5s per the reflector's failure-handling
//! contract rather than the teacher's 1s.

use futures::prelude::*;
use kube::runtime::watcher::{Error, Event};
use std::pin::Pin;
use std::time::Duration;
use tokio::time;
use tracing::{info, Instrument};

pub struct Watch<T> {
    span: tracing::Span,
    rx: Pin<Box<dyn Stream<Item = Result<Event<T>, Error>> + Send + 'static>>,
}

impl<T, W> From<W> for Watch<T>
where
    W: Stream<Item = Result<Event<T>, Error>> + Send + 'static,
{
    fn from(watch: W) -> Self {
        Self::new(watch.boxed())
    }
}

impl<T> Watch<T> {
    pub fn new(rx: Pin<Box<dyn Stream<Item = Result<Event<T>, Error>> + Send + 'static>>) -> Self {
        Self {
            rx,
            span: tracing::Span::current(),
        }
    }

    pub fn instrument(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Receives the next event, logging and backing off 5s before resuming
    /// the stream if it reports an error.
    pub async fn recv(&mut self) -> Event<T> {
        loop {
            let ev = self
                .rx
                .next()
                .instrument(self.span.clone())
                .await
                .expect("watch stream must not terminate");

            match ev {
                Ok(ev) => return ev,
                Err(error) => {
                    info!(parent: &self.span, %error, "watch failed");
                    time::sleep(Duration::from_secs(5)).await;
                    info!(parent: &self.span, "restarting watch");
                }
            }
        }
    }
}
