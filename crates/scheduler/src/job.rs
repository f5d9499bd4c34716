//! Thumbnail requests and their results.

use shelf_render::{RenderError, ThumbnailImage};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Identifies a renderable document.
///
/// The key is the document location handed to the rasterizer, and doubles
/// as the cache key and the in-flight dedup key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThumbnailKey(Arc<str>);

impl ThumbnailKey {
    pub fn new(location: impl AsRef<str>) -> Self {
        Self(Arc::from(location.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ThumbnailKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for ThumbnailKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThumbnailKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ThumbnailKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

/// Receives the result of a thumbnail request.
///
/// Sinks are called from whichever task finished the render, never while
/// the scheduler holds its internal lock, so they may call back into the
/// scheduler.
pub trait ThumbnailSink: Send + Sync {
    fn paint(&self, key: &ThumbnailKey, image: &ThumbnailImage);

    fn failed(&self, key: &ThumbnailKey, error: &RenderError) {
        let _ = (key, error);
    }
}

/// A request for one document's thumbnail.
#[derive(Clone)]
pub struct ThumbnailRequest {
    pub key: ThumbnailKey,
    pub width: u32,
    pub height: u32,
    pub sink: Option<Arc<dyn ThumbnailSink>>,
}

impl ThumbnailRequest {
    pub fn new(key: impl Into<ThumbnailKey>, width: u32, height: u32) -> Self {
        Self { key: key.into(), width, height, sink: None }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ThumbnailSink>) -> Self {
        self.sink = Some(sink);
        self
    }
}

impl fmt::Debug for ThumbnailRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailRequest")
            .field("key", &self.key)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Result of a thumbnail request.
#[derive(Debug, Clone)]
pub enum ThumbnailOutcome {
    Ready(ThumbnailImage),
    Failed(Arc<RenderError>),
}

impl ThumbnailOutcome {
    pub(crate) fn from_result(result: &Result<ThumbnailImage, Arc<RenderError>>) -> Self {
        match result {
            Ok(image) => Self::Ready(image.clone()),
            Err(err) => Self::Failed(Arc::clone(err)),
        }
    }

    pub(crate) fn abandoned() -> Self {
        Self::Failed(Arc::new(RenderError::Abandoned))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn image(&self) -> Option<&ThumbnailImage> {
        match self {
            Self::Ready(image) => Some(image),
            Self::Failed(_) => None,
        }
    }

    pub fn into_image(self) -> Option<ThumbnailImage> {
        match self {
            Self::Ready(image) => Some(image),
            Self::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RenderError> {
        match self {
            Self::Ready(_) => None,
            Self::Failed(err) => Some(err),
        }
    }
}

/// Where a job currently is in the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
}

/// How a submission was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketOrigin {
    /// Answered from the cache without queueing.
    Cached,
    /// Attached to a render that was already queued or running.
    Attached,
    /// Started a new render.
    Queued,
}

enum TicketInner {
    Ready(Option<ThumbnailOutcome>),
    Waiting(oneshot::Receiver<ThumbnailOutcome>),
}

/// Future returned by [`submit`](crate::ThumbnailScheduler::submit).
///
/// Dropping a ticket does not cancel the render.
#[must_use = "a ticket does nothing unless awaited; the render runs either way"]
pub struct ThumbnailTicket {
    key: ThumbnailKey,
    origin: TicketOrigin,
    inner: TicketInner,
}

impl ThumbnailTicket {
    pub(crate) fn ready(key: ThumbnailKey, outcome: ThumbnailOutcome) -> Self {
        Self { key, origin: TicketOrigin::Cached, inner: TicketInner::Ready(Some(outcome)) }
    }

    pub(crate) fn waiting(
        key: ThumbnailKey,
        origin: TicketOrigin,
        reply: oneshot::Receiver<ThumbnailOutcome>,
    ) -> Self {
        Self { key, origin, inner: TicketInner::Waiting(reply) }
    }

    pub fn key(&self) -> &ThumbnailKey {
        &self.key
    }

    pub fn origin(&self) -> TicketOrigin {
        self.origin
    }
}

impl fmt::Debug for ThumbnailTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailTicket")
            .field("key", &self.key)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl Future for ThumbnailTicket {
    type Output = ThumbnailOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            TicketInner::Ready(outcome) => {
                Poll::Ready(outcome.take().unwrap_or_else(ThumbnailOutcome::abandoned))
            }
            TicketInner::Waiting(reply) => Pin::new(reply)
                .poll(cx)
                .map(|received| received.unwrap_or_else(|_| ThumbnailOutcome::abandoned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_render::ThumbnailFormat;

    fn image() -> ThumbnailImage {
        ThumbnailImage::new(2, 2, ThumbnailFormat::Png, vec![1, 2, 3])
    }

    #[test]
    fn key_equality_is_by_location() {
        let a = ThumbnailKey::from("docs/a.pdf");
        let b = ThumbnailKey::from(String::from("docs/a.pdf"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "docs/a.pdf");
        assert_eq!(format!("{a:?}"), "\"docs/a.pdf\"");
    }

    #[test]
    fn outcome_accessors() {
        let ready = ThumbnailOutcome::Ready(image());
        assert!(ready.is_ready());
        assert!(ready.error().is_none());
        assert_eq!(ready.into_image(), Some(image()));

        let failed = ThumbnailOutcome::abandoned();
        assert!(!failed.is_ready());
        assert!(failed.image().is_none());
        assert!(matches!(failed.error(), Some(RenderError::Abandoned)));
    }

    #[tokio::test]
    async fn ready_ticket_resolves_immediately() {
        let ticket = ThumbnailTicket::ready("a".into(), ThumbnailOutcome::Ready(image()));
        assert_eq!(ticket.origin(), TicketOrigin::Cached);
        assert_eq!(ticket.await.into_image(), Some(image()));
    }

    #[tokio::test]
    async fn ticket_resolves_from_reply() {
        let (tx, rx) = oneshot::channel();
        let ticket = ThumbnailTicket::waiting("a".into(), TicketOrigin::Queued, rx);
        tx.send(ThumbnailOutcome::Ready(image())).unwrap();
        assert!(ticket.await.is_ready());
    }

    #[tokio::test]
    async fn dropped_reply_is_abandoned() {
        let (tx, rx) = oneshot::channel::<ThumbnailOutcome>();
        let ticket = ThumbnailTicket::waiting("a".into(), TicketOrigin::Attached, rx);
        drop(tx);
        assert!(matches!(ticket.await.error(), Some(RenderError::Abandoned)));
    }
}
