//! Lazy loading of card thumbnails
//!
//! A [`LazyLoadBinder`] sits between a view and the scheduler. The view
//! registers one card per document and reports visibility, either directly
//! with [`on_visible`](LazyLoadBinder::on_visible) or by handing over the
//! current viewport and card bounds. Each card submits at most one request
//! until its render completes or fails.
//!
//! Visibility follows the usual intersection-observer rules:
//! 1. The viewport is grown by a root margin (100 px by default)
//! 2. A card is visible when at least 10% of its area falls inside it

use crate::job::{ThumbnailKey, ThumbnailSink, ThumbnailTicket};
use crate::scheduler::ThumbnailScheduler;
use shelf_render::{Rasterizer, RenderError, ThumbnailImage};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Margin for grids of document cards.
pub const DEFAULT_ROOT_MARGIN: f32 = 100.0;
/// Tighter margin for grids of category tiles.
pub const CATEGORY_ROOT_MARGIN: f32 = 50.0;
pub const DEFAULT_THRESHOLD: f32 = 0.1;

/// Axis-aligned rectangle in view coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Grow the rectangle by `margin` on every side
    pub fn inflate(&self, margin: f32) -> Self {
        Self {
            x: self.x - margin,
            y: self.y - margin,
            width: self.width + 2.0 * margin,
            height: self.height + 2.0 * margin,
        }
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x_start = self.x.max(other.x);
        let y_start = self.y.max(other.y);
        let x_end = (self.x + self.width).min(other.x + other.width);
        let y_end = (self.y + self.height).min(other.y + other.height);

        if x_end > x_start && y_end > y_start {
            Some(Rect::new(x_start, y_start, x_end - x_start, y_end - y_start))
        } else {
            None
        }
    }

    /// Share of this rectangle's area inside `root`, 0.0 to 1.0
    pub fn intersection_ratio(&self, root: &Rect) -> f32 {
        let area = self.area();
        if area <= 0.0 {
            return 0.0;
        }
        self.intersection(root).map_or(0.0, |overlap| overlap.area() / area)
    }
}

/// Opaque identifier the view uses for a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CardId(pub u64);

/// Per-card loading state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Waiting to become visible
    Idle,
    /// A request has been submitted
    Loading,
    /// The thumbnail was painted
    Completed,
    /// The render failed; see [`LazyLoadBinder::rearm`]
    Failed,
}

struct Card {
    key: ThumbnailKey,
    /// Bumped every time the card is (re)observed
    generation: u64,
    bounds: Option<Rect>,
    state: LoadState,
    view: Arc<dyn ThumbnailSink>,
}

type Cards = Mutex<BTreeMap<CardId, Card>>;

fn lock(cards: &Cards) -> MutexGuard<'_, BTreeMap<CardId, Card>> {
    cards.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records the outcome on the card, then forwards it to the view.
struct CardGate {
    cards: Weak<Cards>,
    card: CardId,
    generation: u64,
}

impl CardGate {
    /// Returns the view to notify, or `None` if the card is gone or was
    /// re-observed since the request went out.
    fn settle(&self, state: LoadState) -> Option<Arc<dyn ThumbnailSink>> {
        let cards = self.cards.upgrade()?;
        let mut cards = lock(&cards);
        let card = cards.get_mut(&self.card)?;
        if card.generation != self.generation {
            return None;
        }
        card.state = state;
        Some(Arc::clone(&card.view))
    }
}

impl ThumbnailSink for CardGate {
    fn paint(&self, key: &ThumbnailKey, image: &ThumbnailImage) {
        if let Some(view) = self.settle(LoadState::Completed) {
            view.paint(key, image);
        }
    }

    fn failed(&self, key: &ThumbnailKey, error: &RenderError) {
        if let Some(view) = self.settle(LoadState::Failed) {
            view.failed(key, error);
        }
    }
}

/// Triggers one thumbnail request per card as cards scroll into view
pub struct LazyLoadBinder<R> {
    scheduler: ThumbnailScheduler<R>,
    cards: Arc<Cards>,
    next_generation: AtomicU64,
    root_margin: f32,
    threshold: f32,
}

impl<R: Rasterizer> LazyLoadBinder<R> {
    pub fn new(scheduler: ThumbnailScheduler<R>) -> Self {
        Self {
            scheduler,
            cards: Arc::new(Mutex::new(BTreeMap::new())),
            next_generation: AtomicU64::new(0),
            root_margin: DEFAULT_ROOT_MARGIN,
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn with_root_margin(mut self, margin: f32) -> Self {
        self.root_margin = margin;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn scheduler(&self) -> &ThumbnailScheduler<R> {
        &self.scheduler
    }

    /// Start tracking a card.
    ///
    /// Re-observing a card replaces it and resets it to `Idle`. A render
    /// still in flight for the old entry no longer reaches the card.
    pub fn observe(
        &self,
        card: CardId,
        key: impl Into<ThumbnailKey>,
        view: Arc<dyn ThumbnailSink>,
    ) {
        let key = key.into();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(card = card.0, key = %key, generation, "observing card");
        lock(&self.cards)
            .insert(card, Card { key, generation, bounds: None, state: LoadState::Idle, view });
    }

    /// Update where a card sits in view coordinates.
    pub fn set_bounds(&self, card: CardId, bounds: Rect) -> bool {
        match lock(&self.cards).get_mut(&card) {
            Some(entry) => {
                entry.bounds = Some(bounds);
                true
            }
            None => false,
        }
    }

    /// The card became visible.
    ///
    /// Submits a request if the card is `Idle` and returns its ticket.
    /// Returns `None` for unknown cards and cards that are already loading,
    /// loaded, or failed.
    pub fn on_visible(&self, card: CardId) -> Option<ThumbnailTicket> {
        // Claim the card before submitting: a cache hit paints synchronously
        // and the gate needs the lock back.
        let (key, generation) = {
            let mut cards = lock(&self.cards);
            let entry = cards.get_mut(&card)?;
            if entry.state != LoadState::Idle {
                return None;
            }
            entry.state = LoadState::Loading;
            (entry.key.clone(), entry.generation)
        };

        let gate = CardGate { cards: Arc::downgrade(&self.cards), card, generation };
        let request = self.scheduler.request(key).with_sink(Arc::new(gate));
        Some(self.scheduler.submit(request))
    }

    /// Submit every idle card whose bounds intersect `viewport`, in card order.
    pub fn update_viewport(&self, viewport: Rect) -> Vec<ThumbnailTicket> {
        let root = viewport.inflate(self.root_margin);

        let visible: Vec<CardId> = lock(&self.cards)
            .iter()
            .filter(|(_, card)| card.state == LoadState::Idle)
            .filter(|(_, card)| {
                card.bounds.is_some_and(|bounds| self.is_visible(&bounds, &root))
            })
            .map(|(id, _)| *id)
            .collect();

        visible.into_iter().filter_map(|card| self.on_visible(card)).collect()
    }

    fn is_visible(&self, bounds: &Rect, root: &Rect) -> bool {
        let ratio = bounds.intersection_ratio(root);
        ratio > 0.0 && ratio >= self.threshold
    }

    /// Make a failed card eligible for another request.
    pub fn rearm(&self, card: CardId) -> bool {
        match lock(&self.cards).get_mut(&card) {
            Some(entry) if entry.state == LoadState::Failed => {
                entry.state = LoadState::Idle;
                true
            }
            _ => false,
        }
    }

    pub fn state(&self, card: CardId) -> Option<LoadState> {
        lock(&self.cards).get(&card).map(|entry| entry.state)
    }

    /// Stop tracking a card. A render in flight still completes but no longer
    /// reaches the card's view.
    pub fn unobserve(&self, card: CardId) -> bool {
        lock(&self.cards).remove(&card).is_some()
    }

    /// Stop tracking every card.
    pub fn disconnect(&self) {
        let removed = std::mem::take(&mut *lock(&self.cards));
        tracing::debug!(cards = removed.len(), "disconnected lazy loader");
    }

    pub fn len(&self) -> usize {
        lock(&self.cards).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.cards).is_empty()
    }
}
