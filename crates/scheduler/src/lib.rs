//! Shelf Scheduler Library
//!
//! Thumbnail pipeline: a bounded-concurrency job queue with in-flight
//! deduplication, a FIFO result cache, progress reporting and a lazy-load
//! binder for views.
//!
//! Jobs start in submission order, at most `max_concurrent` at a time. A
//! request for a key that is already cached resolves immediately; a request
//! for a key that is already queued or running shares that render. Failures
//! resolve the request's ticket with [`ThumbnailOutcome::Failed`] and never
//! stall the queue.
//!
//! # Example
//!
//! ```no_run
//! use shelf_render::EngineRasterizer;
//! use shelf_scheduler::{HostSignal, ThumbnailConfig, ThumbnailScheduler};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ThumbnailConfig::from_env()?;
//! let scheduler = ThumbnailScheduler::new(&config, EngineRasterizer::default())?;
//!
//! let _progress = scheduler.subscribe(|snapshot| {
//!     println!("{}% of {}", snapshot.percent, snapshot.total);
//! });
//!
//! let ticket = scheduler.submit(scheduler.request("docs/cover.pdf"));
//!
//! // Host went to the background: in-flight renders finish, nothing new starts
//! scheduler.on_host_signal(HostSignal::Hidden);
//! scheduler.on_host_signal(HostSignal::Visible);
//!
//! let outcome = ticket.await;
//! println!("ready: {}", outcome.is_ready());
//! # Ok(())
//! # }
//! ```

mod binder;
mod config;
mod job;
mod progress;
mod scheduler;

pub use binder::{
    CardId, LazyLoadBinder, LoadState, Rect, CATEGORY_ROOT_MARGIN, DEFAULT_ROOT_MARGIN,
    DEFAULT_THRESHOLD,
};
pub use config::{
    ConfigError, ThumbnailConfig, DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_CONCURRENT,
    DEFAULT_TARGET_HEIGHT, DEFAULT_TARGET_WIDTH,
};
pub use job::{
    JobState, ThumbnailKey, ThumbnailOutcome, ThumbnailRequest, ThumbnailSink, ThumbnailTicket,
    TicketOrigin,
};
pub use progress::{ProgressReporter, ProgressSnapshot, Subscription};
pub use scheduler::{
    HostSignal, SchedulerError, SchedulerStats, ThumbnailScheduler, THUMBNAIL_PAGE,
};
