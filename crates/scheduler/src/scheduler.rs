//! Thumbnail job scheduler
//!
//! Accepts thumbnail requests, answers them from the cache when possible,
//! folds duplicate requests for the same key into one render and runs at
//! most `limit` renders at a time, in FIFO submission order.
//!
//! All bookkeeping happens under a single lock and never awaits. Sinks,
//! progress observers and tickets are notified after the lock is released.

use crate::config::ThumbnailConfig;
use crate::job::{
    JobState, ThumbnailKey, ThumbnailOutcome, ThumbnailRequest, ThumbnailSink, ThumbnailTicket,
    TicketOrigin,
};
use crate::progress::{ProgressReporter, ProgressSnapshot, Subscription};
use futures::FutureExt;
use shelf_cache::FifoCache;
use shelf_render::{Rasterizer, RenderError, ThumbnailImage};
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// Page rendered for every thumbnail.
pub const THUMBNAIL_PAGE: u32 = 0;

/// Host environment changes that throttle the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    /// The host went to the background.
    Hidden,
    /// The host is in the foreground again.
    Visible,
    /// Network connectivity was lost.
    Offline,
    /// Network connectivity is back.
    Online,
}

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total submissions, including cache hits and deduplicated ones
    pub submitted: u64,

    /// Submissions attached to a render that was already pending
    pub deduplicated: u64,

    /// Submissions answered from the cache
    pub cache_hits: u64,

    /// Renders that produced an image
    pub completed: u64,

    /// Renders that failed
    pub failed: u64,

    /// Jobs waiting for a slot
    pub queued: usize,

    /// Jobs currently rendering
    pub running: usize,

    /// Configured concurrency limit
    pub concurrency_limit: usize,

    /// Whether any pause reason is active
    pub paused: bool,

    /// Thumbnails currently cached
    pub cached: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("thumbnail scheduler needs a tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Independent reasons for holding new starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PauseReasons {
    manual: bool,
    hidden: bool,
    offline: bool,
}

impl PauseReasons {
    fn any(&self) -> bool {
        self.manual || self.hidden || self.offline
    }
}

struct Waiter {
    sink: Option<Arc<dyn ThumbnailSink>>,
    reply: oneshot::Sender<ThumbnailOutcome>,
}

struct PendingRender {
    width: u32,
    height: u32,
    state: JobState,
    waiters: Vec<Waiter>,
}

struct StartedJob {
    key: ThumbnailKey,
    width: u32,
    height: u32,
}

#[derive(Default)]
struct Counters {
    submitted: u64,
    deduplicated: u64,
    cache_hits: u64,
    completed: u64,
    failed: u64,
}

struct SchedulerState {
    /// Keys waiting to start, oldest first. Every key here is `Queued` in `pending`.
    queue: VecDeque<ThumbnailKey>,
    pending: HashMap<ThumbnailKey, PendingRender>,
    running: usize,
    limit: usize,
    pause: PauseReasons,
    cache: FifoCache<ThumbnailKey, ThumbnailImage>,
    counters: Counters,
}

impl SchedulerState {
    fn effective_limit(&self) -> usize {
        if self.pause.any() {
            0
        } else {
            self.limit
        }
    }

    /// Moves queued jobs to `Running` while slots are free.
    fn drain(&mut self) -> Vec<StartedJob> {
        let mut started = Vec::new();

        while self.running < self.effective_limit() {
            let Some(key) = self.queue.pop_front() else {
                break;
            };
            let Some(job) = self.pending.get_mut(&key) else {
                continue;
            };

            job.state = JobState::Running;
            self.running += 1;
            tracing::debug!(key = %key, running = self.running, "starting thumbnail render");
            started.push(StartedJob { key, width: job.width, height: job.height });
        }

        started
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot::from_counts(self.queue.len(), self.running)
    }
}

struct Shared<R> {
    rasterizer: R,
    runtime: Handle,
    target: (u32, u32),
    state: Mutex<SchedulerState>,
    progress: ProgressReporter,
}

impl<R: Rasterizer> Shared<R> {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves a progress sequence number. Call with the state lock held so
    /// sequence order matches state order.
    fn stamp(&self, state: &SchedulerState) -> (u64, ProgressSnapshot) {
        (self.progress.reserve(), state.snapshot())
    }

    fn start(self: &Arc<Self>, started: Vec<StartedJob>) {
        for StartedJob { key, width, height } in started {
            // Built outside the task so it also fires if the task never runs
            let mut guard = RenderGuard { shared: Arc::clone(self), key, finished: false };
            self.runtime.spawn(async move {
                let render = guard.shared.rasterizer.render(
                    guard.key.as_str(),
                    THUMBNAIL_PAGE,
                    width,
                    height,
                );
                let result = AssertUnwindSafe(render)
                    .catch_unwind()
                    .await
                    .unwrap_or(Err(RenderError::Panicked));
                guard.finish(result);
            });
        }
    }

    /// Settles a render. `start_next` is false when the runtime is going
    /// away and nothing more can be spawned.
    fn complete(
        self: &Arc<Self>,
        key: ThumbnailKey,
        result: Result<ThumbnailImage, RenderError>,
        start_next: bool,
    ) {
        let result = result.map_err(Arc::new);

        let (waiters, started, progress) = {
            let mut state = self.lock();
            state.running = state.running.saturating_sub(1);
            let waiters = state.pending.remove(&key).map(|job| job.waiters).unwrap_or_default();

            match &result {
                Ok(image) => {
                    state.cache.put(key.clone(), image.clone());
                    state.counters.completed += 1;
                }
                Err(_) => state.counters.failed += 1,
            }

            let started = if start_next { state.drain() } else { Vec::new() };
            let progress = self.stamp(&state);
            (waiters, started, progress)
        };

        match &result {
            Ok(image) => tracing::debug!(
                key = %key,
                width = image.width(),
                height = image.height(),
                waiters = waiters.len(),
                "thumbnail ready"
            ),
            Err(err) => tracing::warn!(key = %key, error = %err, "failed to generate thumbnail"),
        }

        self.start(started);

        for sink in waiters.iter().filter_map(|w| w.sink.as_ref()) {
            match &result {
                Ok(image) => sink.paint(&key, image),
                Err(err) => sink.failed(&key, err),
            }
        }

        self.progress.publish_ordered(progress.0, progress.1);

        let outcome = ThumbnailOutcome::from_result(&result);
        for waiter in waiters {
            // The caller may have dropped its ticket
            let _ = waiter.reply.send(outcome.clone());
        }
    }

    /// Applies `f` to the state, then starts whatever the new state allows.
    fn update<T>(self: &Arc<Self>, f: impl FnOnce(&mut SchedulerState) -> T) -> T {
        let (value, started, progress) = {
            let mut state = self.lock();
            let value = f(&mut *state);
            let started = state.drain();
            let progress = (!started.is_empty()).then(|| self.stamp(&state));
            (value, started, progress)
        };

        self.start(started);
        if let Some((seq, snapshot)) = progress {
            self.progress.publish_ordered(seq, snapshot);
        }
        value
    }

    fn set_pause(self: &Arc<Self>, reason: &'static str, f: impl FnOnce(&mut PauseReasons)) {
        let (before, after) = self.update(|state| {
            let before = state.pause;
            f(&mut state.pause);
            (before, state.pause)
        });

        if before.any() != after.any() {
            if after.any() {
                tracing::info!(reason, "thumbnail scheduler paused");
            } else {
                tracing::info!(reason, "thumbnail scheduler resumed");
            }
        } else if before != after {
            tracing::debug!(reason, paused = after.any(), "pause reasons changed");
        }
    }
}

/// Owns a running job's slot. Dropping it before [`finish`](Self::finish)
/// (the task was dropped with its runtime) fails the job as abandoned.
struct RenderGuard<R: Rasterizer> {
    shared: Arc<Shared<R>>,
    key: ThumbnailKey,
    finished: bool,
}

impl<R: Rasterizer> RenderGuard<R> {
    fn finish(&mut self, result: Result<ThumbnailImage, RenderError>) {
        self.finished = true;
        self.shared.complete(self.key.clone(), result, true);
    }
}

impl<R: Rasterizer> Drop for RenderGuard<R> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(key = %self.key, "render task dropped before completion");
            self.shared.complete(self.key.clone(), Err(RenderError::Abandoned), false);
        }
    }
}

/// Bounded-concurrency thumbnail scheduler.
///
/// Cloning is cheap and every clone drives the same queue and cache.
///
/// # Example
///
/// ```no_run
/// use shelf_render::EngineRasterizer;
/// use shelf_scheduler::{ThumbnailConfig, ThumbnailScheduler};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ThumbnailConfig::default();
/// let scheduler = ThumbnailScheduler::new(&config, EngineRasterizer::default())?;
///
/// let ticket = scheduler.submit(scheduler.request("docs/cover.pdf"));
/// if let Some(image) = ticket.await.into_image() {
///     println!("{}x{}", image.width(), image.height());
/// }
/// # Ok(())
/// # }
/// ```
pub struct ThumbnailScheduler<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for ThumbnailScheduler<R> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<R: Rasterizer> ThumbnailScheduler<R> {
    /// Create a scheduler on the current tokio runtime.
    pub fn new(config: &ThumbnailConfig, rasterizer: R) -> Result<Self, SchedulerError> {
        Ok(Self::with_runtime(config, rasterizer, Handle::try_current()?))
    }

    /// Create a scheduler that spawns renders on `runtime`.
    pub fn with_runtime(config: &ThumbnailConfig, rasterizer: R, runtime: Handle) -> Self {
        let state = SchedulerState {
            queue: VecDeque::new(),
            pending: HashMap::new(),
            running: 0,
            limit: config.max_concurrent,
            pause: PauseReasons::default(),
            cache: FifoCache::new(config.cache_capacity),
            counters: Counters::default(),
        };

        Self {
            shared: Arc::new(Shared {
                rasterizer,
                runtime,
                target: (config.target_width, config.target_height),
                state: Mutex::new(state),
                progress: ProgressReporter::new(),
            }),
        }
    }

    /// A request for `key` at the configured target size.
    pub fn request(&self, key: impl Into<ThumbnailKey>) -> ThumbnailRequest {
        let (width, height) = self.shared.target;
        ThumbnailRequest::new(key, width, height)
    }

    /// Submit a thumbnail request.
    ///
    /// A cached key is answered immediately and its sink painted before this
    /// returns. A key that is already queued or running gets attached to that
    /// render; the first request's dimensions are used. Anything else is
    /// queued and started as soon as a slot is free.
    pub fn submit(&self, request: ThumbnailRequest) -> ThumbnailTicket {
        let ThumbnailRequest { key, width, height, sink } = request;
        let shared = &self.shared;

        let mut state = shared.lock();
        state.counters.submitted += 1;

        if let Some(image) = state.cache.get(&key).cloned() {
            state.counters.cache_hits += 1;
            drop(state);

            tracing::trace!(key = %key, "thumbnail cache hit");
            if let Some(sink) = sink {
                sink.paint(&key, &image);
            }
            return ThumbnailTicket::ready(key, ThumbnailOutcome::Ready(image));
        }

        let (reply, receiver) = oneshot::channel();
        let waiter = Waiter { sink, reply };

        if let Some(job) = state.pending.get_mut(&key) {
            if (job.width, job.height) != (width, height) {
                tracing::debug!(
                    key = %key,
                    requested = ?(width, height),
                    rendering = ?(job.width, job.height),
                    "attaching to render with different dimensions"
                );
            }
            tracing::debug!(key = %key, state = ?job.state, "attached to pending render");
            job.waiters.push(waiter);
            state.counters.deduplicated += 1;
            return ThumbnailTicket::waiting(key, TicketOrigin::Attached, receiver);
        }

        state.pending.insert(
            key.clone(),
            PendingRender { width, height, state: JobState::Queued, waiters: vec![waiter] },
        );
        state.queue.push_back(key.clone());
        tracing::debug!(key = %key, queued = state.queue.len(), "queued thumbnail render");

        let started = state.drain();
        let (seq, snapshot) = shared.stamp(&state);
        drop(state);

        shared.start(started);
        shared.progress.publish_ordered(seq, snapshot);

        ThumbnailTicket::waiting(key, TicketOrigin::Queued, receiver)
    }

    /// Change the number of renders allowed in flight.
    ///
    /// Running renders are never interrupted; a lower limit only holds back
    /// new starts. Zero stops new starts entirely.
    pub fn set_concurrency_limit(&self, limit: usize) {
        let previous = self.shared.update(|state| std::mem::replace(&mut state.limit, limit));
        if previous != limit {
            tracing::info!(previous, limit, "thumbnail concurrency limit changed");
        }
    }

    pub fn concurrency_limit(&self) -> usize {
        self.shared.lock().limit
    }

    /// Hold new starts until [`resume`](Self::resume). In-flight renders finish.
    pub fn pause(&self) {
        self.shared.set_pause("manual", |pause| pause.manual = true);
    }

    /// Undo [`pause`](Self::pause). Host signals may still hold the queue.
    pub fn resume(&self) {
        self.shared.set_pause("manual", |pause| pause.manual = false);
    }

    /// React to the host going to the background or losing the network.
    pub fn on_host_signal(&self, signal: HostSignal) {
        match signal {
            HostSignal::Hidden => self.shared.set_pause("hidden", |pause| pause.hidden = true),
            HostSignal::Visible => self.shared.set_pause("hidden", |pause| pause.hidden = false),
            HostSignal::Offline => self.shared.set_pause("offline", |pause| pause.offline = true),
            HostSignal::Online => self.shared.set_pause("offline", |pause| pause.offline = false),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().pause.any()
    }

    /// Cached thumbnail for `key`, if any.
    pub fn cached(&self, key: &ThumbnailKey) -> Option<ThumbnailImage> {
        self.shared.lock().cache.get(key).cloned()
    }

    /// Whether `key` is queued or running.
    pub fn job_state(&self, key: &ThumbnailKey) -> Option<JobState> {
        self.shared.lock().pending.get(key).map(|job| job.state)
    }

    /// Drop every cached thumbnail, returning how many were released.
    pub fn clear_cache(&self) -> usize {
        let released = self.shared.lock().cache.drain().len();
        tracing::info!(released, "cleared thumbnail cache");
        released
    }

    /// Session-end hook.
    ///
    /// Pauses the scheduler, fails every queued job with
    /// [`RenderError::Abandoned`] and clears the cache. Renders already in
    /// flight still complete. Returns how many cached thumbnails were released.
    pub fn teardown(&self) -> usize {
        let shared = &self.shared;

        let (abandoned, released, (seq, snapshot)) = {
            let mut state = shared.lock();
            state.pause.manual = true;

            let queued: Vec<ThumbnailKey> = state.queue.drain(..).collect();
            let abandoned: Vec<(ThumbnailKey, Vec<Waiter>)> = queued
                .into_iter()
                .filter_map(|key| state.pending.remove(&key).map(|job| (key, job.waiters)))
                .collect();
            let released = state.cache.drain().len();
            (abandoned, released, shared.stamp(&state))
        };

        tracing::info!(abandoned = abandoned.len(), released, "thumbnail scheduler torn down");

        let error = RenderError::Abandoned;
        for (key, waiters) in &abandoned {
            for sink in waiters.iter().filter_map(|w| w.sink.as_ref()) {
                sink.failed(key, &error);
            }
        }

        shared.progress.publish_ordered(seq, snapshot);

        for (_, waiters) in abandoned {
            for waiter in waiters {
                let _ = waiter.reply.send(ThumbnailOutcome::abandoned());
            }
        }

        released
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.shared.lock();
        SchedulerStats {
            submitted: state.counters.submitted,
            deduplicated: state.counters.deduplicated,
            cache_hits: state.counters.cache_hits,
            completed: state.counters.completed,
            failed: state.counters.failed,
            queued: state.queue.len(),
            running: state.running,
            concurrency_limit: state.limit,
            paused: state.pause.any(),
            cached: state.cache.len(),
        }
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.shared.progress
    }

    /// Shorthand for `progress().subscribe(observer)`.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&ProgressSnapshot) + Send + Sync + 'static,
    {
        self.shared.progress.subscribe(observer)
    }

    pub fn rasterizer(&self) -> &R {
        &self.shared.rasterizer
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Controllable rasterizer for scheduling tests.

    use async_trait::async_trait;
    use shelf_render::{Rasterizer, RenderError, ThumbnailFormat, ThumbnailImage};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    type Gate = oneshot::Sender<Result<ThumbnailImage, RenderError>>;

    #[derive(Default)]
    struct FakeState {
        gated: bool,
        calls: Mutex<Vec<String>>,
        gates: Mutex<HashMap<String, Gate>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    /// Keys starting with `bad` fail and keys starting with `panic` panic.
    /// A gated rasterizer holds every render until [`finish`](Self::finish).
    #[derive(Clone, Default)]
    pub(crate) struct FakeRasterizer {
        state: Arc<FakeState>,
    }

    pub(crate) fn image(width: u32, height: u32) -> ThumbnailImage {
        ThumbnailImage::new(width, height, ThumbnailFormat::Png, vec![width as u8, height as u8])
    }

    impl FakeRasterizer {
        pub(crate) fn immediate() -> Self {
            Self::default()
        }

        pub(crate) fn gated() -> Self {
            Self { state: Arc::new(FakeState { gated: true, ..FakeState::default() }) }
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.state.calls.lock().unwrap().clone()
        }

        pub(crate) fn call_count(&self) -> usize {
            self.state.calls.lock().unwrap().len()
        }

        pub(crate) fn max_in_flight(&self) -> usize {
            self.state.max_in_flight.load(Ordering::SeqCst)
        }

        /// Release a gated render.
        pub(crate) fn finish(&self, key: &str, result: Result<ThumbnailImage, RenderError>) {
            let gate = self.state.gates.lock().unwrap().remove(key);
            let gate = gate.unwrap_or_else(|| panic!("no render in flight for {key}"));
            let _ = gate.send(result);
        }

        pub(crate) fn finish_ok(&self, key: &str) {
            self.finish(key, Ok(image(300, 400)));
        }
    }

    #[async_trait]
    impl Rasterizer for FakeRasterizer {
        async fn render(
            &self,
            location: &str,
            _page_index: u32,
            max_width: u32,
            max_height: u32,
        ) -> Result<ThumbnailImage, RenderError> {
            let state = &self.state;
            state.calls.lock().unwrap().push(location.to_owned());
            let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            state.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if location.starts_with("panic") {
                state.in_flight.fetch_sub(1, Ordering::SeqCst);
                panic!("rasterizer blew up on {location}");
            }

            let result = if state.gated {
                let (tx, rx) = oneshot::channel();
                state.gates.lock().unwrap().insert(location.to_owned(), tx);
                rx.await.unwrap_or(Err(RenderError::Abandoned))
            } else {
                tokio::task::yield_now().await;
                if location.starts_with("bad") {
                    Err(RenderError::Http {
                        location: location.to_owned(),
                        message: "HTTP 404 Not Found".to_owned(),
                    })
                } else {
                    Ok(image(max_width, max_height))
                }
            };

            state.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    /// Lets spawned tasks on the current-thread runtime run until they block.
    pub(crate) async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }
}
