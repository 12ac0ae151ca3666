//! Capture session
//!
//! ## Overview
//!
//! [`CaptureSession`] is the producer-side entry point. It owns the per-page
//! [`CaptureState`], the host binding and the [`TaskScheduler`] that runs all
//! capture work cooperatively:
//!
//! ```text
//!   discover() ──► Discover task (Normal) ──┐
//!                                            ├──► CaptureState ──► EventQueue ──► flush()
//!   handle()   ──► Mutation task (High)  ───┘         ▲
//!                        │ throttled                  │
//!                        ▼                            │
//!                  flush timer ──► replay batch ──────┘
//! ```
//!
//! ## Locking
//!
//! The state lock is only taken inside synchronous steps, never across an
//! await. Every step first checks that the page it was started for is still
//! the current one; a task from a previous page returns without touching the
//! new page's state.
//!
//! A task that panics is abandoned and reported as a `RunTask` diagnostic;
//! the scheduler moves on to the next task.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use super::extract::process_node;
use super::host::HostTree;
use super::metrics::MetricKey;
use super::region::{RegionInteraction, RegionVisibility};
use super::shadow::NodeRecord;
use super::state::CaptureState;
use super::task::{
    CostBucket, IdleSource, TaskCompletion, TaskKind, TaskPriority, TaskScheduler, TaskState,
    TaskTimer,
};
use crate::config::CaptureConfig;
use crate::error::{CaptureError, CaptureResult};
use crate::protocol::{Envelope, UploadMode, WirePayload, PROTOCOL_VERSION};
use crate::types::{EventType, HostNode, MutationBatch, NodeId, PrivacyLevel, Source};

/// Producer side of the protocol for one visitor session.
#[derive(Clone)]
pub struct CaptureSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: CaptureConfig,
    host: Arc<dyn HostTree>,
    scheduler: TaskScheduler,
    state: Mutex<CaptureState>,
    /// Set by a final flush, cleared by navigation
    closed: Mutex<bool>,
    started: Instant,
}

impl CaptureSession {
    /// Create a session reading from `host`.
    pub fn new(config: CaptureConfig, host: impl HostTree + 'static) -> CaptureResult<Self> {
        Self::with_host(config, Arc::new(host))
    }

    pub fn with_host(config: CaptureConfig, host: Arc<dyn HostTree>) -> CaptureResult<Self> {
        let scheduler = TaskScheduler::new(config.long_task_budget, config.idle_timeout, 1);
        Self::build(config, host, scheduler)
    }

    /// Create a session whose suspended tasks wait on a custom idle source.
    pub fn with_idle(
        config: CaptureConfig,
        host: Arc<dyn HostTree>,
        idle: Arc<dyn IdleSource>,
    ) -> CaptureResult<Self> {
        let scheduler =
            TaskScheduler::with_idle(config.long_task_budget, config.idle_timeout, 1, idle);
        Self::build(config, host, scheduler)
    }

    fn build(
        config: CaptureConfig,
        host: Arc<dyn HostTree>,
        scheduler: TaskScheduler,
    ) -> CaptureResult<Self> {
        config.validate()?;
        info!(
            project = %config.project_id,
            session = %config.session_id,
            "Starting capture session"
        );
        Ok(Self {
            inner: Arc::new(SessionInner {
                state: Mutex::new(CaptureState::new(&config, 1)),
                config,
                host,
                scheduler,
                closed: Mutex::new(false),
                started: Instant::now(),
            }),
        })
    }

    /// Mirror the whole host document and emit one `Discover` event.
    ///
    /// Must be called inside a tokio runtime.
    pub fn discover(&self) -> TaskCompletion {
        let page = self.inner.state.lock().page;
        let inner = self.inner.clone();
        self.inner.scheduler.schedule(
            TaskKind::Discover,
            TaskPriority::Normal,
            page,
            async move {
                let task = inner.clone().run_discover(page);
                inner.guarded("discover", task).await
            }
            .boxed(),
        )
    }

    /// Queue one delivered batch of change records for processing.
    ///
    /// Must be called inside a tokio runtime.
    pub fn handle(&self, batch: MutationBatch) -> TaskCompletion {
        let page = {
            let mut state = self.inner.state.lock();
            state.push_batch(batch);
            state.page
        };
        self.inner.schedule_mutations(page)
    }

    /// Append pending state for `event` to the outgoing queue.
    pub fn encode(&self, event: EventType) {
        let now = self.now();
        self.inner
            .state
            .lock()
            .encode(event, now, self.inner.host.as_ref());
    }

    /// Build the next payload from everything queued so far.
    ///
    /// A final payload closes the page; later flushes fail until the session
    /// navigates.
    pub fn flush(&self, is_final: bool) -> CaptureResult<String> {
        let mut closed = self.inner.closed.lock();
        if *closed {
            return Err(CaptureError::SessionClosed(self.inner.config.session_id.clone()));
        }

        let now = self.now();
        let payload = {
            let mut state = self.inner.state.lock();
            state.encode(EventType::Metric, now, self.inner.host.as_ref());
            state.sequence += 1;

            let envelope = Envelope {
                sequence: state.sequence,
                version: PROTOCOL_VERSION.to_string(),
                project_id: self.inner.config.project_id.clone(),
                user_id: self.inner.config.user_id.clone(),
                session_id: self.inner.config.session_id.clone(),
                page_id: state.page.to_string(),
                upload_mode: if is_final {
                    UploadMode::Beacon
                } else {
                    UploadMode::Async
                },
                is_final,
            };
            let lean = state.queue.is_lean();
            let (analysis, playback) = state.queue.drain();
            debug!(
                sequence = envelope.sequence,
                analysis = analysis.len(),
                playback = playback.len(),
                "Building payload"
            );
            WirePayload {
                e: envelope.to_tokens(),
                a: analysis,
                p: if lean || playback.is_empty() {
                    None
                } else {
                    Some(playback)
                },
            }
        };

        let json = serde_json::to_string(&payload)?;
        if is_final {
            *closed = true;
        }
        Ok(json)
    }

    /// Extend the active interaction window from now.
    pub fn mark_interaction(&self) {
        let now = self.now();
        self.inner.state.lock().mark_interaction(now);
    }

    /// Start a new page context and return its id.
    ///
    /// Queued tasks of the old page are discarded and running ones stop at
    /// their next checkpoint. Call [`discover`](Self::discover) again to
    /// mirror the new document.
    pub fn navigate(&self) -> u64 {
        let page = self.inner.state.lock().reset();
        self.inner.scheduler.reset(page);
        *self.inner.closed.lock() = false;
        page
    }

    /// Hold suspended tasks until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.inner.scheduler.pause();
    }

    pub fn resume(&self) {
        self.inner.scheduler.resume();
    }

    /// Wait until all queued work, pending throttle replays included, has run.
    pub async fn settle(&self) {
        self.inner.scheduler.wait_idle().await;
    }

    /// Report visibility and interaction for a region root.
    pub fn update_region(
        &self,
        id: NodeId,
        visibility: RegionVisibility,
        interaction: RegionInteraction,
    ) -> bool {
        self.inner
            .state
            .lock()
            .regions
            .update(id, visibility, interaction)
    }

    /// Pin the privacy level of a host node, applied when it is next processed.
    pub fn set_privacy(&self, node: HostNode, level: PrivacyLevel) {
        self.inner.state.lock().tree.set_privacy(node, level);
    }

    /// Snapshot of every shadow tree record, removed ones included.
    pub fn records(&self) -> Vec<NodeRecord> {
        self.inner.state.lock().tree.records().to_vec()
    }

    pub fn node_id(&self, node: HostNode) -> Option<NodeId> {
        self.inner.state.lock().tree.id_of(node)
    }

    /// Current value of a capture counter.
    pub fn metric(&self, key: MetricKey) -> i64 {
        self.inner.state.lock().metrics.get(key)
    }

    pub fn page(&self) -> u64 {
        self.inner.state.lock().page
    }

    /// Milliseconds since the session started.
    pub fn now(&self) -> u64 {
        self.inner.now()
    }
}

impl SessionInner {
    fn now(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn schedule_mutations(self: &Arc<Self>, page: u64) -> TaskCompletion {
        let inner = self.clone();
        self.scheduler.schedule(
            TaskKind::Mutation,
            TaskPriority::High,
            page,
            async move {
                let task = inner.clone().run_mutations(page);
                inner.guarded("mutation", task).await
            }
            .boxed(),
        )
    }

    /// Run a task body, turning a panic into a diagnostic.
    async fn guarded<F>(&self, name: &'static str, task: F) -> CaptureResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Err(panic) = AssertUnwindSafe(task).catch_unwind().await else {
            return Ok(());
        };
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic".to_string());
        let now = self.now();
        self.state.lock().task_error(name, &reason, now);
        Err(CaptureError::TaskFailed {
            task: name.to_string(),
            reason,
        })
    }

    /// Checkpoint between units of work. `false` means abandon the task.
    async fn checkpoint(&self, timer: &TaskTimer) -> bool {
        match self.scheduler.state(timer) {
            TaskState::Run => true,
            TaskState::Stop => false,
            TaskState::Wait => self.scheduler.suspend(timer).await == TaskState::Run,
        }
    }

    async fn run_discover(self: Arc<Self>, page: u64) {
        let timer = self.scheduler.start(CostBucket::Discover, page);
        let mut stack = vec![self.host.root()];
        while !stack.is_empty() {
            if !self.checkpoint(&timer).await || !self.discover_step(page, &mut stack) {
                self.scheduler.stop(&timer);
                return;
            }
        }
        self.finish(&timer, &[EventType::Discover, EventType::Document, EventType::Region]);
    }

    /// Process the next node of the discovery walk. `false` when the page
    /// changed.
    fn discover_step(&self, page: u64, stack: &mut Vec<HostNode>) -> bool {
        let mut state = self.state.lock();
        if state.page != page {
            return false;
        }
        let Some(node) = stack.pop() else {
            return true;
        };
        let host = self.host.as_ref();
        let result = process_node(&mut state.tree, host, node, Source::Discover)
            .and_then(|_| host.children(node));
        match result {
            Ok(children) => stack.extend(children.into_iter().rev()),
            Err(e) => state.host_error(&e, self.now()),
        }
        true
    }

    async fn run_mutations(self: Arc<Self>, page: u64) {
        let timer = self.scheduler.start(CostBucket::Mutation, page);
        loop {
            if !self.checkpoint(&timer).await {
                self.scheduler.stop(&timer);
                return;
            }
            match self.mutation_step(page) {
                Some(true) => {}
                Some(false) => break,
                None => {
                    self.scheduler.stop(&timer);
                    return;
                }
            }
        }
        self.finish(&timer, &[]);
    }

    /// Process the next change record. `None` when the page changed,
    /// `Some(false)` when nothing is left.
    fn mutation_step(self: &Arc<Self>, page: u64) -> Option<bool> {
        let mut state = self.state.lock();
        if state.page != page {
            return None;
        }
        let more = state.step_mutation(self.host.as_ref(), self.now());
        if state.history.has_throttled() && !state.flush_scheduled {
            state.flush_scheduled = true;
            self.spawn_flush(page);
        }
        Some(more)
    }

    /// Replay throttled changes once no new change was throttled for one
    /// flush delay.
    fn spawn_flush(self: &Arc<Self>, page: u64) {
        let guard = self.scheduler.hold();
        let inner = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let delay = inner.config.throttle_flush_delay;
            let delay_ms = delay.as_millis() as u64;
            loop {
                tokio::time::sleep(delay).await;
                let replayed = {
                    let mut state = inner.state.lock();
                    if state.page != page {
                        return;
                    }
                    let now = inner.now();
                    if now.saturating_sub(state.last_throttle) < delay_ms {
                        continue;
                    }
                    state.flush_scheduled = false;
                    state.push_replay(now)
                };
                if replayed > 0 {
                    inner.schedule_mutations(page);
                }
                return;
            }
        });
    }

    /// Account for a finished task and encode its events.
    fn finish(&self, timer: &TaskTimer, events: &[EventType]) {
        let cost = self.scheduler.stop(timer);
        let mut state = self.state.lock();
        if state.page != timer.page {
            return;
        }
        if let Some(cost) = cost {
            let ms = cost.as_millis() as i64;
            if timer.bucket == CostBucket::Discover {
                state.metrics.count(MetricKey::LayoutCost, ms);
            }
            state.metrics.count(MetricKey::TotalCost, ms);
        }
        state.metrics.count(MetricKey::InvokeCount, 1);

        let now = self.now();
        for event in events {
            state.encode(*event, now, self.host.as_ref());
        }
    }
}
