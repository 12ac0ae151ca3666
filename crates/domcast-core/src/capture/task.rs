//! Cooperative task scheduler
//!
//! ## Overview
//!
//! At most one capture task runs at a time. Tasks wait in a queue with two
//! lanes: [`TaskPriority::High`] jumps to the front, [`TaskPriority::Normal`]
//! appends. Queuing a task whose kind is already waiting joins the waiting
//! task instead of adding a second one.
//!
//! A running task measures its own cost through a [`TaskTimer`] and checks
//! [`TaskScheduler::state`] between units of work:
//!
//! ```text
//!            budget left                 budget spent
//!   ┌─────┐ ─────────────► Run   ┌─────┐ ─────────────► suspend()
//!   │ Run │                      │Wait │                   │
//!   └─────┘ ◄──────────────────  └─────┘ ◄── idle slice ◄──┘
//!      │        page changed                 (or timeout)
//!      └───────────────────────────► Stop
//! ```
//!
//! `suspend` records the cost so far, waits for the host to go idle (bounded
//! by the idle timeout), then restarts the timer with the budget the idle
//! slice reported. A task whose page context was replaced while it waited
//! observes [`TaskState::Stop`] and must return without touching state.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::CaptureResult;

/// Lane a task is queued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPriority {
    High,
    Normal,
}

/// Kind of work a task performs. Waiting tasks of the same kind are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Discover,
    Mutation,
}

/// Cost accounting bucket of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CostBucket {
    Discover,
    Mutation,
}

/// Scheduling decision at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Budget left: keep going
    Run,
    /// Budget spent: call `suspend`
    Wait,
    /// Context gone: abandon the task
    Stop,
}

/// Handle a running task uses to account for its cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskTimer {
    pub id: u64,
    pub bucket: CostBucket,
    /// Page context the task belongs to
    pub page: u64,
}

/// Time the host is expected to stay idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleDeadline {
    pub remaining: Duration,
}

/// Source of idle slices.
pub trait IdleSource: Send + Sync {
    /// Resolve when the host is idle, reporting how long it will stay so.
    fn idle(&self) -> BoxFuture<'static, IdleDeadline>;
}

/// Idle source for a tokio host: yields once to let other tasks run, then
/// grants a fixed slice.
#[derive(Debug, Clone, Copy)]
pub struct TokioIdle {
    slice: Duration,
}

impl TokioIdle {
    pub fn new(slice: Duration) -> Self {
        Self { slice }
    }
}

impl IdleSource for TokioIdle {
    fn idle(&self) -> BoxFuture<'static, IdleDeadline> {
        let remaining = self.slice;
        async move {
            tokio::task::yield_now().await;
            IdleDeadline { remaining }
        }
        .boxed()
    }
}

/// Resolves once the scheduled task has finished.
#[derive(Debug)]
pub struct TaskCompletion(oneshot::Receiver<()>);

impl TaskCompletion {
    /// Wait for the task. Returns `false` when it was discarded without
    /// running, for example because the page context changed.
    pub async fn completed(self) -> bool {
        self.0.await.is_ok()
    }
}

/// Keeps the scheduler busy while alive; [`TaskScheduler::wait_idle`] does not
/// return until every guard is dropped.
pub struct BusyGuard {
    inner: Arc<SchedulerInner>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.inner.release();
    }
}

struct QueuedTask {
    kind: TaskKind,
    page: u64,
    future: BoxFuture<'static, CaptureResult<()>>,
    done: Vec<oneshot::Sender<()>>,
}

struct Tracked {
    start: Instant,
    cost: Duration,
    budget: Duration,
}

struct SchedulerState {
    queue: VecDeque<QueuedTask>,
    running: bool,
    page: u64,
    next_timer: u64,
    tracker: HashMap<u64, Tracked>,
}

struct SchedulerInner {
    long_task_budget: Duration,
    idle_timeout: Duration,
    idle: Arc<dyn IdleSource>,
    state: Mutex<SchedulerState>,
    paused: watch::Sender<bool>,
    resumed: Notify,
    busy: watch::Sender<usize>,
}

/// Single-runner cooperative scheduler.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    pub fn new(long_task_budget: Duration, idle_timeout: Duration, page: u64) -> Self {
        Self::with_idle(
            long_task_budget,
            idle_timeout,
            page,
            Arc::new(TokioIdle::new(long_task_budget)),
        )
    }

    pub fn with_idle(
        long_task_budget: Duration,
        idle_timeout: Duration,
        page: u64,
        idle: Arc<dyn IdleSource>,
    ) -> Self {
        let (paused, _) = watch::channel(false);
        let (busy, _) = watch::channel(0);
        Self {
            inner: Arc::new(SchedulerInner {
                long_task_budget,
                idle_timeout,
                idle,
                state: Mutex::new(SchedulerState {
                    queue: VecDeque::new(),
                    running: false,
                    page,
                    next_timer: 1,
                    tracker: HashMap::new(),
                }),
                paused,
                resumed: Notify::new(),
                busy,
            }),
        }
    }

    /// Queue a task for `page`. Must be called inside a tokio runtime.
    pub fn schedule(
        &self,
        kind: TaskKind,
        priority: TaskPriority,
        page: u64,
        future: BoxFuture<'static, CaptureResult<()>>,
    ) -> TaskCompletion {
        let (tx, rx) = oneshot::channel();
        let spawn_runner = {
            let mut state = self.inner.state.lock();
            if let Some(waiting) = state
                .queue
                .iter_mut()
                .find(|t| t.kind == kind && t.page == page)
            {
                waiting.done.push(tx);
            } else {
                self.inner.busy.send_modify(|n| *n += 1);
                let task = QueuedTask {
                    kind,
                    page,
                    future,
                    done: vec![tx],
                };
                match priority {
                    TaskPriority::High => state.queue.push_front(task),
                    TaskPriority::Normal => state.queue.push_back(task),
                }
            }
            !std::mem::replace(&mut state.running, true)
        };

        if spawn_runner {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.run().await });
        }
        TaskCompletion(rx)
    }

    /// Start accounting for a task of `page`.
    pub fn start(&self, bucket: CostBucket, page: u64) -> TaskTimer {
        let mut state = self.inner.state.lock();
        let id = state.next_timer;
        state.next_timer += 1;
        state.tracker.insert(
            id,
            Tracked {
                start: Instant::now(),
                cost: Duration::ZERO,
                budget: self.inner.long_task_budget,
            },
        );
        TaskTimer { id, bucket, page }
    }

    /// Stop accounting and return the total cost, or `None` when the timer
    /// was dropped by a reset.
    pub fn stop(&self, timer: &TaskTimer) -> Option<Duration> {
        let mut state = self.inner.state.lock();
        state
            .tracker
            .remove(&timer.id)
            .map(|t| t.cost + t.start.elapsed())
    }

    /// Checkpoint decision for a running task.
    pub fn state(&self, timer: &TaskTimer) -> TaskState {
        let state = self.inner.state.lock();
        if state.page != timer.page {
            return TaskState::Stop;
        }
        match state.tracker.get(&timer.id) {
            Some(t) if t.start.elapsed() >= t.budget => TaskState::Wait,
            Some(_) => TaskState::Run,
            None => TaskState::Stop,
        }
    }

    /// Yield until the host is idle, then restart the timer.
    pub async fn suspend(&self, timer: &TaskTimer) -> TaskState {
        {
            let mut state = self.inner.state.lock();
            let Some(tracked) = state.tracker.get_mut(&timer.id) else {
                return TaskState::Stop;
            };
            tracked.cost += tracked.start.elapsed();
        }

        let was_paused = *self.inner.paused.borrow();
        let mut paused = self.inner.paused.subscribe();
        if paused.wait_for(|p| !*p).await.is_err() {
            return TaskState::Stop;
        }

        let budget = if was_paused {
            self.inner.long_task_budget
        } else {
            tokio::select! {
                result = tokio::time::timeout(self.inner.idle_timeout, self.inner.idle.idle()) => {
                    match result {
                        Ok(deadline) => deadline.remaining,
                        Err(_) => {
                            debug!(timer = timer.id, "Idle wait timed out");
                            self.inner.long_task_budget
                        }
                    }
                }
                _ = self.inner.resumed.notified() => self.inner.long_task_budget,
            }
        };

        let mut state = self.inner.state.lock();
        if state.page != timer.page {
            debug!(timer = timer.id, page = timer.page, "Dropping task from previous page");
            return TaskState::Stop;
        }
        match state.tracker.get_mut(&timer.id) {
            Some(tracked) => {
                tracked.start = Instant::now();
                tracked.budget = budget;
                TaskState::Run
            }
            None => TaskState::Stop,
        }
    }

    /// Enter a new page context: untrack every timer and discard queued
    /// tasks of older pages.
    pub fn reset(&self, page: u64) {
        let stale = {
            let mut state = self.inner.state.lock();
            state.page = page;
            state.tracker.clear();
            let queued = std::mem::take(&mut state.queue);
            let (keep, stale): (VecDeque<QueuedTask>, VecDeque<QueuedTask>) =
                queued.into_iter().partition(|t| t.page == page);
            state.queue = keep;
            stale
        };
        if !stale.is_empty() {
            debug!(discarded = stale.len(), page, "Discarded queued tasks");
        }
        for _ in stale {
            self.inner.release();
        }
        self.inner.resumed.notify_waiters();
    }

    /// Hold suspended tasks until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.inner.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.inner.paused.send_replace(false);
        self.inner.resumed.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow()
    }

    /// Mark the scheduler busy until the guard is dropped.
    pub fn hold(&self) -> BusyGuard {
        self.inner.busy.send_modify(|n| *n += 1);
        BusyGuard {
            inner: self.inner.clone(),
        }
    }

    /// Wait until no task is queued or running and no guard is held.
    pub async fn wait_idle(&self) {
        let mut busy = self.inner.busy.subscribe();
        let _ = busy.wait_for(|n| *n == 0).await;
    }

    pub fn page(&self) -> u64 {
        self.inner.state.lock().page
    }
}

impl SchedulerInner {
    async fn run(self: Arc<Self>) {
        loop {
            let (task, page) = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(task) => (task, state.page),
                    None => {
                        state.running = false;
                        return;
                    }
                }
            };

            let QueuedTask {
                kind,
                page: task_page,
                future,
                done,
            } = task;

            if task_page != page {
                debug!(?kind, task_page, page, "Discarding task from previous page");
                drop(done);
                self.release();
                continue;
            }

            if let Err(e) = future.await {
                warn!(?kind, error = %e, "Capture task failed");
            }
            for tx in done {
                let _ = tx.send(());
            }
            self.release();
        }
    }

    fn release(&self) {
        self.busy.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scheduler(budget: Duration) -> TaskScheduler {
        TaskScheduler::new(budget, Duration::from_millis(5000), 1)
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_run_in_priority_order() {
        let scheduler = scheduler(Duration::from_millis(30));
        let order = Arc::new(Mutex::new(Vec::new()));

        // Hold the runner so the next two tasks queue up behind it
        let guard = Arc::new(Notify::new());
        let blocker = guard.clone();
        let first = scheduler.schedule(
            TaskKind::Discover,
            TaskPriority::Normal,
            1,
            async move {
                blocker.notified().await;
                Ok(())
            }
            .boxed(),
        );
        tokio::task::yield_now().await;

        let log = order.clone();
        let normal = scheduler.schedule(
            TaskKind::Discover,
            TaskPriority::Normal,
            1,
            async move {
                log.lock().push("normal");
                Ok(())
            }
            .boxed(),
        );
        let log = order.clone();
        let high = scheduler.schedule(
            TaskKind::Mutation,
            TaskPriority::High,
            1,
            async move {
                log.lock().push("high");
                Ok(())
            }
            .boxed(),
        );

        guard.notify_one();
        assert!(first.completed().await);
        assert!(high.completed().await);
        assert!(normal.completed().await);
        assert_eq!(*order.lock(), vec!["high", "normal"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_task_of_same_kind_is_joined() {
        let scheduler = scheduler(Duration::from_millis(30));
        let runs = Arc::new(AtomicUsize::new(0));

        let gate = Arc::new(Notify::new());
        let blocker = gate.clone();
        let blocking = scheduler.schedule(
            TaskKind::Discover,
            TaskPriority::Normal,
            1,
            async move {
                blocker.notified().await;
                Ok(())
            }
            .boxed(),
        );
        tokio::task::yield_now().await;

        let mut completions = Vec::new();
        for _ in 0..3 {
            let counter = runs.clone();
            completions.push(scheduler.schedule(
                TaskKind::Mutation,
                TaskPriority::High,
                1,
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed(),
            ));
        }

        gate.notify_one();
        assert!(blocking.completed().await);
        for completion in completions {
            assert!(completion.completed().await);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        scheduler.wait_idle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_discards_queued_tasks() {
        let scheduler = scheduler(Duration::from_millis(30));
        let gate = Arc::new(Notify::new());
        let blocker = gate.clone();
        let running = scheduler.schedule(
            TaskKind::Discover,
            TaskPriority::Normal,
            1,
            async move {
                blocker.notified().await;
                Ok(())
            }
            .boxed(),
        );
        tokio::task::yield_now().await;
        let queued = scheduler.schedule(
            TaskKind::Mutation,
            TaskPriority::Normal,
            1,
            async { Ok(()) }.boxed(),
        );

        scheduler.reset(2);
        gate.notify_one();
        assert!(running.completed().await);
        assert!(!queued.completed().await);
        scheduler.wait_idle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_states() {
        let scheduler = scheduler(Duration::from_millis(30));
        let timer = scheduler.start(CostBucket::Mutation, 1);
        assert_eq!(scheduler.state(&timer), TaskState::Run);

        tokio::time::advance(Duration::from_millis(31)).await;
        assert_eq!(scheduler.state(&timer), TaskState::Wait);
        assert_eq!(scheduler.suspend(&timer).await, TaskState::Run);
        assert_eq!(scheduler.state(&timer), TaskState::Run);

        tokio::time::advance(Duration::from_millis(5)).await;
        let cost = scheduler.stop(&timer).unwrap();
        assert_eq!(cost, Duration::from_millis(36));
        assert_eq!(scheduler.state(&timer), TaskState::Stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_change_stops_suspended_task() {
        let scheduler = scheduler(Duration::ZERO);
        let timer = scheduler.start(CostBucket::Mutation, 1);
        scheduler.pause();

        let handle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.suspend(&timer).await })
        };
        tokio::task::yield_now().await;
        scheduler.reset(2);
        scheduler.resume();
        assert_eq!(handle.await.unwrap(), TaskState::Stop);
    }

    struct NeverIdle;

    impl IdleSource for NeverIdle {
        fn idle(&self) -> BoxFuture<'static, IdleDeadline> {
            futures::future::pending().boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_falls_back_to_default_budget() {
        let scheduler = TaskScheduler::with_idle(
            Duration::from_millis(30),
            Duration::from_millis(100),
            1,
            Arc::new(NeverIdle),
        );
        let timer = scheduler.start(CostBucket::Discover, 1);
        let started = Instant::now();
        assert_eq!(scheduler.suspend(&timer).await, TaskState::Run);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }
}
