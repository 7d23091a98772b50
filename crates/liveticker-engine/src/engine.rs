use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use liveticker_core::{Event, Lineup, ScheduleMap, TeamNames, TickerMode};
use reqwest::Url;
use tokio::sync::{Notify, broadcast};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::api::{
    Collaborators, EngineConfig, EngineEvent, EngineHandle, JobKind, JobOutcome, JobStatus,
    StatusSnapshot, TickerPhase,
};
use crate::error::TickerError;
use crate::format;
use crate::processor;
use crate::queue::{Job, JobQueue};
use crate::registry::{SeenRetention, TickerRegistry};
use crate::scheduler::RoundRobin;

const DEFAULT_GROUP_LABEL: &str = "Live ticker";

/// Everything guarded by the state lock.
#[derive(Debug, Default)]
pub(crate) struct EngineState {
    pub(crate) registry: TickerRegistry,
    pub(crate) queue: JobQueue,
    /// Persisted start times of tickers in `Scheduled`.
    pub(crate) schedules: ScheduleMap,
    pub(crate) round_robin: RoundRobin,
}

pub(crate) struct EngineInner {
    pub(crate) cfg: EngineConfig,
    pub(crate) collab: Collaborators,
    pub(crate) event_tx: broadcast::Sender<EngineEvent>,
    state: Mutex<EngineState>,
    /// Serialises snapshot saves so an older map never overwrites a newer one.
    persist_lock: tokio::sync::Mutex<()>,
    active_workers: AtomicUsize,
    idle: Notify,
    stop_requested: AtomicBool,
    notify: Notify,
}

/// Releases a worker slot on every exit path, including panics.
struct WorkerSlot {
    inner: Arc<EngineInner>,
    poll_chat: Option<String>,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        if let Some(chat_id) = self.poll_chat.take() {
            self.inner.lock().queue.finish_poll(&chat_id);
        }
        self.inner.release_worker();
    }
}

/// What the end-of-game sequence needs once the state lock is gone.
pub(crate) struct WindDown {
    pub(crate) chat_id: String,
    pub(crate) generation: u64,
    pub(crate) events: Vec<Event>,
    pub(crate) teams: TeamNames,
    pub(crate) group_label: String,
    pub(crate) lineup: Lineup,
    pub(crate) final_score: Option<String>,
}

fn validate_request(
    resource_locator: &str,
    chat_id: &str,
    group_label: &str,
) -> Result<(String, String, String), TickerError> {
    let chat_id = chat_id.trim();
    if chat_id.is_empty() {
        return Err(TickerError::Validation("chat id is empty".to_string()));
    }
    if chat_id.chars().any(char::is_whitespace) {
        return Err(TickerError::Validation(format!(
            "chat id {chat_id:?} contains whitespace"
        )));
    }

    let locator = resource_locator.trim();
    let url = Url::parse(locator)
        .map_err(|err| TickerError::Validation(format!("invalid feed url {locator:?}: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(TickerError::Validation(format!(
            "feed url must be an absolute http(s) url, got {locator:?}"
        )));
    }

    let label = match group_label.trim() {
        "" => DEFAULT_GROUP_LABEL,
        label => label,
    };
    Ok((chat_id.to_string(), locator.to_string(), label.to_string()))
}

impl EngineInner {
    pub(crate) fn new(cfg: EngineConfig, collab: Collaborators) -> Self {
        let (event_tx, _) = broadcast::channel::<EngineEvent>(1024);
        Self {
            cfg,
            collab,
            event_tx,
            state: Mutex::new(EngineState::default()),
            persist_lock: tokio::sync::Mutex::new(()),
            active_workers: AtomicUsize::new(0),
            idle: Notify::new(),
            stop_requested: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// The state lock. A panic while holding it leaves consistent-enough state
    /// behind, so poisoning is ignored.
    pub(crate) fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn request_stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            self.emit(EngineEvent::StopRequested);
            self.notify.notify_one();
        }
    }

    pub(crate) fn should_stop(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn warn(&self, message: String) {
        warn!("{message}");
        self.emit(EngineEvent::Warning { message });
    }

    pub(crate) fn status(&self) -> StatusSnapshot {
        let state = self.lock();
        StatusSnapshot {
            stop_requested: self.should_stop(),
            active_workers: self.active_workers.load(Ordering::SeqCst),
            queued_jobs: state.queue.len(),
            tickers: state.registry.summaries(),
        }
    }

    pub(crate) fn create_ticker(
        &self,
        resource_locator: &str,
        chat_id: &str,
        group_label: &str,
        mode: TickerMode,
    ) -> Result<(), TickerError> {
        if self.should_stop() {
            return Err(TickerError::EngineStopped);
        }
        let (chat_id, locator, label) = validate_request(resource_locator, chat_id, group_label)?;

        // Registration and the schedule job go in under one lock so a second
        // create for the same chat always sees the first.
        {
            let mut state = self.lock();
            let generation = state.registry.create(&chat_id, &locator, &label, mode)?;
            state.queue.push_schedule(&chat_id, generation, &locator);
        }

        info!(chat_id = %chat_id, %mode, locator = %locator, "ticker created");
        self.emit(EngineEvent::TickerCreated { chat_id, mode });
        Ok(())
    }

    pub(crate) async fn stop_ticker(&self, chat_id: &str) -> bool {
        self.teardown(chat_id.trim(), SeenRetention::Keep).await
    }

    pub(crate) async fn reset_ticker(&self, chat_id: &str) -> bool {
        self.teardown(chat_id.trim(), SeenRetention::Forget).await
    }

    async fn teardown(&self, chat_id: &str, retention: SeenRetention) -> bool {
        let (removed, schedule_changed, forgot) = {
            let mut state = self.lock();
            let dropped_jobs = state.queue.remove_chat(chat_id);
            let schedule_changed = state.schedules.remove(chat_id).is_some();
            let removed = state.registry.remove(chat_id, retention).is_some();
            let forgot = retention == SeenRetention::Forget && state.registry.forget_seen(chat_id);
            if dropped_jobs > 0 {
                debug!(chat_id, dropped_jobs, "queued jobs dropped");
            }
            (removed, schedule_changed, forgot)
        };

        if schedule_changed {
            self.persist_schedules().await;
        }
        if removed || forgot {
            self.persist_seen().await;
        }
        if removed {
            info!(chat_id, ?retention, "ticker removed");
            self.emit(EngineEvent::TickerRemoved {
                chat_id: chat_id.to_string(),
            });
        }
        removed || schedule_changed || forgot
    }

    pub(crate) async fn persist_seen(&self) {
        let _guard = self.persist_lock.lock().await;
        let seen = {
            let state = self.lock();
            state.registry.seen_map()
        };
        if let Err(err) = self.collab.store.save_seen(&seen).await {
            self.warn(format!("failed to persist seen events: {err}"));
        }
    }

    pub(crate) async fn persist_schedules(&self) {
        let _guard = self.persist_lock.lock().await;
        let schedules = {
            let state = self.lock();
            state.schedules.clone()
        };
        if let Err(err) = self.collab.store.save_schedules(&schedules).await {
            self.warn(format!("failed to persist schedules: {err}"));
        }
    }

    /// Send one message. Failures only affect that message.
    pub(crate) async fn deliver(&self, chat_id: &str, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        if let Err(err) = self.collab.messenger.send(chat_id, text).await {
            warn!(chat_id, "message delivery failed: {err}");
        }
    }

    /// Move a ticker into `Polling`. Safe to call repeatedly and from a timer
    /// that lost a race with stop/reset: a different generation, a missing
    /// ticker or one that is already polling makes this a no-op.
    pub(crate) async fn begin_polling(
        self: &Arc<Self>,
        chat_id: &str,
        generation: Option<u64>,
    ) -> bool {
        let (generation, mode, locator, schedule_changed) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let Some(ticker) = state.registry.get_mut(chat_id) else {
                return false;
            };
            if generation.is_some_and(|g| g != ticker.generation)
                || matches!(ticker.phase, TickerPhase::Polling | TickerPhase::Terminated)
            {
                return false;
            }
            ticker.phase = TickerPhase::Polling;
            ticker.start_time = None;
            // May be the caller; it finishes on its own.
            ticker.schedule_timer.release();
            if ticker.mode == TickerMode::Recap {
                ticker
                    .recap_timer
                    .arm(self.spawn_recap_timer(chat_id, ticker.generation));
            }
            (
                ticker.generation,
                ticker.mode,
                ticker.resource_locator.clone(),
                state.schedules.remove(chat_id).is_some(),
            )
        };

        if schedule_changed {
            self.persist_schedules().await;
        }
        info!(chat_id, %mode, "polling started");
        self.emit(EngineEvent::PhaseChanged {
            chat_id: chat_id.to_string(),
            phase: TickerPhase::Polling,
        });
        if mode == TickerMode::Recap {
            self.deliver(chat_id, &format::legend()).await;
        }

        let mut state = self.lock();
        let still_current = state
            .registry
            .current_mut(chat_id, generation)
            .is_some_and(|t| t.phase == TickerPhase::Polling);
        if still_current {
            state.queue.push_poll_front(chat_id, generation, &locator);
        }
        true
    }

    pub(crate) fn spawn_schedule_timer(
        self: &Arc<Self>,
        chat_id: &str,
        generation: u64,
        start_time: DateTime<Utc>,
    ) -> AbortHandle {
        let weak = Arc::downgrade(self);
        let chat_id = chat_id.to_string();
        let delay = (start_time - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.begin_polling(&chat_id, Some(generation)).await;
            }
        })
        .abort_handle()
    }

    fn spawn_recap_timer(self: &Arc<Self>, chat_id: &str, generation: u64) -> AbortHandle {
        let weak = Arc::downgrade(self);
        let chat_id = chat_id.to_string();
        let period = self.cfg.recap_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if !inner.flush_recap_timer(&chat_id, generation).await {
                    return;
                }
            }
        })
        .abort_handle()
    }

    /// Periodic recap flush. Returns false once the ticker is gone or no longer polling.
    async fn flush_recap_timer(&self, chat_id: &str, generation: u64) -> bool {
        let message = {
            let mut state = self.lock();
            let Some(ticker) = state.registry.current_mut(chat_id, generation) else {
                return false;
            };
            if ticker.phase != TickerPhase::Polling {
                return false;
            }
            processor::flush_recap(ticker, self.cfg.regulation_minutes)
        };
        if let Some(text) = message {
            debug!(chat_id, "recap flushed by timer");
            self.deliver(chat_id, &text).await;
        }
        true
    }

    /// Stats, summary and closing message, spaced out; then the ticker is
    /// dropped once the retention window passes.
    pub(crate) fn spawn_wind_down(self: &Arc<Self>, wind_down: WindDown) {
        let weak = Arc::downgrade(self);
        let step = self.cfg.wind_down_step;
        let retention = self.cfg.retention;
        let chat_id = wind_down.chat_id.clone();
        let generation = wind_down.generation;

        let task = tokio::spawn(async move {
            let WindDown {
                chat_id,
                generation,
                events,
                teams,
                group_label,
                lineup,
                final_score,
            } = wind_down;

            tokio::time::sleep(step).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let stats = inner.collab.stats.extract_stats(&lineup, &teams);
            inner.deliver(&chat_id, &stats).await;
            drop(inner);

            tokio::time::sleep(step).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let summary = inner
                .collab
                .summaries
                .summarize(&events, &teams, &group_label, &lineup)
                .await;
            if !summary.trim().is_empty() {
                inner.deliver(&chat_id, &format::summary_message(&summary)).await;
            }
            inner
                .deliver(&chat_id, &format::closing_message(&teams, final_score.as_deref()))
                .await;
            drop(inner);

            tokio::time::sleep(retention).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire_ticker(&chat_id, generation);
            }
        });

        let mut state = self.lock();
        match state.registry.current_mut(&chat_id, generation) {
            Some(ticker) if ticker.phase == TickerPhase::Terminated => {
                ticker.teardown_timer.arm(task.abort_handle());
            }
            _ => task.abort(),
        }
    }

    /// Drop a finished ticker after retention. Its seen ids stay dormant.
    fn expire_ticker(&self, chat_id: &str, generation: u64) {
        let removed = {
            let mut state = self.lock();
            match state.registry.current_mut(chat_id, generation) {
                Some(ticker) if ticker.phase == TickerPhase::Terminated => {
                    ticker.teardown_timer.release();
                    state.registry.remove(chat_id, SeenRetention::Keep).is_some()
                }
                _ => false,
            }
        };
        if removed {
            info!(chat_id, "finished ticker expired");
            self.emit(EngineEvent::TickerRemoved {
                chat_id: chat_id.to_string(),
            });
        }
    }

    /// Claim a worker slot if one is free. Check and increment are one step,
    /// so concurrent dispatchers cannot overshoot the budget.
    fn reserve_worker(&self) -> bool {
        let max = self.cfg.max_workers;
        self.active_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .is_ok()
    }

    fn release_worker(&self) {
        if self.active_workers.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// One dispatcher tick: start workers while the budget allows.
    pub(crate) fn dispatch_tick(self: &Arc<Self>) {
        if self.should_stop() {
            return;
        }
        while self.reserve_worker() {
            let job = self.lock().queue.pop();
            let Some(job) = job else {
                self.release_worker();
                break;
            };
            self.spawn_worker(job);
        }
    }

    fn spawn_worker(self: &Arc<Self>, job: Job) {
        let slot = WorkerSlot {
            inner: self.clone(),
            poll_chat: (job.kind == JobKind::Poll).then(|| job.chat_id.clone()),
        };
        let inner = self.clone();
        tokio::spawn(async move {
            let _slot = slot;
            let chat_id = job.chat_id.clone();
            let kind = job.kind;
            let started_at = Instant::now();

            // Run the job in its own task so a panic surfaces as a JoinError here.
            let status = match tokio::spawn(crate::worker::run_job(inner.clone(), job)).await {
                Ok(status) => status,
                Err(err) => {
                    error!(chat_id = %chat_id, ?kind, "worker task failed: {err}");
                    JobStatus::Failed {
                        error: format!("worker task failed: {err}"),
                    }
                }
            };

            inner.emit(EngineEvent::JobFinished {
                outcome: JobOutcome {
                    chat_id,
                    kind,
                    status,
                    total_ms: started_at.elapsed().as_millis() as u64,
                },
            });
        });
    }

    /// Wait until no worker is executing.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let mut notified = pin!(self.idle.notified());
            notified.as_mut().enable();
            if self.active_workers.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Rebuild state from the last run's snapshots.
    async fn restore(self: &Arc<Self>) {
        let seen = self.collab.store.load_seen().await;
        let schedules = self.collab.store.load_schedules().await;
        let now = Utc::now();

        let mut due = Vec::new();
        let restored = {
            let mut guard = self.lock();
            let state = &mut *guard;
            state.registry.set_dormant_seen(seen);
            for (chat_id, snapshot) in schedules {
                let Some(generation) = state.registry.restore_scheduled(&chat_id, &snapshot) else {
                    continue;
                };
                if snapshot.start_time <= now {
                    due.push((
                        chat_id.clone(),
                        generation,
                        snapshot.group_name.clone(),
                        snapshot.mode,
                    ));
                } else if let Some(ticker) = state.registry.get_mut(&chat_id) {
                    ticker.schedule_timer.arm(self.spawn_schedule_timer(
                        &chat_id,
                        generation,
                        snapshot.start_time,
                    ));
                }
                state.schedules.insert(chat_id, snapshot);
            }
            state.registry.len()
        };
        if restored > 0 {
            info!(restored, due = due.len(), "scheduled tickers restored");
        }

        // Start time passed while the process was down.
        for (chat_id, generation, label, mode) in due {
            self.deliver(&chat_id, &format::starting_now_notice(&label, None, mode))
                .await;
            self.begin_polling(&chat_id, Some(generation)).await;
        }
    }

    async fn shutdown(&self) {
        {
            let mut state = self.lock();
            state.registry.cancel_all_timers();
            state.queue.clear();
        }
        self.wait_idle().await;
        // Workers that finished during the drain may have armed new timers.
        {
            let mut state = self.lock();
            state.registry.cancel_all_timers();
        }
        self.persist_seen().await;
    }

    async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        self.restore().await;
        info!(
            max_workers = self.cfg.max_workers,
            dispatch_ms = self.cfg.dispatch_interval.as_millis() as u64,
            poll_ms = self.cfg.poll_interval.as_millis() as u64,
            "engine started"
        );
        self.emit(EngineEvent::Started);

        let mut dispatch = tokio::time::interval(self.cfg.dispatch_interval);
        dispatch.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut poll = tokio::time::interval(self.cfg.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while !self.should_stop() {
            tokio::select! {
                _ = dispatch.tick() => self.dispatch_tick(),
                _ = poll.tick() => self.schedule_tick(),
                _ = self.notify.notified() => {}
            }
        }

        info!("engine stopping");
        self.shutdown().await;
        self.emit(EngineEvent::Stopped);
        Ok(())
    }
}

pub(crate) fn start_engine(cfg: EngineConfig, collab: Collaborators) -> EngineHandle {
    let inner = Arc::new(EngineInner::new(cfg.normalized(), collab));
    let join = tokio::spawn(inner.clone().run());
    EngineHandle { inner, join }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_trims_and_defaults_the_label() {
        let (chat, url, label) =
            validate_request(" https://feed.example/game/1 ", " -100123 ", "  ").unwrap();
        assert_eq!(chat, "-100123");
        assert_eq!(url, "https://feed.example/game/1");
        assert_eq!(label, DEFAULT_GROUP_LABEL);
    }

    #[test]
    fn validation_rejects_bad_input() {
        for (url, chat) in [
            ("https://feed.example/1", ""),
            ("https://feed.example/1", "a b"),
            ("feed.example/1", "c1"),
            ("ftp://feed.example/1", "c1"),
            ("file:///tmp/x", "c1"),
        ] {
            assert!(
                matches!(
                    validate_request(url, chat, "Cup"),
                    Err(TickerError::Validation(_))
                ),
                "{url:?} {chat:?}"
            );
        }
    }
}
