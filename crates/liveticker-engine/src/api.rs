//! Public API types for the in-process ticker engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use liveticker_core::{SnapshotStore, TeamNames, TickerMode};
use serde::{Deserialize, Serialize};

use crate::error::TickerError;
use crate::feed::FeedClient;
use crate::notify::{Messenger, StatsExtractor, SummaryGenerator};

/// Tunables for the engine. Zero values are replaced by the `DEFAULT_*` constants.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of jobs executing at once.
    ///
    /// Kept small: the limiting factor is the rate-sensitive upstream feed,
    /// not local compute.
    pub max_workers: usize,

    /// Period of the dispatcher that hands queued jobs to workers.
    pub dispatch_interval: Duration,

    /// Period of the round-robin poll scheduler (one ticker per tick).
    pub poll_interval: Duration,

    /// Upper bound for a single feed request.
    pub fetch_timeout: Duration,

    /// How long before kickoff polling starts.
    pub lead_window: Duration,

    /// Period of the recap flush for tickers in recap mode.
    pub recap_interval: Duration,

    /// Minutes in regulation time. A period end past this minute ends the game.
    pub regulation_minutes: u32,

    /// How long a finished ticker stays registered before it is dropped.
    pub retention: Duration,

    /// Delay between the end-of-game messages (stats, summary, closing).
    pub wind_down_step: Duration,
}

impl EngineConfig {
    /// Default worker budget.
    pub const DEFAULT_MAX_WORKERS: usize = 2;

    /// Default dispatcher period.
    pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_secs(1);

    /// Default poll scheduler period.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

    /// Default feed request timeout.
    pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

    /// Default lead window before kickoff.
    pub const DEFAULT_LEAD_WINDOW: Duration = Duration::from_secs(5 * 60);

    /// Default recap period.
    pub const DEFAULT_RECAP_INTERVAL: Duration = Duration::from_secs(5 * 60);

    /// Default regulation length (two 30 minute halves).
    pub const DEFAULT_REGULATION_MINUTES: u32 = 30;

    /// Default retention of finished tickers.
    pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

    /// Default spacing of end-of-game messages.
    pub const DEFAULT_WIND_DOWN_STEP: Duration = Duration::from_secs(1);

    pub(crate) fn normalized(mut self) -> Self {
        if self.max_workers == 0 {
            self.max_workers = Self::DEFAULT_MAX_WORKERS;
        }
        if self.dispatch_interval == Duration::ZERO {
            self.dispatch_interval = Self::DEFAULT_DISPATCH_INTERVAL;
        }
        if self.poll_interval == Duration::ZERO {
            self.poll_interval = Self::DEFAULT_POLL_INTERVAL;
        }
        if self.fetch_timeout == Duration::ZERO {
            self.fetch_timeout = Self::DEFAULT_FETCH_TIMEOUT;
        }
        if self.recap_interval == Duration::ZERO {
            self.recap_interval = Self::DEFAULT_RECAP_INTERVAL;
        }
        if self.regulation_minutes == 0 {
            self.regulation_minutes = Self::DEFAULT_REGULATION_MINUTES;
        }
        if self.retention == Duration::ZERO {
            self.retention = Self::DEFAULT_RETENTION;
        }
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: Self::DEFAULT_MAX_WORKERS,
            dispatch_interval: Self::DEFAULT_DISPATCH_INTERVAL,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            fetch_timeout: Self::DEFAULT_FETCH_TIMEOUT,
            lead_window: Self::DEFAULT_LEAD_WINDOW,
            recap_interval: Self::DEFAULT_RECAP_INTERVAL,
            regulation_minutes: Self::DEFAULT_REGULATION_MINUTES,
            retention: Self::DEFAULT_RETENTION,
            wind_down_step: Self::DEFAULT_WIND_DOWN_STEP,
        }
    }
}

/// External services the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Source of game snapshots.
    pub feed: Arc<dyn FeedClient>,
    /// Outbound chat messages.
    pub messenger: Arc<dyn Messenger>,
    /// End-of-game narrative summaries.
    pub summaries: Arc<dyn SummaryGenerator>,
    /// End-of-game player statistics.
    pub stats: Arc<dyn StatsExtractor>,
    /// Crash-recovery snapshots.
    pub store: Arc<dyn SnapshotStore>,
}

/// Lifecycle phase of a ticker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TickerPhase {
    /// Waiting for the first metadata fetch.
    Scheduling,
    /// Waiting for the start time.
    Scheduled,
    /// Receiving periodic polls.
    Polling,
    /// Game over; winding down until retention expires.
    Terminated,
}

/// Kind of queued work.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Fetch metadata and decide when polling starts.
    Schedule,
    /// Fetch the feed and process new events.
    Poll,
}

/// How a job ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Polling deferred until the given time.
    Scheduled {
        /// When polling will begin.
        start_time: DateTime<Utc>,
    },
    /// Polling started right away.
    Started,
    /// The feed reported the same version as last time.
    Unchanged,
    /// New events were processed.
    Processed {
        /// Number of events seen for the first time.
        new_events: usize,
    },
    /// The game ended during this poll.
    Finished {
        /// Number of events seen for the first time.
        new_events: usize,
    },
    /// The ticker changed underneath the job; nothing was done.
    Discarded,
    /// The job failed.
    Failed {
        /// Human-readable failure.
        error: String,
    },
}

/// Result of one executed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobOutcome {
    /// Chat the job belonged to.
    pub chat_id: String,
    /// Job kind.
    pub kind: JobKind,
    /// Result.
    pub status: JobStatus,
    /// Wall time spent in the job (milliseconds).
    pub total_ms: u64,
}

/// Engine event stream payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// Engine started (snapshots restored).
    Started,
    /// Engine is stopping (graceful shutdown requested).
    StopRequested,
    /// A ticker was created.
    TickerCreated {
        /// Chat id.
        chat_id: String,
        /// Delivery mode.
        mode: TickerMode,
    },
    /// A ticker moved to a new phase.
    PhaseChanged {
        /// Chat id.
        chat_id: String,
        /// New phase.
        phase: TickerPhase,
    },
    /// A ticker was dropped from the registry.
    TickerRemoved {
        /// Chat id.
        chat_id: String,
    },
    /// A job completed (success or failure).
    JobFinished {
        /// Job outcome.
        outcome: JobOutcome,
    },
    /// A non-fatal problem worth surfacing.
    Warning {
        /// Warning message.
        message: String,
    },
    /// Engine stopped (timers cancelled, workers drained).
    Stopped,
}

/// Point-in-time view of one ticker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickerSummary {
    /// Chat id.
    pub chat_id: String,
    /// Current phase.
    pub phase: TickerPhase,
    /// Delivery mode.
    pub mode: TickerMode,
    /// Group label given at creation.
    pub group_label: String,
    /// Team names, once known.
    pub teams: Option<TeamNames>,
    /// Number of distinct events seen so far.
    pub seen_events: usize,
    /// Events waiting for the next recap.
    pub buffered_events: usize,
    /// Scheduled start, while in `Scheduled`.
    pub start_time: Option<DateTime<Utc>>,
}

/// Current engine state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Whether the engine has been asked to stop.
    pub stop_requested: bool,
    /// Jobs currently executing.
    pub active_workers: usize,
    /// Jobs waiting in the queue.
    pub queued_jobs: usize,
    /// All registered tickers, ordered by chat id.
    pub tickers: Vec<TickerSummary>,
}

/// Handle to a running in-process engine instance.
pub struct EngineHandle {
    pub(crate) inner: Arc<crate::engine::EngineInner>,
    pub(crate) join: tokio::task::JoinHandle<anyhow::Result<()>>,
}

/// Start a new in-process engine instance.
///
/// Persisted snapshots are restored before the periodic loops start.
pub fn start_engine(config: EngineConfig, collaborators: Collaborators) -> EngineHandle {
    crate::engine::start_engine(config, collaborators)
}

impl EngineHandle {
    /// Subscribe to the engine event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Current state of every ticker.
    pub fn status(&self) -> StatusSnapshot {
        self.inner.status()
    }

    /// Register a ticker and queue its scheduling job.
    pub fn create_ticker(
        &self,
        resource_locator: &str,
        chat_id: &str,
        group_label: &str,
        mode: TickerMode,
    ) -> Result<(), TickerError> {
        self.inner
            .create_ticker(resource_locator, chat_id, group_label, mode)
    }

    /// Stop a ticker, keeping its seen events so a restart does not replay them.
    ///
    /// Returns whether a ticker was registered. Stopping an unknown chat is a no-op.
    pub async fn stop_ticker(&self, chat_id: &str) -> bool {
        self.inner.stop_ticker(chat_id).await
    }

    /// Remove a ticker and forget everything about it.
    ///
    /// Returns whether anything was removed. Resetting an unknown chat is a no-op.
    pub async fn reset_ticker(&self, chat_id: &str) -> bool {
        self.inner.reset_ticker(chat_id).await
    }

    /// Run one dispatcher tick now (in addition to the internal clock).
    pub fn dispatch_tick(&self) {
        self.inner.dispatch_tick();
    }

    /// Run one poll scheduler tick now (in addition to the internal clock).
    pub fn schedule_tick(&self) {
        self.inner.schedule_tick();
    }

    /// Request a graceful shutdown (cancel timers, finish in-flight jobs).
    pub fn request_stop(&self) {
        self.inner.request_stop();
    }

    /// Wait for the engine to stop, returning the engine task result.
    pub async fn wait(self) -> anyhow::Result<()> {
        match self.join.await {
            Ok(res) => res,
            Err(err) => Err(anyhow::anyhow!("engine task join error: {err}")),
        }
    }
}
