#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! In-process engine for `liveticker` (ticker lifecycle, job dispatch, feed
//! polling, event delivery).

/// Public API for the engine crate.
pub mod api;
/// Error types.
pub mod error;
/// Feed client contract and HTTP implementation.
pub mod feed;
/// Messenger, summary and stats collaborators.
pub mod notify;

mod engine;
mod format;
mod processor;
mod queue;
mod registry;
mod scheduler;
mod worker;


pub use api::{
    Collaborators, EngineConfig, EngineEvent, EngineHandle, JobKind, JobOutcome, JobStatus,
    StatusSnapshot, TickerPhase, TickerSummary, start_engine,
};
pub use error::{FetchError, SendError, TickerError};
pub use feed::{FeedClient, HttpFeedClient};
pub use notify::{
    ConsoleMessenger, DisabledSummary, HttpSummaryGenerator, LineupStats, Messenger,
    StatsExtractor, SummaryGenerator, TelegramMessenger,
};
