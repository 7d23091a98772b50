//! Shared types for `liveticker`: the feed data model, persisted ticker
//! snapshots and the bot settings file.

pub mod feed;
mod paths;
pub mod settings;
pub mod store;

pub use feed::{
    Event, EventKind, Lineup, Player, Side, Snapshot, Summary, TeamNames, TickerMode,
    clock_minute, parse_score,
};
pub use paths::DirError;
pub use store::{
    JsonFileStore, MemoryStore, PersistenceError, ScheduleMap, ScheduleSnapshot, SeenMap,
    SnapshotStore,
};
