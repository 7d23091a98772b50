//! Crash-recovery snapshots: seen event ids and pending schedules per chat.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::feed::TickerMode;
use crate::paths::{self, BaseDir, DirError};

/// Seen event ids keyed by chat id.
pub type SeenMap = BTreeMap<String, BTreeSet<String>>;

/// Pending schedules keyed by chat id.
pub type ScheduleMap = BTreeMap<String, ScheduleSnapshot>;

/// A ticker waiting for its start time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    pub resource_locator: String,
    pub start_time: DateTime<Utc>,
    pub group_name: String,
    pub mode: TickerMode,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot task: {0}")]
    Join(String),
}

/// Load/save contract for the two snapshot maps.
///
/// Loading never fails: missing or unreadable data is reported and treated as
/// empty so a damaged file cannot keep the process from starting.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load_seen(&self) -> SeenMap;
    async fn save_seen(&self, seen: &SeenMap) -> Result<(), PersistenceError>;
    async fn load_schedules(&self) -> ScheduleMap;
    async fn save_schedules(&self, schedules: &ScheduleMap) -> Result<(), PersistenceError>;
}

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SeenFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    tickers: SeenMap,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ScheduleFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    schedules: ScheduleMap,
}

/// JSON files in a state directory, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$XDG_STATE_HOME/liveticker`, falling back to `~/.local/state/liveticker`.
    pub fn default_dir() -> Result<PathBuf, DirError> {
        paths::app_dir(BaseDir::State)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn seen_path(&self) -> PathBuf {
        self.dir.join("seen.json")
    }

    fn schedules_path(&self) -> PathBuf {
        self.dir.join("schedules.json")
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load_seen(&self) -> SeenMap {
        load_or_empty::<SeenFile>(self.seen_path()).await.tickers
    }

    async fn save_seen(&self, seen: &SeenMap) -> Result<(), PersistenceError> {
        let file = SeenFile {
            version: SNAPSHOT_VERSION,
            tickers: seen.clone(),
        };
        let empty = file.tickers.is_empty();
        persist(self.seen_path(), file, empty).await
    }

    async fn load_schedules(&self) -> ScheduleMap {
        load_or_empty::<ScheduleFile>(self.schedules_path())
            .await
            .schedules
    }

    async fn save_schedules(&self, schedules: &ScheduleMap) -> Result<(), PersistenceError> {
        let file = ScheduleFile {
            version: SNAPSHOT_VERSION,
            schedules: schedules.clone(),
        };
        let empty = file.schedules.is_empty();
        persist(self.schedules_path(), file, empty).await
    }
}

async fn load_or_empty<T>(path: PathBuf) -> T
where
    T: DeserializeOwned + Default + Send + 'static,
{
    let shown = path.display().to_string();
    let res = tokio::task::spawn_blocking(move || read_file::<T>(&path)).await;
    match res {
        Ok(Ok(Some(value))) => value,
        Ok(Ok(None)) => {
            debug!(path = %shown, "no snapshot on disk");
            T::default()
        }
        Ok(Err(err)) => {
            warn!(path = %shown, "ignoring unreadable snapshot: {err}");
            T::default()
        }
        Err(err) => {
            warn!(path = %shown, "snapshot load task failed: {err}");
            T::default()
        }
    }
}

fn read_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

async fn persist<T>(path: PathBuf, file: T, empty: bool) -> Result<(), PersistenceError>
where
    T: Serialize + Send + 'static,
{
    tokio::task::spawn_blocking(move || write_file(&path, &file, empty))
        .await
        .map_err(|err| PersistenceError::Join(err.to_string()))?
}

fn write_file<T: Serialize>(path: &Path, file: &T, empty: bool) -> Result<(), PersistenceError> {
    if empty {
        paths::remove_if_present(path)?;
    } else {
        paths::replace_file(path, &serde_json::to_vec_pretty(file)?)?;
    }
    Ok(())
}

/// In-process store for tests and `--ephemeral` runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    seen: SeenMap,
    schedules: ScheduleMap,
    seen_saves: usize,
    schedule_saves: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with data as if it had been left behind by a previous run.
    pub fn with_snapshots(seen: SeenMap, schedules: ScheduleMap) -> Self {
        Self {
            inner: Mutex::new(MemoryState {
                seen,
                schedules,
                ..MemoryState::default()
            }),
        }
    }

    pub fn seen(&self) -> SeenMap {
        self.lock().seen.clone()
    }

    pub fn schedules(&self) -> ScheduleMap {
        self.lock().schedules.clone()
    }

    /// Number of `(save_seen, save_schedules)` calls so far.
    pub fn save_counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.seen_saves, state.schedule_saves)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load_seen(&self) -> SeenMap {
        self.lock().seen.clone()
    }

    async fn save_seen(&self, seen: &SeenMap) -> Result<(), PersistenceError> {
        let mut state = self.lock();
        state.seen = seen.clone();
        state.seen_saves += 1;
        Ok(())
    }

    async fn load_schedules(&self) -> ScheduleMap {
        self.lock().schedules.clone()
    }

    async fn save_schedules(&self, schedules: &ScheduleMap) -> Result<(), PersistenceError> {
        let mut state = self.lock();
        state.schedules = schedules.clone();
        state.schedule_saves += 1;
        Ok(())
    }
}
