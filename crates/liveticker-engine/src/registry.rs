use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use liveticker_core::{Event, ScheduleSnapshot, SeenMap, TeamNames, TickerMode};
use tokio::task::AbortHandle;

use crate::api::{TickerPhase, TickerSummary};
use crate::error::TickerError;

/// Owns the abort handle of one per-ticker timer task.
///
/// Arming cancels whatever was armed before; dropping the slot cancels the task.
#[derive(Debug, Default)]
pub(crate) struct TimerSlot {
    handle: Option<AbortHandle>,
}

impl TimerSlot {
    pub(crate) fn arm(&mut self, handle: AbortHandle) {
        self.cancel();
        self.handle = Some(handle);
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Forget the handle without aborting. Used by a timer task that is
    /// finishing on its own and must not cancel itself.
    pub(crate) fn release(&mut self) {
        self.handle = None;
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Debug)]
pub(crate) struct TickerState {
    pub(crate) chat_id: String,
    /// Distinguishes successive tickers for the same chat; jobs and timers
    /// carry it so work from a removed ticker never touches its successor.
    pub(crate) generation: u64,
    pub(crate) phase: TickerPhase,
    pub(crate) mode: TickerMode,
    pub(crate) resource_locator: String,
    pub(crate) group_label: String,
    pub(crate) team_names: Option<TeamNames>,
    pub(crate) seen_event_ids: HashSet<String>,
    pub(crate) last_seen_version: Option<String>,
    pub(crate) recap_buffer: Vec<Event>,
    pub(crate) start_time: Option<DateTime<Utc>>,
    pub(crate) schedule_timer: TimerSlot,
    pub(crate) recap_timer: TimerSlot,
    pub(crate) teardown_timer: TimerSlot,
}

impl TickerState {
    /// Returns true the first time `id` is seen.
    pub(crate) fn mark_seen(&mut self, id: &str) -> bool {
        if self.seen_event_ids.contains(id) {
            return false;
        }
        self.seen_event_ids.insert(id.to_string())
    }

    pub(crate) fn teams_or_default(&self) -> TeamNames {
        self.team_names.clone().unwrap_or_else(|| TeamNames {
            home: "Home".to_string(),
            guest: "Guest".to_string(),
        })
    }

    pub(crate) fn cancel_timers(&mut self) {
        self.schedule_timer.cancel();
        self.recap_timer.cancel();
        self.teardown_timer.cancel();
    }

    pub(crate) fn summary(&self) -> TickerSummary {
        TickerSummary {
            chat_id: self.chat_id.clone(),
            phase: self.phase,
            mode: self.mode,
            group_label: self.group_label.clone(),
            teams: self.team_names.clone(),
            seen_events: self.seen_event_ids.len(),
            buffered_events: self.recap_buffer.len(),
            start_time: self.start_time,
        }
    }
}

/// What happens to a removed ticker's seen ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SeenRetention {
    /// Keep them so a later ticker for the same chat does not replay events.
    Keep,
    /// Forget them (full reset).
    Forget,
}

/// Chat id → ticker. The only place ticker state lives.
#[derive(Debug, Default)]
pub(crate) struct TickerRegistry {
    tickers: BTreeMap<String, TickerState>,
    /// Seen ids of chats without a live ticker (stopped, or restored from disk).
    dormant_seen: SeenMap,
    next_generation: u64,
}

impl TickerRegistry {
    #[cfg(test)]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn allocate_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Register a new ticker in `Scheduling`. A terminated ticker for the same
    /// chat is replaced; any other phase is rejected.
    pub(crate) fn create(
        &mut self,
        chat_id: &str,
        resource_locator: &str,
        group_label: &str,
        mode: TickerMode,
    ) -> Result<u64, TickerError> {
        if let Some(existing) = self.tickers.get(chat_id) {
            if existing.phase != TickerPhase::Terminated {
                return Err(TickerError::AlreadyActive {
                    chat_id: chat_id.to_string(),
                });
            }
            self.remove(chat_id, SeenRetention::Keep);
        }

        let generation = self.allocate_generation();
        let seen_event_ids = self
            .dormant_seen
            .remove(chat_id)
            .map(|ids| ids.into_iter().collect())
            .unwrap_or_default();
        self.tickers.insert(
            chat_id.to_string(),
            TickerState {
                chat_id: chat_id.to_string(),
                generation,
                phase: TickerPhase::Scheduling,
                mode,
                resource_locator: resource_locator.to_string(),
                group_label: group_label.to_string(),
                team_names: None,
                seen_event_ids,
                last_seen_version: None,
                recap_buffer: Vec::new(),
                start_time: None,
                schedule_timer: TimerSlot::default(),
                recap_timer: TimerSlot::default(),
                teardown_timer: TimerSlot::default(),
            },
        );
        Ok(generation)
    }

    /// Recreate a ticker from a persisted schedule. Existing tickers win.
    pub(crate) fn restore_scheduled(
        &mut self,
        chat_id: &str,
        snapshot: &ScheduleSnapshot,
    ) -> Option<u64> {
        if self.tickers.contains_key(chat_id) {
            return None;
        }
        let generation = self
            .create(
                chat_id,
                &snapshot.resource_locator,
                &snapshot.group_name,
                snapshot.mode,
            )
            .ok()?;
        let ticker = self.tickers.get_mut(chat_id)?;
        ticker.phase = TickerPhase::Scheduled;
        ticker.start_time = Some(snapshot.start_time);
        Some(generation)
    }

    pub(crate) fn get(&self, chat_id: &str) -> Option<&TickerState> {
        self.tickers.get(chat_id)
    }

    pub(crate) fn get_mut(&mut self, chat_id: &str) -> Option<&mut TickerState> {
        self.tickers.get_mut(chat_id)
    }

    /// Ticker with this chat id *and* generation.
    pub(crate) fn current_mut(
        &mut self,
        chat_id: &str,
        generation: u64,
    ) -> Option<&mut TickerState> {
        self.tickers
            .get_mut(chat_id)
            .filter(|t| t.generation == generation)
    }

    /// Read-modify-write under the caller's lock.
    pub(crate) fn mutate<R>(
        &mut self,
        chat_id: &str,
        f: impl FnOnce(&mut TickerState) -> R,
    ) -> Option<R> {
        self.tickers.get_mut(chat_id).map(f)
    }

    /// Remove a ticker, cancelling its timers first. Absent ids are a no-op.
    pub(crate) fn remove(
        &mut self,
        chat_id: &str,
        retention: SeenRetention,
    ) -> Option<TickerState> {
        let mut ticker = self.tickers.remove(chat_id)?;
        ticker.cancel_timers();
        if retention == SeenRetention::Keep && !ticker.seen_event_ids.is_empty() {
            self.dormant_seen
                .entry(chat_id.to_string())
                .or_default()
                .extend(ticker.seen_event_ids.iter().cloned());
        }
        Some(ticker)
    }

    /// Drop dormant seen ids for a chat. Returns whether there were any.
    pub(crate) fn forget_seen(&mut self, chat_id: &str) -> bool {
        self.dormant_seen.remove(chat_id).is_some()
    }

    pub(crate) fn set_dormant_seen(&mut self, seen: SeenMap) {
        for (chat_id, ids) in seen {
            match self.tickers.get_mut(&chat_id) {
                Some(ticker) => ticker.seen_event_ids.extend(ids),
                None => self.dormant_seen.entry(chat_id).or_default().extend(ids),
            }
        }
    }

    /// Everything worth persisting: live tickers plus dormant chats.
    pub(crate) fn seen_map(&self) -> SeenMap {
        let mut map = self.dormant_seen.clone();
        for (chat_id, ticker) in &self.tickers {
            if ticker.seen_event_ids.is_empty() {
                continue;
            }
            map.entry(chat_id.clone())
                .or_default()
                .extend(ticker.seen_event_ids.iter().cloned());
        }
        map
    }

    /// Polling tickers in chat id order.
    pub(crate) fn polling(&self) -> Vec<(String, u64, String)> {
        self.tickers
            .values()
            .filter(|t| t.phase == TickerPhase::Polling)
            .map(|t| (t.chat_id.clone(), t.generation, t.resource_locator.clone()))
            .collect()
    }

    pub(crate) fn cancel_all_timers(&mut self) {
        for ticker in self.tickers.values_mut() {
            ticker.cancel_timers();
        }
    }

    pub(crate) fn summaries(&self) -> Vec<TickerSummary> {
        self.tickers.values().map(TickerState::summary).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.tickers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_active_and_replaces_terminated() {
        let mut reg = TickerRegistry::new();
        let first = reg.create("c1", "http://f/1", "Cup", TickerMode::Live).unwrap();
        assert_eq!(
            reg.create("c1", "http://f/2", "Cup", TickerMode::Live),
            Err(TickerError::AlreadyActive {
                chat_id: "c1".to_string()
            })
        );

        reg.mutate("c1", |t| t.phase = TickerPhase::Terminated);
        let second = reg.create("c1", "http://f/2", "Cup", TickerMode::Recap).unwrap();
        assert_ne!(first, second);
        let t = reg.get("c1").unwrap();
        assert_eq!(t.phase, TickerPhase::Scheduling);
        assert_eq!(t.resource_locator, "http://f/2");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn removal_is_idempotent_and_keeps_seen_when_asked() {
        let mut reg = TickerRegistry::new();
        reg.create("c1", "http://f/1", "Cup", TickerMode::Live).unwrap();
        reg.mutate("c1", |t| {
            assert!(t.mark_seen("e1"));
            assert!(!t.mark_seen("e1"));
        });

        assert!(reg.remove("c1", SeenRetention::Keep).is_some());
        assert!(reg.remove("c1", SeenRetention::Keep).is_none());
        assert_eq!(reg.seen_map()["c1"].len(), 1);

        // A new ticker for the same chat inherits the dormant ids.
        reg.create("c1", "http://f/1", "Cup", TickerMode::Live).unwrap();
        assert!(reg.get("c1").unwrap().seen_event_ids.contains("e1"));

        reg.remove("c1", SeenRetention::Forget);
        assert!(!reg.forget_seen("c1"));
        assert!(reg.seen_map().is_empty());
    }

    #[tokio::test]
    async fn removal_cancels_timers() {
        let mut reg = TickerRegistry::new();
        reg.create("c1", "http://f/1", "Cup", TickerMode::Recap).unwrap();
        let task = tokio::spawn(std::future::pending::<()>());
        reg.mutate("c1", |t| t.recap_timer.arm(task.abort_handle()));
        assert!(reg.get("c1").unwrap().recap_timer.is_armed());

        reg.remove("c1", SeenRetention::Forget);
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn arming_cancels_the_previous_timer() {
        let mut slot = TimerSlot::default();
        let first = tokio::spawn(std::future::pending::<()>());
        let second = tokio::spawn(std::future::pending::<()>());
        slot.arm(first.abort_handle());
        slot.arm(second.abort_handle());
        assert!(first.await.unwrap_err().is_cancelled());
        assert!(slot.is_armed());
        slot.release();
        assert!(!slot.is_armed());
        second.abort();
    }
}
