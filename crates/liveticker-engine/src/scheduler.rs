use tracing::debug;

use crate::engine::EngineInner;

/// Fair rotation over a candidate list whose length changes between picks.
#[derive(Debug, Default)]
pub(crate) struct RoundRobin {
    cursor: usize,
}

impl RoundRobin {
    pub(crate) fn pick<'a, T>(&mut self, candidates: &'a [T]) -> Option<&'a T> {
        if candidates.is_empty() {
            return None;
        }
        let idx = self.cursor % candidates.len();
        self.cursor = idx + 1;
        candidates.get(idx)
    }
}

impl EngineInner {
    /// One master-scheduler tick: queue a poll for the next polling ticker,
    /// unless that ticker already has one outstanding.
    pub(crate) fn schedule_tick(&self) {
        if self.should_stop() {
            return;
        }
        let mut guard = self.lock();
        let state = &mut *guard;
        let polling = state.registry.polling();
        let Some((chat_id, generation, locator)) = state.round_robin.pick(&polling) else {
            return;
        };
        if state.queue.push_poll(chat_id, *generation, locator) {
            debug!(chat_id = %chat_id, "poll queued");
        }
    }
}
