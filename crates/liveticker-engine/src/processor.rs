//! Turns fetched snapshots into chat messages, each event exactly once.

use liveticker_core::{Event, EventKind, Snapshot, TickerMode};

use crate::api::TickerPhase;
use crate::format;
use crate::registry::TickerState;

/// Result of running one snapshot through a ticker.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ProcessOutcome {
    /// Messages to send, in order, once the state lock is released.
    pub(crate) deliveries: Vec<String>,
    /// Events seen for the first time.
    pub(crate) new_events: usize,
    /// The game ended; the ticker is now `Terminated`.
    pub(crate) terminal: bool,
}

/// A period end past regulation time.
pub(crate) fn is_game_end(event: &Event, regulation_minutes: u32) -> bool {
    event.kind == EventKind::PeriodEnd && event.minute().is_some_and(|m| m > regulation_minutes)
}

/// Replay `snapshot` oldest-first against the ticker's seen set.
///
/// Live tickers get one message per new event. Recap tickers buffer events
/// and flush on period boundaries. Processing stops at the end of the game.
pub(crate) fn process_snapshot(
    ticker: &mut TickerState,
    snapshot: &Snapshot,
    regulation_minutes: u32,
) -> ProcessOutcome {
    let teams = ticker.teams_or_default();
    let mut outcome = ProcessOutcome::default();

    for event in snapshot.events_oldest_first() {
        if !ticker.mark_seen(&event.id) {
            continue;
        }
        outcome.new_events += 1;

        match ticker.mode {
            TickerMode::Live => outcome
                .deliveries
                .push(format::live_message(event, &teams, regulation_minutes)),
            TickerMode::Recap => {
                ticker.recap_buffer.push(event.clone());
                if event.kind.is_period_boundary() {
                    outcome
                        .deliveries
                        .extend(flush_recap(ticker, regulation_minutes));
                }
            }
        }

        if is_game_end(event, regulation_minutes) {
            ticker.phase = TickerPhase::Terminated;
            ticker.schedule_timer.cancel();
            ticker.recap_timer.cancel();
            outcome.terminal = true;
            break;
        }
    }
    outcome
}

/// Empty the recap buffer into one message. `None` when there was nothing buffered.
///
/// The buffer is cleared before the message is handed out, so a failed send
/// never leaves events behind.
pub(crate) fn flush_recap(ticker: &mut TickerState, regulation_minutes: u32) -> Option<String> {
    if ticker.recap_buffer.is_empty() {
        return None;
    }
    let mut events = std::mem::take(&mut ticker.recap_buffer);
    events.sort_by_key(|e| e.timestamp);
    Some(format::recap_message(
        &events,
        &ticker.teams_or_default(),
        regulation_minutes,
    ))
}
