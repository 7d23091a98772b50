use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use liveticker_core::ScheduleSnapshot;
use tracing::{debug, info, warn};

use crate::api::{EngineEvent, JobKind, JobStatus, TickerPhase};
use crate::engine::{EngineInner, WindDown};
use crate::error::{FetchError, JobError};
use crate::format;
use crate::processor;
use crate::queue::Job;
use crate::registry::SeenRetention;

/// Execute one job end to end.
pub(crate) async fn run_job(inner: Arc<EngineInner>, job: Job) -> JobStatus {
    let result = match job.kind {
        JobKind::Schedule => run_schedule(&inner, &job).await,
        JobKind::Poll => run_poll(&inner, &job).await,
    };
    match result {
        Ok(status) => status,
        Err(JobError::Stale) => {
            debug!(chat_id = %job.chat_id, kind = ?job.kind, "stale job discarded");
            JobStatus::Discarded
        }
        Err(JobError::Fetch(err)) => JobStatus::Failed {
            error: err.to_string(),
        },
    }
}

fn expected_phase(kind: JobKind) -> TickerPhase {
    match kind {
        JobKind::Schedule => TickerPhase::Scheduling,
        JobKind::Poll => TickerPhase::Polling,
    }
}

/// The job is still for the current ticker and the ticker is in the phase the job expects.
fn precheck(inner: &EngineInner, job: &Job) -> Result<(), JobError> {
    let state = inner.lock();
    match state.registry.get(&job.chat_id) {
        Some(t) if t.generation == job.generation && t.phase == expected_phase(job.kind) => Ok(()),
        _ => Err(JobError::Stale),
    }
}

async fn run_schedule(inner: &Arc<EngineInner>, job: &Job) -> Result<JobStatus, JobError> {
    precheck(inner, job)?;

    let snapshot = match inner.collab.feed.fetch(&job.resource_locator).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            abort_scheduling(inner, job, &err).await;
            return Err(err.into());
        }
    };

    let teams = snapshot.summary.teams.clone();
    let lead = TimeDelta::from_std(inner.cfg.lead_window).unwrap_or(TimeDelta::zero());
    let start_time = snapshot
        .summary
        .kickoff
        .map(|kickoff| kickoff - lead)
        .filter(|start| *start > Utc::now());

    let Some(start_time) = start_time else {
        let current = {
            let mut state = inner.lock();
            state.registry.mutate(&job.chat_id, |t| {
                (t.generation == job.generation && t.phase == TickerPhase::Scheduling).then(|| {
                    t.team_names = Some(teams.clone());
                    (t.group_label.clone(), t.mode)
                })
            })
        };
        let Some((label, mode)) = current.flatten() else {
            return Err(JobError::Stale);
        };
        info!(chat_id = %job.chat_id, "kickoff within lead window, starting now");
        inner
            .deliver(&job.chat_id, &format::starting_now_notice(&label, Some(&teams), mode))
            .await;
        inner.begin_polling(&job.chat_id, Some(job.generation)).await;
        return Ok(JobStatus::Started);
    };

    let label = {
        let mut guard = inner.lock();
        let state = &mut *guard;
        let Some(ticker) = state
            .registry
            .current_mut(&job.chat_id, job.generation)
            .filter(|t| t.phase == TickerPhase::Scheduling)
        else {
            return Err(JobError::Stale);
        };
        ticker.phase = TickerPhase::Scheduled;
        ticker.start_time = Some(start_time);
        ticker.team_names = Some(teams.clone());
        ticker.schedule_timer.arm(inner.spawn_schedule_timer(
            &job.chat_id,
            job.generation,
            start_time,
        ));
        state.schedules.insert(
            job.chat_id.clone(),
            ScheduleSnapshot {
                resource_locator: job.resource_locator.clone(),
                start_time,
                group_name: ticker.group_label.clone(),
                mode: ticker.mode,
            },
        );
        ticker.group_label.clone()
    };

    inner.persist_schedules().await;
    info!(chat_id = %job.chat_id, %start_time, "ticker scheduled");
    inner.emit(EngineEvent::PhaseChanged {
        chat_id: job.chat_id.clone(),
        phase: TickerPhase::Scheduled,
    });
    inner
        .deliver(&job.chat_id, &format::schedule_notice(&label, &teams, start_time))
        .await;
    Ok(JobStatus::Scheduled { start_time })
}

/// Scheduling is not retried: the ticker goes away and the chat is told why.
async fn abort_scheduling(inner: &EngineInner, job: &Job, err: &FetchError) {
    let (removed, schedule_changed) = {
        let mut state = inner.lock();
        let current = state
            .registry
            .get(&job.chat_id)
            .is_some_and(|t| t.generation == job.generation);
        if current {
            state.queue.remove_chat(&job.chat_id);
            let schedule_changed = state.schedules.remove(&job.chat_id).is_some();
            state.registry.remove(&job.chat_id, SeenRetention::Keep);
            (true, schedule_changed)
        } else {
            (false, false)
        }
    };
    if !removed {
        return;
    }

    warn!(chat_id = %job.chat_id, "scheduling failed, ticker removed: {err}");
    if schedule_changed {
        inner.persist_schedules().await;
    }
    inner.emit(EngineEvent::TickerRemoved {
        chat_id: job.chat_id.clone(),
    });
    inner
        .deliver(&job.chat_id, &format::scheduling_failed_notice(&err.to_string()))
        .await;
}

async fn run_poll(inner: &Arc<EngineInner>, job: &Job) -> Result<JobStatus, JobError> {
    precheck(inner, job)?;

    let snapshot = match inner.collab.feed.fetch(&job.resource_locator).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            // The next scheduler round retries.
            warn!(chat_id = %job.chat_id, "poll failed: {err}");
            return Err(err.into());
        }
    };

    let regulation = inner.cfg.regulation_minutes;
    let (outcome, wind_down) = {
        let mut guard = inner.lock();
        let state = &mut *guard;
        let Some(ticker) = state
            .registry
            .current_mut(&job.chat_id, job.generation)
            .filter(|t| t.phase == TickerPhase::Polling)
        else {
            return Err(JobError::Stale);
        };
        if ticker.last_seen_version.as_deref() == Some(snapshot.summary.version.as_str()) {
            return Ok(JobStatus::Unchanged);
        }
        ticker.last_seen_version = Some(snapshot.summary.version.clone());
        ticker.team_names = Some(snapshot.summary.teams.clone());

        let outcome = processor::process_snapshot(ticker, &snapshot, regulation);
        let wind_down = outcome.terminal.then(|| WindDown {
            chat_id: job.chat_id.clone(),
            generation: job.generation,
            events: snapshot.events_oldest_first().cloned().collect(),
            teams: ticker.teams_or_default(),
            group_label: ticker.group_label.clone(),
            lineup: snapshot.lineup.clone(),
            final_score: snapshot
                .events_oldest_first()
                .find(|e| processor::is_game_end(e, regulation))
                .map(|e| e.score.clone())
                .filter(|score| !score.trim().is_empty()),
        });
        if outcome.terminal {
            state.queue.remove_chat(&job.chat_id);
        }
        (outcome, wind_down)
    };

    for text in &outcome.deliveries {
        inner.deliver(&job.chat_id, text).await;
    }
    if outcome.new_events > 0 {
        debug!(chat_id = %job.chat_id, new_events = outcome.new_events, "new events processed");
        inner.persist_seen().await;
    }

    let new_events = outcome.new_events;
    match wind_down {
        Some(wind_down) => {
            info!(chat_id = %job.chat_id, "game over, winding down");
            inner.emit(EngineEvent::PhaseChanged {
                chat_id: job.chat_id.clone(),
                phase: TickerPhase::Terminated,
            });
            inner.spawn_wind_down(wind_down);
            Ok(JobStatus::Finished { new_events })
        }
        None => Ok(JobStatus::Processed { new_events }),
    }
}
