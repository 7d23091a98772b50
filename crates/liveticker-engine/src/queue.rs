use std::collections::{HashSet, VecDeque};

use crate::api::JobKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Job {
    pub(crate) kind: JobKind,
    pub(crate) chat_id: String,
    pub(crate) generation: u64,
    pub(crate) resource_locator: String,
    /// Monotonic enqueue order.
    pub(crate) created_at: u64,
}

/// FIFO of pending jobs with front insertion for a ticker's first poll.
///
/// A chat has at most one poll outstanding, counting both queued and
/// executing polls. The two sets make that check O(1).
#[derive(Debug, Default)]
pub(crate) struct JobQueue {
    jobs: VecDeque<Job>,
    queued_polls: HashSet<String>,
    inflight_polls: HashSet<String>,
    next_seq: u64,
}

impl JobQueue {
    #[cfg(test)]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn make_job(&mut self, kind: JobKind, chat_id: &str, generation: u64, locator: &str) -> Job {
        self.next_seq += 1;
        Job {
            kind,
            chat_id: chat_id.to_string(),
            generation,
            resource_locator: locator.to_string(),
            created_at: self.next_seq,
        }
    }

    pub(crate) fn push_schedule(&mut self, chat_id: &str, generation: u64, locator: &str) {
        let job = self.make_job(JobKind::Schedule, chat_id, generation, locator);
        self.jobs.push_back(job);
    }

    /// Queue a poll unless one is already outstanding for the chat.
    pub(crate) fn push_poll(&mut self, chat_id: &str, generation: u64, locator: &str) -> bool {
        if self.has_outstanding_poll(chat_id) {
            return false;
        }
        let job = self.make_job(JobKind::Poll, chat_id, generation, locator);
        self.queued_polls.insert(job.chat_id.clone());
        self.jobs.push_back(job);
        true
    }

    /// Like [`push_poll`](Self::push_poll) but at the head of the queue.
    pub(crate) fn push_poll_front(
        &mut self,
        chat_id: &str,
        generation: u64,
        locator: &str,
    ) -> bool {
        if self.has_outstanding_poll(chat_id) {
            return false;
        }
        let job = self.make_job(JobKind::Poll, chat_id, generation, locator);
        self.queued_polls.insert(job.chat_id.clone());
        self.jobs.push_front(job);
        true
    }

    /// Take the next job. A poll stays outstanding until [`finish_poll`](Self::finish_poll).
    pub(crate) fn pop(&mut self) -> Option<Job> {
        let job = self.jobs.pop_front()?;
        if job.kind == JobKind::Poll {
            self.queued_polls.remove(&job.chat_id);
            self.inflight_polls.insert(job.chat_id.clone());
        }
        Some(job)
    }

    pub(crate) fn finish_poll(&mut self, chat_id: &str) {
        self.inflight_polls.remove(chat_id);
    }

    pub(crate) fn has_outstanding_poll(&self, chat_id: &str) -> bool {
        self.queued_polls.contains(chat_id) || self.inflight_polls.contains(chat_id)
    }

    /// Drop every queued job for a chat. Executing jobs are not affected.
    pub(crate) fn remove_chat(&mut self, chat_id: &str) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|job| job.chat_id != chat_id);
        self.queued_polls.remove(chat_id);
        before - self.jobs.len()
    }

    pub(crate) fn clear(&mut self) {
        self.jobs.clear();
        self.queued_polls.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }
}
