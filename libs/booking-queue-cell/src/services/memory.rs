use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::services::broker::JobBroker;
use crate::{BookingQueueError, JobEnvelope, JobStatus, QueueDepth};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Uuid>,
    processing: Vec<Uuid>,
    delayed: Vec<(DateTime<Utc>, Uuid)>,
    dead: VecDeque<Uuid>,
}

impl QueueState {
    fn release(&mut self, id: Uuid) -> bool {
        let before = self.processing.len();
        self.processing.retain(|p| *p != id);
        before != self.processing.len()
    }
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    jobs: HashMap<Uuid, JobEnvelope>,
}

/// Process-local broker with the same delivery semantics as the Redis one.
#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut BrokerState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Ids currently claimed by a worker on `queue`.
    pub fn in_flight(&self, queue: &str) -> Vec<Uuid> {
        self.with_state(|state| {
            state
                .queues
                .get(queue)
                .map(|q| q.processing.clone())
                .unwrap_or_default()
        })
    }

    /// Overwrites a stored envelope, e.g. to simulate a crashed worker's stale record.
    pub fn overwrite(&self, envelope: JobEnvelope) {
        self.with_state(|state| {
            state.jobs.insert(envelope.id, envelope);
        })
    }
}

#[async_trait]
impl JobBroker for InMemoryBroker {
    async fn push(&self, envelope: &JobEnvelope) -> Result<(), BookingQueueError> {
        self.with_state(|state| {
            state.jobs.insert(envelope.id, envelope.clone());
            state
                .queues
                .entry(envelope.queue.clone())
                .or_default()
                .pending
                .push_back(envelope.id);
        });
        Ok(())
    }

    async fn pop(&self, queue: &str, worker_id: &str) -> Result<Option<JobEnvelope>, BookingQueueError> {
        Ok(self.with_state(|state| {
            let BrokerState { queues, jobs } = state;
            let lists = queues.entry(queue.to_string()).or_default();

            while let Some(id) = lists.pending.pop_front() {
                match jobs.get_mut(&id) {
                    Some(envelope) if !envelope.status.is_terminal() => {
                        lists.processing.push(id);
                        envelope.mark_processing(worker_id, Utc::now());
                        return Some(envelope.clone());
                    }
                    _ => continue,
                }
            }
            None
        }))
    }

    async fn ack(&self, envelope: &JobEnvelope) -> Result<(), BookingQueueError> {
        self.with_state(|state| {
            state.jobs.insert(envelope.id, envelope.clone());
            if let Some(lists) = state.queues.get_mut(&envelope.queue) {
                lists.release(envelope.id);
            }
        });
        Ok(())
    }

    async fn schedule_retry(&self, envelope: &JobEnvelope) -> Result<(), BookingQueueError> {
        let ready_at = envelope.next_attempt_at.unwrap_or_else(Utc::now);
        self.with_state(|state| {
            state.jobs.insert(envelope.id, envelope.clone());
            let lists = state.queues.entry(envelope.queue.clone()).or_default();
            lists.release(envelope.id);
            lists.delayed.push((ready_at, envelope.id));
        });
        Ok(())
    }

    async fn bury(&self, envelope: &JobEnvelope) -> Result<(), BookingQueueError> {
        self.with_state(|state| {
            state.jobs.insert(envelope.id, envelope.clone());
            let lists = state.queues.entry(envelope.queue.clone()).or_default();
            lists.release(envelope.id);
            lists.dead.push_front(envelope.id);
        });
        Ok(())
    }

    async fn promote_due(&self, queue: &str, now: DateTime<Utc>) -> Result<u64, BookingQueueError> {
        Ok(self.with_state(|state| {
            let Some(lists) = state.queues.get_mut(queue) else {
                return 0;
            };

            let (mut due, waiting): (Vec<_>, Vec<_>) =
                lists.delayed.drain(..).partition(|(ready_at, _)| *ready_at <= now);
            lists.delayed = waiting;
            due.sort_by_key(|(ready_at, _)| *ready_at);

            let promoted = due.len() as u64;
            lists.pending.extend(due.into_iter().map(|(_, id)| id));
            promoted
        }))
    }

    async fn recover_stalled(&self, queue: &str, older_than: DateTime<Utc>) -> Result<u64, BookingQueueError> {
        Ok(self.with_state(|state| {
            let BrokerState { queues, jobs } = state;
            let Some(lists) = queues.get_mut(queue) else {
                return 0;
            };

            let mut recovered = 0;
            let mut still_running = Vec::new();
            for id in lists.processing.drain(..) {
                match jobs.get_mut(&id) {
                    Some(envelope) if envelope.status.is_terminal() => {}
                    Some(envelope) if envelope.updated_at < older_than => {
                        envelope.status = JobStatus::Queued;
                        envelope.worker_id = None;
                        envelope.updated_at = Utc::now();
                        lists.pending.push_back(id);
                        recovered += 1;
                    }
                    Some(_) => still_running.push(id),
                    None => {}
                }
            }
            lists.processing = still_running;
            recovered
        }))
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<JobEnvelope>, BookingQueueError> {
        Ok(self.with_state(|state| state.jobs.get(&id).cloned()))
    }

    async fn dead_jobs(&self, queue: &str, limit: usize) -> Result<Vec<JobEnvelope>, BookingQueueError> {
        Ok(self.with_state(|state| {
            state
                .queues
                .get(queue)
                .map(|lists| {
                    lists
                        .dead
                        .iter()
                        .take(limit)
                        .filter_map(|id| state.jobs.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default()
        }))
    }

    async fn requeue_dead(&self, queue: &str, id: Uuid) -> Result<JobEnvelope, BookingQueueError> {
        self.with_state(|state| {
            let BrokerState { queues, jobs } = state;
            let envelope = jobs.get_mut(&id).ok_or(BookingQueueError::JobNotFound(id))?;
            let lists = queues
                .get_mut(queue)
                .ok_or(BookingQueueError::NotDead(id))?;

            let position = lists
                .dead
                .iter()
                .position(|dead| *dead == id)
                .ok_or(BookingQueueError::NotDead(id))?;
            lists.dead.remove(position);

            envelope.reset_for_requeue(Utc::now());
            lists.pending.push_back(id);
            Ok(envelope.clone())
        })
    }

    async fn depth(&self, queue: &str) -> Result<QueueDepth, BookingQueueError> {
        Ok(self.with_state(|state| {
            let mut depth = QueueDepth {
                queue: queue.to_string(),
                ..QueueDepth::default()
            };
            if let Some(lists) = state.queues.get(queue) {
                depth.pending = lists.pending.len() as u64;
                depth.processing = lists.processing.len() as u64;
                depth.delayed = lists.delayed.len() as u64;
                depth.dead = lists.dead.len() as u64;
            }
            depth
        }))
    }
}
