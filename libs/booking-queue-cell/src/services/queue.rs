use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::broker::JobBroker;
use crate::{BookingQueueError, JobEnvelope, JobStatus, QueueDepth};

/// Job records outlive their queue entries by seven days.
const JOB_RECORD_TTL_SECS: u64 = 604_800;
const PROMOTE_BATCH: isize = 100;

/// Moves one id from the pending list to processing and stamps the claim time on
/// its record in the same step, so recovery never sees a claimed job without it.
const CLAIM_SCRIPT: &str = r#"
local id = redis.call('RPOPLPUSH', KEYS[1], KEYS[2])
if id then
  redis.call('HSET', ARGV[1] .. id, 'claimed_at', ARGV[2])
end
return id
"#;

/// Moves every due id from the delayed set to the pending list.
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[1], id)
  redis.call('LPUSH', KEYS[2], id)
end
return #due
"#;

/// Takes an id out of a source list, rewrites its record and pushes it onto
/// pending. Does nothing when the id is no longer in the source list.
const MOVE_TO_PENDING_SCRIPT: &str = r#"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[3], 'data', ARGV[2], 'status', ARGV[3])
redis.call('EXPIRE', KEYS[3], ARGV[4])
redis.call('LPUSH', KEYS[2], ARGV[1])
return 1
"#;

fn pending_key(queue: &str) -> String {
    format!("jobs:{}:pending", queue)
}

fn processing_key(queue: &str) -> String {
    format!("jobs:{}:processing", queue)
}

fn delayed_key(queue: &str) -> String {
    format!("jobs:{}:delayed", queue)
}

fn dead_key(queue: &str) -> String {
    format!("jobs:{}:dead", queue)
}

fn job_key(id: &str) -> String {
    format!("job:{}", id)
}

/// Redis-backed broker.
///
/// Per queue: a pending list (LPUSH / RPOPLPUSH, so FIFO), a processing list,
/// a delayed sorted set scored by ready time in milliseconds, and a dead list.
/// Each job's envelope lives in the hash `job:<id>`.
pub struct RedisBroker {
    pool: Pool,
}

impl RedisBroker {
    /// Builds the connection pool without touching the network; connections are
    /// opened on first use.
    pub fn new(redis_url: &str) -> Result<Self, BookingQueueError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BookingQueueError::PoolError(format!("Pool creation error: {}", e)))?;

        Ok(Self { pool })
    }

    pub async fn ping(&self) -> Result<(), BookingQueueError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis job broker reachable");
        Ok(())
    }

    async fn connection(&self) -> Result<Connection, BookingQueueError> {
        Ok(self.pool.get().await?)
    }

    async fn load(&self, conn: &mut Connection, id: &str) -> Result<Option<JobEnvelope>, BookingQueueError> {
        let data: Option<String> = redis::cmd("HGET")
            .arg(job_key(id))
            .arg("data")
            .query_async(conn)
            .await?;

        match data {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(envelope) => Ok(Some(envelope)),
                Err(e) => {
                    warn!("Dropping unreadable job record {}: {}", id, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Appends the commands that persist `envelope` to `pipe`.
    fn save_into(pipe: &mut redis::Pipeline, envelope: &JobEnvelope) -> Result<(), BookingQueueError> {
        let key = job_key(&envelope.id.to_string());
        let data = serde_json::to_string(envelope)?;

        pipe.cmd("HSET")
            .arg(&key)
            .arg("data")
            .arg(data)
            .arg("status")
            .arg(envelope.status.as_str())
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(JOB_RECORD_TTL_SECS)
            .ignore();
        Ok(())
    }

    /// Milliseconds since the epoch at which the job was last claimed, if recorded.
    async fn claimed_at(&self, conn: &mut Connection, id: &str) -> Result<Option<i64>, BookingQueueError> {
        let claimed: Option<i64> = redis::cmd("HGET")
            .arg(job_key(id))
            .arg("claimed_at")
            .query_async(conn)
            .await?;
        Ok(claimed)
    }

    /// Atomically moves `envelope` from `source` back onto its pending list.
    /// Returns false when another process already moved it.
    async fn move_to_pending(
        &self,
        conn: &mut Connection,
        source: &str,
        envelope: &JobEnvelope,
    ) -> Result<bool, BookingQueueError> {
        let id = envelope.id.to_string();
        let data = serde_json::to_string(envelope)?;
        let script = redis::Script::new(MOVE_TO_PENDING_SCRIPT);
        let moved: i64 = script
            .key(source)
            .key(pending_key(&envelope.queue))
            .key(job_key(&id))
            .arg(&id)
            .arg(data)
            .arg(envelope.status.as_str())
            .arg(JOB_RECORD_TTL_SECS)
            .invoke_async(conn)
            .await?;
        Ok(moved == 1)
    }

    async fn release(&self, conn: &mut Connection, queue: &str, id: &str) -> Result<i64, BookingQueueError> {
        let removed: i64 = redis::cmd("LREM")
            .arg(processing_key(queue))
            .arg(1)
            .arg(id)
            .query_async(conn)
            .await?;
        Ok(removed)
    }
}

#[async_trait]
impl JobBroker for RedisBroker {
    async fn push(&self, envelope: &JobEnvelope) -> Result<(), BookingQueueError> {
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        Self::save_into(&mut pipe, envelope)?;
        pipe.cmd("LPUSH")
            .arg(pending_key(&envelope.queue))
            .arg(envelope.id.to_string())
            .ignore();

        let _: () = pipe.query_async(&mut conn).await?;
        debug!("Job {} pushed onto {}", envelope.id, envelope.queue);
        Ok(())
    }

    async fn pop(&self, queue: &str, worker_id: &str) -> Result<Option<JobEnvelope>, BookingQueueError> {
        let mut conn = self.connection().await?;
        let claim = redis::Script::new(CLAIM_SCRIPT);

        loop {
            let id: Option<String> = claim
                .key(pending_key(queue))
                .key(processing_key(queue))
                .arg(job_key(""))
                .arg(Utc::now().timestamp_millis())
                .invoke_async(&mut conn)
                .await?;

            let Some(id) = id else {
                return Ok(None);
            };

            let mut envelope = match self.load(&mut conn, &id).await? {
                Some(envelope) if !envelope.status.is_terminal() => envelope,
                Some(envelope) => {
                    debug!("Job {} already {}, acknowledging without running", id, envelope.status.as_str());
                    self.release(&mut conn, queue, &id).await?;
                    continue;
                }
                None => {
                    warn!("Job {} has no record, discarding", id);
                    self.release(&mut conn, queue, &id).await?;
                    continue;
                }
            };

            envelope.mark_processing(worker_id, Utc::now());

            let mut pipe = redis::pipe();
            Self::save_into(&mut pipe, &envelope)?;
            let _: () = pipe.query_async(&mut conn).await?;

            debug!("Job {} claimed by {}", envelope.id, worker_id);
            return Ok(Some(envelope));
        }
    }

    async fn ack(&self, envelope: &JobEnvelope) -> Result<(), BookingQueueError> {
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        Self::save_into(&mut pipe, envelope)?;
        pipe.cmd("LREM")
            .arg(processing_key(&envelope.queue))
            .arg(1)
            .arg(envelope.id.to_string())
            .ignore();

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn schedule_retry(&self, envelope: &JobEnvelope) -> Result<(), BookingQueueError> {
        let ready_at = envelope.next_attempt_at.unwrap_or_else(Utc::now);
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        Self::save_into(&mut pipe, envelope)?;
        pipe.cmd("LREM")
            .arg(processing_key(&envelope.queue))
            .arg(1)
            .arg(envelope.id.to_string())
            .ignore()
            .cmd("ZADD")
            .arg(delayed_key(&envelope.queue))
            .arg(ready_at.timestamp_millis())
            .arg(envelope.id.to_string())
            .ignore();

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn bury(&self, envelope: &JobEnvelope) -> Result<(), BookingQueueError> {
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        Self::save_into(&mut pipe, envelope)?;
        pipe.cmd("LREM")
            .arg(processing_key(&envelope.queue))
            .arg(1)
            .arg(envelope.id.to_string())
            .ignore()
            .cmd("LPUSH")
            .arg(dead_key(&envelope.queue))
            .arg(envelope.id.to_string())
            .ignore();

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn promote_due(&self, queue: &str, now: DateTime<Utc>) -> Result<u64, BookingQueueError> {
        let mut conn = self.connection().await?;
        let script = redis::Script::new(PROMOTE_SCRIPT);
        let promoted: u64 = script
            .key(delayed_key(queue))
            .key(pending_key(queue))
            .arg(now.timestamp_millis())
            .arg(PROMOTE_BATCH)
            .invoke_async(&mut conn)
            .await?;

        if promoted > 0 {
            debug!("Promoted {} delayed jobs on {}", promoted, queue);
        }
        Ok(promoted)
    }

    async fn recover_stalled(&self, queue: &str, older_than: DateTime<Utc>) -> Result<u64, BookingQueueError> {
        let mut conn = self.connection().await?;
        let in_flight: Vec<String> = redis::cmd("LRANGE")
            .arg(processing_key(queue))
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;

        let mut recovered = 0;
        for id in in_flight {
            let envelope = match self.load(&mut conn, &id).await? {
                Some(envelope) if envelope.status.is_terminal() => {
                    self.release(&mut conn, queue, &id).await?;
                    continue;
                }
                Some(envelope) => envelope,
                None => {
                    self.release(&mut conn, queue, &id).await?;
                    continue;
                }
            };

            // The claim stamp is written together with the move into processing,
            // so a job claimed a moment ago never looks stale here.
            let last_touched = match self.claimed_at(&mut conn, &id).await? {
                Some(millis) => millis.max(envelope.updated_at.timestamp_millis()),
                None => envelope.updated_at.timestamp_millis(),
            };
            if last_touched >= older_than.timestamp_millis() {
                continue;
            }

            let mut requeued = envelope;
            warn!(
                "Recovering stalled job {} on {} (worker {:?})",
                id, queue, requeued.worker_id
            );
            requeued.status = JobStatus::Queued;
            requeued.worker_id = None;
            requeued.updated_at = Utc::now();

            if self.move_to_pending(&mut conn, &processing_key(queue), &requeued).await? {
                recovered += 1;
            }
        }

        Ok(recovered)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<JobEnvelope>, BookingQueueError> {
        let mut conn = self.connection().await?;
        self.load(&mut conn, &id.to_string()).await
    }

    async fn dead_jobs(&self, queue: &str, limit: usize) -> Result<Vec<JobEnvelope>, BookingQueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.connection().await?;
        let ids: Vec<String> = redis::cmd("LRANGE")
            .arg(dead_key(queue))
            .arg(0)
            .arg(limit as isize - 1)
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(envelope) = self.load(&mut conn, &id).await? {
                jobs.push(envelope);
            }
        }
        Ok(jobs)
    }

    async fn requeue_dead(&self, queue: &str, id: Uuid) -> Result<JobEnvelope, BookingQueueError> {
        let mut conn = self.connection().await?;
        let id_str = id.to_string();

        let mut envelope = self
            .load(&mut conn, &id_str)
            .await?
            .ok_or(BookingQueueError::JobNotFound(id))?;

        envelope.reset_for_requeue(Utc::now());
        if !self.move_to_pending(&mut conn, &dead_key(queue), &envelope).await? {
            return Err(BookingQueueError::NotDead(id));
        }

        info!("Dead job {} requeued on {}", id, queue);
        Ok(envelope)
    }

    async fn depth(&self, queue: &str) -> Result<QueueDepth, BookingQueueError> {
        let mut conn = self.connection().await?;
        let (pending, processing, delayed, dead): (u64, u64, u64, u64) = redis::pipe()
            .cmd("LLEN")
            .arg(pending_key(queue))
            .cmd("LLEN")
            .arg(processing_key(queue))
            .cmd("ZCARD")
            .arg(delayed_key(queue))
            .cmd("LLEN")
            .arg(dead_key(queue))
            .query_async(&mut conn)
            .await?;

        Ok(QueueDepth {
            queue: queue.to_string(),
            pending,
            processing,
            delayed,
            dead,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(pending_key("emails"), "jobs:emails:pending");
        assert_eq!(processing_key("emails"), "jobs:emails:processing");
        assert_eq!(delayed_key("emails"), "jobs:emails:delayed");
        assert_eq!(dead_key("emails"), "jobs:emails:dead");
        assert_eq!(job_key("abc"), "job:abc");
    }

    #[test]
    fn test_claim_script_record_prefix_matches_job_key() {
        // The claim script appends the id to this prefix inside Redis.
        assert_eq!(format!("{}{}", job_key(""), "abc"), job_key("abc"));
        assert!(CLAIM_SCRIPT.contains("RPOPLPUSH"));
    }
}
