//! # Ephemeral Store — Shared Job Queue and Correlation Records
//!
//! Everything a detection job needs between submission and resolution:
//!
//! | Key | Type | Written by |
//! |-----|------|------------|
//! | `detect:queue` | list of JSON [`QueuedJob`] | dispatcher (LPUSH), runner (RPOP) |
//! | `job:{h}:state` | `"pending"` or JSON [`JobOutcome`] | dispatcher, runner |
//! | `job:{h}:origin` | hash `user_id`, `submitted_at` | dispatcher |
//! | `job:{h}:context` | hash of optional fields, `""` = absent | attach-context caller |
//! | `job:{h}:lock` | resolve lock, `SET NX PX` with an owner token | resolver |
//!
//! No TTLs: keys live until [`EphemeralStore::finish`] deletes them. With Redis
//! the state is shared across server and worker processes. The in-memory
//! backend serves single-process deployments and tests.

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::detection::{JobContext, JobHandle, JobOrigin, JobOutcome, JobState, QueuedJob};
use crate::error::Result;

const QUEUE_KEY: &str = "detect:queue";
const PENDING: &str = "pending";

fn state_key(h: &JobHandle) -> String {
    format!("job:{}:state", h)
}

fn origin_key(h: &JobHandle) -> String {
    format!("job:{}:origin", h)
}

fn context_key(h: &JobHandle) -> String {
    format!("job:{}:context", h)
}

fn lock_key(h: &JobHandle) -> String {
    format!("job:{}:lock", h)
}

/// Deletes the lock only while it still holds the caller's token.
const RELEASE_LOCK: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Proof of holding a handle's resolve lock; required to release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(Uuid);

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Backing state for [`EphemeralStore::in_memory`].
#[derive(Default)]
pub struct MemoryInner {
    queue: VecDeque<QueuedJob>,
    states: HashMap<JobHandle, JobState>,
    origins: HashMap<JobHandle, JobOrigin>,
    contexts: HashMap<JobHandle, JobContext>,
    locks: HashMap<JobHandle, (Instant, Uuid)>,
}

#[derive(Clone)]
pub enum EphemeralStore {
    Redis(ConnectionManager),
    Memory(Arc<Mutex<MemoryInner>>),
}

impl EphemeralStore {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(EphemeralStore::Redis(manager))
    }

    pub fn in_memory() -> Self {
        EphemeralStore::Memory(Arc::new(Mutex::new(MemoryInner::default())))
    }

    pub fn backend(&self) -> &'static str {
        match self {
            EphemeralStore::Redis(_) => "redis",
            EphemeralStore::Memory(_) => "memory",
        }
    }

    pub async fn ping(&self) -> Result<()> {
        if let EphemeralStore::Redis(conn) = self {
            let mut conn = conn.clone();
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        }
        Ok(())
    }

    /// Mark the job pending, write its origin record, and queue it, atomically.
    pub async fn enqueue(&self, job: &QueuedJob, origin: &JobOrigin) -> Result<()> {
        match self {
            EphemeralStore::Redis(conn) => {
                let mut conn = conn.clone();
                let payload = serde_json::to_string(job)?;
                let user_id = origin.user_id.to_string();
                let submitted_at = origin.submitted_at.to_rfc3339();
                redis::pipe()
                    .atomic()
                    .set(state_key(&job.handle), PENDING)
                    .hset_multiple(
                        origin_key(&job.handle),
                        &[
                            ("user_id", user_id.as_str()),
                            ("submitted_at", submitted_at.as_str()),
                        ],
                    )
                    .lpush(QUEUE_KEY, payload)
                    .exec_async(&mut conn)
                    .await?;
            }
            EphemeralStore::Memory(inner) => {
                let mut inner = lock_or_recover(inner);
                inner.states.insert(job.handle, JobState::Pending);
                inner.origins.insert(job.handle, origin.clone());
                inner.queue.push_front(job.clone());
            }
        }
        Ok(())
    }

    /// Pop the oldest queued job, if any.
    pub async fn dequeue(&self) -> Result<Option<QueuedJob>> {
        match self {
            EphemeralStore::Redis(conn) => {
                let mut conn = conn.clone();
                let raw: Option<String> = conn.rpop(QUEUE_KEY, None).await?;
                match raw {
                    Some(s) => Ok(Some(serde_json::from_str(&s)?)),
                    None => Ok(None),
                }
            }
            EphemeralStore::Memory(inner) => Ok(lock_or_recover(inner).queue.pop_back()),
        }
    }

    pub async fn queue_len(&self) -> Result<usize> {
        match self {
            EphemeralStore::Redis(conn) => {
                let mut conn = conn.clone();
                Ok(conn.llen(QUEUE_KEY).await?)
            }
            EphemeralStore::Memory(inner) => Ok(lock_or_recover(inner).queue.len()),
        }
    }

    /// Replace the context record for `h`. The whole record is swapped in
    /// one step so readers never see a mix of two writes.
    pub async fn put_context(&self, h: &JobHandle, ctx: &JobContext) -> Result<()> {
        match self {
            EphemeralStore::Redis(conn) => {
                let mut conn = conn.clone();
                let key = context_key(h);
                let fields = context_fields(ctx);
                redis::pipe()
                    .atomic()
                    .del(&key)
                    .hset_multiple(&key, &fields)
                    .exec_async(&mut conn)
                    .await?;
            }
            EphemeralStore::Memory(inner) => {
                lock_or_recover(inner).contexts.insert(*h, ctx.clone());
            }
        }
        Ok(())
    }

    /// `None` means the handle was never submitted or has already been resolved.
    pub async fn job_state(&self, h: &JobHandle) -> Result<Option<JobState>> {
        match self {
            EphemeralStore::Redis(conn) => {
                let mut conn = conn.clone();
                let raw: Option<String> = conn.get(state_key(h)).await?;
                match raw.as_deref() {
                    None => Ok(None),
                    Some(PENDING) => Ok(Some(JobState::Pending)),
                    Some(json) => Ok(Some(JobState::Done(serde_json::from_str(json)?))),
                }
            }
            EphemeralStore::Memory(inner) => Ok(lock_or_recover(inner).states.get(h).cloned()),
        }
    }

    pub async fn set_outcome(&self, h: &JobHandle, outcome: &JobOutcome) -> Result<()> {
        match self {
            EphemeralStore::Redis(conn) => {
                let mut conn = conn.clone();
                let json = serde_json::to_string(outcome)?;
                let _: () = conn.set(state_key(h), json).await?;
            }
            EphemeralStore::Memory(inner) => {
                lock_or_recover(inner)
                    .states
                    .insert(*h, JobState::Done(outcome.clone()));
            }
        }
        Ok(())
    }

    /// Read both correlation records. Either may be absent.
    pub async fn correlation(
        &self,
        h: &JobHandle,
    ) -> Result<(Option<JobOrigin>, Option<JobContext>)> {
        match self {
            EphemeralStore::Redis(conn) => {
                let mut conn = conn.clone();
                let origin: HashMap<String, String> = conn.hgetall(origin_key(h)).await?;
                let context: HashMap<String, String> = conn.hgetall(context_key(h)).await?;
                Ok((origin_from_map(&origin), context_from_map(&context)))
            }
            EphemeralStore::Memory(inner) => {
                let inner = lock_or_recover(inner);
                Ok((inner.origins.get(h).cloned(), inner.contexts.get(h).cloned()))
            }
        }
    }

    /// Take the per-handle resolve lock. `None` if another poller holds it.
    pub async fn try_lock(&self, h: &JobHandle, ttl: Duration) -> Result<Option<LockToken>> {
        let token = Uuid::new_v4();
        match self {
            EphemeralStore::Redis(conn) => {
                let mut conn = conn.clone();
                let acquired: Option<String> = redis::cmd("SET")
                    .arg(lock_key(h))
                    .arg(token.to_string())
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl.as_millis() as u64)
                    .query_async(&mut conn)
                    .await?;
                Ok(acquired.map(|_| LockToken(token)))
            }
            EphemeralStore::Memory(inner) => {
                let mut inner = lock_or_recover(inner);
                let now = Instant::now();
                match inner.locks.get(h) {
                    Some((deadline, _)) if *deadline > now => Ok(None),
                    _ => {
                        inner.locks.insert(*h, (now + ttl, token));
                        Ok(Some(LockToken(token)))
                    }
                }
            }
        }
    }

    /// Release the lock if `token` still owns it. A lock that expired and was
    /// taken by another poller is left alone.
    pub async fn unlock(&self, h: &JobHandle, token: &LockToken) -> Result<()> {
        match self {
            EphemeralStore::Redis(conn) => {
                let mut conn = conn.clone();
                let _: i64 = redis::Script::new(RELEASE_LOCK)
                    .key(lock_key(h))
                    .arg(token.0.to_string())
                    .invoke_async(&mut conn)
                    .await?;
            }
            EphemeralStore::Memory(inner) => {
                let mut inner = lock_or_recover(inner);
                if matches!(inner.locks.get(h), Some((_, owner)) if *owner == token.0) {
                    inner.locks.remove(h);
                }
            }
        }
        Ok(())
    }

    /// Delete every key for `h`: outcome, origin, context, and lock.
    pub async fn finish(&self, h: &JobHandle) -> Result<()> {
        match self {
            EphemeralStore::Redis(conn) => {
                let mut conn = conn.clone();
                redis::pipe()
                    .atomic()
                    .del(state_key(h))
                    .del(origin_key(h))
                    .del(context_key(h))
                    .del(lock_key(h))
                    .exec_async(&mut conn)
                    .await?;
            }
            EphemeralStore::Memory(inner) => {
                let mut inner = lock_or_recover(inner);
                inner.states.remove(h);
                inner.origins.remove(h);
                inner.contexts.remove(h);
                inner.locks.remove(h);
            }
        }
        Ok(())
    }
}

fn opt_str(v: &Option<String>) -> String {
    v.clone().unwrap_or_default()
}

fn opt_num<T: ToString>(v: Option<T>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

fn context_fields(ctx: &JobContext) -> Vec<(&'static str, String)> {
    vec![
        ("project_id", opt_num(ctx.project_id)),
        ("latitude", opt_num(ctx.latitude)),
        ("longitude", opt_num(ctx.longitude)),
        ("postal_code", opt_str(&ctx.postal_code)),
        ("state", opt_str(&ctx.state)),
        ("city", opt_str(&ctx.city)),
        ("street", opt_str(&ctx.street)),
        ("street_number", opt_str(&ctx.street_number)),
    ]
}

fn field<'a>(map: &'a HashMap<String, String>, name: &str) -> Option<&'a String> {
    map.get(name).filter(|s| !s.is_empty())
}

fn origin_from_map(map: &HashMap<String, String>) -> Option<JobOrigin> {
    let user_id = field(map, "user_id").and_then(|s| s.parse().ok())?;
    let submitted_at = field(map, "submitted_at")
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    Some(JobOrigin {
        user_id,
        submitted_at,
    })
}

fn context_from_map(map: &HashMap<String, String>) -> Option<JobContext> {
    if map.is_empty() {
        return None;
    }
    Some(JobContext {
        project_id: field(map, "project_id").and_then(|s| s.parse().ok()),
        latitude: field(map, "latitude").and_then(|s| s.parse().ok()),
        longitude: field(map, "longitude").and_then(|s| s.parse().ok()),
        postal_code: field(map, "postal_code").cloned(),
        state: field(map, "state").cloned(),
        city: field(map, "city").cloned(),
        street: field(map, "street").cloned(),
        street_number: field(map, "street_number").cloned(),
    })
}
