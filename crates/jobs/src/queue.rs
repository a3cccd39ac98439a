use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Job descriptors are kept for seven days, then swept.
const JOB_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Critical,
    High,
    Normal,
    Low,
}

impl JobPriority {
    /// Drain order for the dequeue scan.
    pub const ALL: [JobPriority; 4] = [
        JobPriority::Critical,
        JobPriority::High,
        JobPriority::Normal,
        JobPriority::Low,
    ];

    fn index(self) -> usize {
        match self {
            JobPriority::Critical => 0,
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }
}

/// A unit of out-of-band work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub args: JsonValue,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<JsonValue>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub priority: JobPriority,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub user_id: Option<Uuid>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: JobPriority::Normal,
            scheduled_at: None,
            max_retries: 3,
            timeout_secs: 300,
            user_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: HashMap<String, usize>,
    pub total_pending: usize,
    pub scheduled: usize,
    pub processing: usize,
    pub dead_letter: usize,
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<Uuid, Job>,
    queues: [VecDeque<Uuid>; 4],
    /// Readiness-ordered: key = (unix second the job becomes due, id).
    scheduled: BTreeMap<(i64, Uuid), ()>,
    processing: HashSet<Uuid>,
    dead_letter: VecDeque<Uuid>,
    results: HashMap<Uuid, JsonValue>,
}

/// The in-process job queue.
///
/// Every public operation takes the single state lock once, so enqueue,
/// promotion, dequeue-with-inflight-mark, complete and fail-with-retry are
/// each atomic against the whole structure.
#[derive(Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
}

/// Exponential backoff for a failed attempt, capped at one hour.
pub(crate) fn backoff_delay_secs(retry_count: u32) -> i64 {
    let exp = 2_i64.saturating_pow(retry_count.min(30));
    (60 * exp).min(3600)
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a job. A future `scheduled_at` parks it in the scheduled set;
    /// otherwise it joins its priority queue immediately.
    pub fn enqueue(&self, name: &str, args: JsonValue, options: EnqueueOptions) -> Uuid {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            name: name.to_string(),
            args,
            status: JobStatus::Pending,
            priority: options.priority,
            created_at: now,
            scheduled_at: options.scheduled_at,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
            retry_count: 0,
            max_retries: options.max_retries,
            timeout_secs: options.timeout_secs,
            user_id: options.user_id,
        };
        let id = job.id;

        let mut state = self.state.lock().expect("job queue lock poisoned");
        match options.scheduled_at {
            Some(at) if at > now => {
                state.scheduled.insert((at.timestamp(), id), ());
            }
            _ => {
                state.queues[options.priority.index()].push_back(id);
            }
        }
        state.jobs.insert(id, job);
        drop(state);

        tracing::info!(job_id = %id, name, priority = ?options.priority, "Job enqueued");
        id
    }

    /// Promotes due scheduled jobs, then pops the highest-priority pending
    /// job, marking it running and in-flight. Returns `None` when idle.
    pub fn dequeue(&self) -> Option<Job> {
        let now = Utc::now();
        let mut state = self.state.lock().expect("job queue lock poisoned");
        Self::sweep_expired_locked(&mut state, now);
        Self::promote_due_locked(&mut state, now);

        for priority in JobPriority::ALL {
            if let Some(id) = state.queues[priority.index()].pop_front() {
                // A cancelled or swept job can leave a dangling id behind.
                let Some(job) = state.jobs.get_mut(&id) else {
                    continue;
                };
                job.status = JobStatus::Running;
                job.started_at = Some(now);
                let job = job.clone();
                state.processing.insert(id);
                return Some(job);
            }
        }
        None
    }

    fn promote_due_locked(state: &mut QueueState, now: DateTime<Utc>) {
        let due: Vec<(i64, Uuid)> = state
            .scheduled
            .range(..=(now.timestamp(), Uuid::max()))
            .map(|(key, _)| *key)
            .collect();
        for key in due {
            state.scheduled.remove(&key);
            let (_, id) = key;
            if let Some(job) = state.jobs.get(&id) {
                let index = job.priority.index();
                state.queues[index].push_back(id);
                tracing::debug!(job_id = %id, "Moved scheduled job to its priority queue");
            }
        }
    }

    fn sweep_expired_locked(state: &mut QueueState, now: DateTime<Utc>) {
        let cutoff = now - Duration::days(JOB_TTL_DAYS);
        let expired: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|j| j.created_at < cutoff)
            .map(|j| j.id)
            .collect();
        for id in expired {
            state.jobs.remove(&id);
            state.results.remove(&id);
            state.processing.remove(&id);
            state.dead_letter.retain(|d| *d != id);
            for queue in &mut state.queues {
                queue.retain(|q| *q != id);
            }
            state.scheduled.retain(|(_, sid), _| *sid != id);
        }
    }

    /// Marks a job completed and stores its result.
    pub fn complete(&self, job_id: Uuid, result: Option<JsonValue>) {
        let mut state = self.state.lock().expect("job queue lock poisoned");
        state.processing.remove(&job_id);
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
            job.result = result.clone();
            let name = job.name.clone();
            if let Some(result) = result {
                state.results.insert(job_id, result);
            }
            tracing::info!(job_id = %job_id, name = %name, "Job completed");
        }
    }

    /// Fails an attempt. With retry budget left the job re-enters the
    /// scheduled set with exponential backoff; otherwise it lands in the
    /// dead-letter queue.
    pub fn fail(&self, job_id: Uuid, error: &str) {
        self.fail_inner(job_id, error, true)
    }

    /// Fails a job straight to the dead-letter queue, ignoring any remaining
    /// retry budget. Used for failures that retrying cannot fix (no handler
    /// registered, argument validation).
    pub fn fail_no_retry(&self, job_id: Uuid, error: &str) {
        self.fail_inner(job_id, error, false)
    }

    fn fail_inner(&self, job_id: Uuid, error: &str, retry: bool) {
        let mut state = self.state.lock().expect("job queue lock poisoned");
        state.processing.remove(&job_id);
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return;
        };

        if retry && job.retry_count < job.max_retries {
            job.retry_count += 1;
            job.status = JobStatus::Retrying;
            job.error = Some(error.to_string());
            let delay = backoff_delay_secs(job.retry_count);
            let due = Utc::now() + Duration::seconds(delay);
            job.scheduled_at = Some(due);
            let (retry_count, max_retries, name) =
                (job.retry_count, job.max_retries, job.name.clone());
            state.scheduled.insert((due.timestamp(), job_id), ());
            tracing::warn!(
                job_id = %job_id,
                name = %name,
                retry = %format!("{}/{}", retry_count, max_retries),
                delay_secs = delay,
                error,
                "Job failed, retry scheduled"
            );
        } else {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
            job.error = Some(error.to_string());
            let name = job.name.clone();
            state.dead_letter.push_back(job_id);
            tracing::error!(job_id = %job_id, name = %name, error, "Job failed permanently");
        }
    }

    /// Cancels a pending or retrying job, pulling it out of whichever queue
    /// holds it. Running jobs cannot be cancelled here.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        let mut state = self.state.lock().expect("job queue lock poisoned");
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return false;
        };
        if !matches!(job.status, JobStatus::Pending | JobStatus::Retrying) {
            return false;
        }
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        state.scheduled.retain(|(_, sid), _| *sid != job_id);
        for queue in &mut state.queues {
            queue.retain(|q| *q != job_id);
        }
        tracing::info!(job_id = %job_id, "Job cancelled");
        true
    }

    pub fn get_job(&self, job_id: Uuid) -> Option<Job> {
        let state = self.state.lock().expect("job queue lock poisoned");
        state.jobs.get(&job_id).cloned()
    }

    pub fn get_result(&self, job_id: Uuid) -> Option<JsonValue> {
        let state = self.state.lock().expect("job queue lock poisoned");
        state.results.get(&job_id).cloned()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock().expect("job queue lock poisoned");
        let mut pending = HashMap::new();
        let mut total_pending = 0;
        for priority in JobPriority::ALL {
            let depth = state.queues[priority.index()].len();
            total_pending += depth;
            pending.insert(format!("{:?}", priority).to_lowercase(), depth);
        }
        QueueStats {
            pending,
            total_pending,
            scheduled: state.scheduled.len(),
            processing: state.processing.len(),
            dead_letter: state.dead_letter.len(),
        }
    }

    pub fn dead_letter_jobs(&self, limit: usize) -> Vec<Job> {
        let state = self.state.lock().expect("job queue lock poisoned");
        state
            .dead_letter
            .iter()
            .take(limit)
            .filter_map(|id| state.jobs.get(id).cloned())
            .collect()
    }

    /// Puts a dead-lettered job back on its priority queue with a fresh
    /// retry budget.
    pub fn retry_dead_letter(&self, job_id: Uuid) -> bool {
        let mut state = self.state.lock().expect("job queue lock poisoned");
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return false;
        };
        if job.status != JobStatus::Failed {
            return false;
        }
        job.status = JobStatus::Pending;
        job.retry_count = 0;
        job.error = None;
        job.started_at = None;
        job.completed_at = None;
        let index = job.priority.index();
        state.dead_letter.retain(|d| *d != job_id);
        state.queues[index].push_back(job_id);
        tracing::info!(job_id = %job_id, "Job moved from DLQ back to queue");
        true
    }

    pub fn clear_dead_letter(&self) -> usize {
        let mut state = self.state.lock().expect("job queue lock poisoned");
        let count = state.dead_letter.len();
        state.dead_letter.clear();
        tracing::warn!(count, "Cleared dead letter queue");
        count
    }

    /// Test hook: forces a scheduled job to be due immediately.
    #[cfg(test)]
    pub(crate) fn make_due(&self, job_id: Uuid) {
        let mut state = self.state.lock().expect("job queue lock poisoned");
        state.scheduled.retain(|(_, sid), _| *sid != job_id);
        state.scheduled.insert((0, job_id), ());
    }

    /// Test hook: every structure currently holding the job.
    #[cfg(test)]
    pub(crate) fn locations(&self, job_id: Uuid) -> Vec<&'static str> {
        let state = self.state.lock().expect("job queue lock poisoned");
        let mut locations = Vec::new();
        if state.queues.iter().any(|q| q.contains(&job_id)) {
            locations.push("queue");
        }
        if state.scheduled.keys().any(|(_, sid)| *sid == job_id) {
            locations.push("scheduled");
        }
        if state.processing.contains(&job_id) {
            locations.push("processing");
        }
        if state.dead_letter.contains(&job_id) {
            locations.push("dead_letter");
        }
        if state.results.contains_key(&job_id) {
            locations.push("results");
        }
        locations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dequeue_respects_priority_order() {
        let queue = JobQueue::new();
        let low = queue.enqueue("low", json!({}), EnqueueOptions {
            priority: JobPriority::Low,
            ..Default::default()
        });
        let critical = queue.enqueue("critical", json!({}), EnqueueOptions {
            priority: JobPriority::Critical,
            ..Default::default()
        });
        let normal = queue.enqueue("normal", json!({}), EnqueueOptions::default());

        assert_eq!(queue.dequeue().unwrap().id, critical);
        assert_eq!(queue.dequeue().unwrap().id, normal);
        assert_eq!(queue.dequeue().unwrap().id, low);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn job_is_in_exactly_one_place_at_every_stage() {
        let queue = JobQueue::new();
        let id = queue.enqueue("work", json!({}), EnqueueOptions::default());
        assert_eq!(queue.locations(id), vec!["queue"]);

        let job = queue.dequeue().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());
        assert_eq!(queue.locations(id), vec!["processing"]);

        queue.fail(id, "boom");
        assert_eq!(queue.locations(id), vec!["scheduled"]);

        queue.make_due(id);
        queue.dequeue().unwrap();
        queue.complete(id, Some(json!({"ok": true})));
        assert_eq!(queue.locations(id), vec!["results"]);
        assert_eq!(queue.get_result(id), Some(json!({"ok": true})));
    }

    #[test]
    fn scheduled_job_in_the_past_is_promoted_on_dequeue() {
        let queue = JobQueue::new();
        let id = queue.enqueue("later", json!({}), EnqueueOptions {
            scheduled_at: Some(Utc::now() - Duration::seconds(30)),
            ..Default::default()
        });
        let job = queue.dequeue().expect("past-scheduled job should be due");
        assert_eq!(job.id, id);
    }

    #[test]
    fn future_scheduled_job_waits() {
        let queue = JobQueue::new();
        let id = queue.enqueue("later", json!({}), EnqueueOptions {
            scheduled_at: Some(Utc::now() + Duration::seconds(3600)),
            ..Default::default()
        });
        assert!(queue.dequeue().is_none());
        assert_eq!(queue.locations(id), vec!["scheduled"]);
    }

    #[test]
    fn backoff_doubles_and_caps_at_one_hour() {
        assert_eq!(backoff_delay_secs(1), 120);
        assert_eq!(backoff_delay_secs(2), 240);
        assert_eq!(backoff_delay_secs(3), 480);
        assert_eq!(backoff_delay_secs(6), 3600);
        assert_eq!(backoff_delay_secs(20), 3600);
    }

    #[test]
    fn retry_budget_exhaustion_lands_in_dlq() {
        let queue = JobQueue::new();
        let id = queue.enqueue("fetch_missing_candles", json!({}), EnqueueOptions {
            max_retries: 2,
            timeout_secs: 5,
            ..Default::default()
        });

        // Attempt 1.
        queue.dequeue().unwrap();
        queue.fail(id, "handler raised");
        let job = queue.get_job(id).unwrap();
        assert_eq!(job.status, JobStatus::Retrying);
        assert_eq!(job.retry_count, 1);
        let delay = (job.scheduled_at.unwrap() - Utc::now()).num_seconds();
        assert!((118..=120).contains(&delay), "delay was {}", delay);

        // Attempt 2.
        queue.make_due(id);
        queue.dequeue().unwrap();
        queue.fail(id, "handler raised");
        let job = queue.get_job(id).unwrap();
        assert_eq!(job.retry_count, 2);
        let delay = (job.scheduled_at.unwrap() - Utc::now()).num_seconds();
        assert!((238..=240).contains(&delay), "delay was {}", delay);

        // Attempt 3: budget exhausted.
        queue.make_due(id);
        queue.dequeue().unwrap();
        queue.fail(id, "handler raised");
        let job = queue.get_job(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("handler raised"));
        assert_eq!(queue.locations(id), vec!["dead_letter"]);
    }

    #[test]
    fn cancel_only_hits_pending_or_retrying() {
        let queue = JobQueue::new();
        let id = queue.enqueue("work", json!({}), EnqueueOptions::default());
        assert!(queue.cancel(id));
        assert_eq!(queue.get_job(id).unwrap().status, JobStatus::Cancelled);
        assert!(queue.locations(id).is_empty());
        // A cancelled job never comes back out.
        assert!(queue.dequeue().is_none());
        assert!(!queue.cancel(id));
    }

    #[test]
    fn same_body_enqueued_twice_yields_two_jobs() {
        let queue = JobQueue::new();
        let a = queue.enqueue("dup", json!({"x": 1}), EnqueueOptions::default());
        let b = queue.enqueue("dup", json!({"x": 1}), EnqueueOptions::default());
        assert_ne!(a, b);
        assert_eq!(queue.stats().total_pending, 2);
    }

    #[test]
    fn dlq_retry_resets_the_budget() {
        let queue = JobQueue::new();
        let id = queue.enqueue("work", json!({}), EnqueueOptions {
            max_retries: 0,
            ..Default::default()
        });
        queue.dequeue().unwrap();
        queue.fail(id, "boom");
        assert_eq!(queue.locations(id), vec!["dead_letter"]);

        assert!(queue.retry_dead_letter(id));
        let job = queue.get_job(id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert_eq!(queue.locations(id), vec!["queue"]);
    }

    #[test]
    fn stats_count_each_structure() {
        let queue = JobQueue::new();
        queue.enqueue("a", json!({}), EnqueueOptions::default());
        queue.enqueue("b", json!({}), EnqueueOptions {
            priority: JobPriority::High,
            ..Default::default()
        });
        queue.enqueue("c", json!({}), EnqueueOptions {
            scheduled_at: Some(Utc::now() + Duration::seconds(60)),
            ..Default::default()
        });

        let stats = queue.stats();
        assert_eq!(stats.total_pending, 2);
        assert_eq!(stats.scheduled, 1);
        assert_eq!(stats.pending["high"], 1);
        assert_eq!(stats.processing, 0);
    }
}
