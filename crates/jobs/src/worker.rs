use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::JobError;
use crate::queue::{Job, JobQueue};

/// An async handler for one job name.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, args: JsonValue) -> Result<JsonValue, JobError>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JsonValue) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JsonValue, JobError>> + Send,
{
    async fn run(&self, args: JsonValue) -> Result<JsonValue, JobError> {
        (self.f)(args).await
    }
}

/// Deserializes the free-form argument map into a handler's typed argument
/// struct. Failure fails the job with a validation error (never retried).
pub fn parse_args<T: DeserializeOwned>(args: &JsonValue) -> Result<T, JobError> {
    serde_json::from_value(args.clone()).map_err(|e| JobError::InvalidArgs(e.to_string()))
}

/// Handlers are registered by name at startup and frozen before workers
/// start. A dequeued job whose name has no handler fails immediately, which
/// tombstones obsolete enqueues.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_name: &str, handler: Arc<dyn JobHandler>) {
        tracing::info!(job_name, "Registered job handler");
        self.handlers.insert(job_name.to_string(), handler);
    }

    /// Registers a plain async closure as a handler.
    pub fn register_fn<F, Fut>(&mut self, job_name: &str, f: F)
    where
        F: Fn(JsonValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JsonValue, JobError>> + Send + 'static,
    {
        self.register(job_name, Arc::new(FnHandler { f }));
    }

    pub fn get(&self, job_name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_name).cloned()
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug, Default)]
pub struct WorkerStats {
    pub processed: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
}

impl WorkerStats {
    pub fn success_rate(&self) -> f64 {
        let processed = self.processed.load(Ordering::Relaxed);
        if processed == 0 {
            return 100.0;
        }
        self.succeeded.load(Ordering::Relaxed) as f64 / processed as f64 * 100.0
    }
}

/// A single worker: polls the queue, runs handlers under the job's timeout,
/// and reports completion/failure back to the queue.
pub struct Worker {
    pub worker_id: String,
    queue: Arc<JobQueue>,
    registry: Arc<HandlerRegistry>,
    poll_interval: Duration,
    max_concurrent_jobs: usize,
    in_flight: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
    shutdown: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    pub stats: Arc<WorkerStats>,
}

impl Worker {
    pub fn new(
        worker_id: &str,
        queue: Arc<JobQueue>,
        registry: Arc<HandlerRegistry>,
        poll_interval: Duration,
        max_concurrent_jobs: usize,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            worker_id: worker_id.to_string(),
            queue,
            registry,
            poll_interval,
            max_concurrent_jobs: max_concurrent_jobs.max(1),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
            loop_handle: Mutex::new(None),
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn start(&self) {
        let queue = self.queue.clone();
        let registry = self.registry.clone();
        let in_flight = self.in_flight.clone();
        let stats = self.stats.clone();
        let poll_interval = self.poll_interval;
        let max_concurrent = self.max_concurrent_jobs;
        let worker_id = self.worker_id.clone();
        let mut shutdown = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            tracing::info!(worker_id = %worker_id, "Worker started");
            loop {
                if *shutdown.borrow() {
                    break;
                }

                // Reap finished job tasks and respect the concurrency gate.
                in_flight.lock().expect("worker lock poisoned").retain(|_, h| !h.is_finished());
                let busy =
                    in_flight.lock().expect("worker lock poisoned").len() >= max_concurrent;

                let job = if busy { None } else { queue.dequeue() };
                match job {
                    Some(job) => {
                        let job_id = job.id;
                        let task = tokio::spawn(Self::process_job(
                            queue.clone(),
                            registry.clone(),
                            stats.clone(),
                            worker_id.clone(),
                            job,
                        ));
                        in_flight
                            .lock()
                            .expect("worker lock poisoned")
                            .insert(job_id, task);
                    }
                    None => {
                        tokio::select! {
                            _ = tokio::time::sleep(poll_interval) => {}
                            _ = shutdown.changed() => {}
                        }
                    }
                }
            }
            tracing::info!(worker_id = %worker_id, "Worker stopped");
        });
        *self.loop_handle.lock().expect("worker lock poisoned") = Some(handle);
    }

    async fn process_job(
        queue: Arc<JobQueue>,
        registry: Arc<HandlerRegistry>,
        stats: Arc<WorkerStats>,
        worker_id: String,
        job: Job,
    ) {
        tracing::info!(worker_id = %worker_id, job_id = %job.id, name = %job.name, "Processing job");
        stats.processed.fetch_add(1, Ordering::Relaxed);

        let Some(handler) = registry.get(&job.name) else {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            queue.fail_no_retry(
                job.id,
                &format!("No handler registered for job: {}", job.name),
            );
            return;
        };

        let timeout = Duration::from_secs(job.timeout_secs);
        match tokio::time::timeout(timeout, handler.run(job.args.clone())).await {
            Ok(Ok(result)) => {
                stats.succeeded.fetch_add(1, Ordering::Relaxed);
                let result = if result.is_null() { None } else { Some(result) };
                queue.complete(job.id, result);
            }
            Ok(Err(JobError::InvalidArgs(message))) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                queue.fail_no_retry(job.id, &format!("Invalid job arguments: {}", message));
            }
            Ok(Err(JobError::Failed(message))) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                queue.fail(job.id, &message);
            }
            Err(_) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                queue.fail(
                    job.id,
                    &format!("Job timed out after {}s", job.timeout_secs),
                );
            }
        }
    }

    /// Stops the poll loop, optionally waiting for in-flight jobs, and
    /// aborts whatever is left.
    pub async fn stop(&self, wait_for_jobs: bool) {
        let _ = self.shutdown.send(true);

        if wait_for_jobs {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
            loop {
                let remaining = {
                    let mut in_flight = self.in_flight.lock().expect("worker lock poisoned");
                    in_flight.retain(|_, h| !h.is_finished());
                    in_flight.len()
                };
                if remaining == 0 || tokio::time::Instant::now() >= deadline {
                    if remaining > 0 {
                        tracing::warn!(
                            worker_id = %self.worker_id,
                            remaining,
                            "Timeout waiting for jobs"
                        );
                    }
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        for (job_id, handle) in self.in_flight.lock().expect("worker lock poisoned").drain() {
            if !handle.is_finished() {
                handle.abort();
                tracing::warn!(job_id = %job_id, "Cancelled in-flight job");
            }
        }
        if let Some(handle) = self.loop_handle.lock().expect("worker lock poisoned").take() {
            let _ = handle.await;
        }
    }
}

/// A pool of identical workers sharing one queue and handler registry.
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    pub fn new(
        num_workers: usize,
        queue: Arc<JobQueue>,
        registry: Arc<HandlerRegistry>,
        poll_interval: Duration,
        max_concurrent_per_worker: usize,
    ) -> Self {
        let workers = (0..num_workers.max(1))
            .map(|i| {
                Worker::new(
                    &format!("pool-worker-{}", i),
                    queue.clone(),
                    registry.clone(),
                    poll_interval,
                    max_concurrent_per_worker,
                )
            })
            .collect();
        Self { workers }
    }

    pub fn start(&self) {
        for worker in &self.workers {
            worker.start();
        }
        tracing::info!(num_workers = self.workers.len(), "Worker pool started");
    }

    pub async fn stop(&self, wait_for_jobs: bool) {
        for worker in &self.workers {
            worker.stop(wait_for_jobs).await;
        }
        tracing::info!("Worker pool stopped");
    }

    pub fn total_processed(&self) -> u64 {
        self.workers
            .iter()
            .map(|w| w.stats.processed.load(Ordering::Relaxed))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{EnqueueOptions, JobStatus};
    use chrono::Utc;
    use serde::Deserialize;
    use serde_json::json;

    fn worker_with(registry: HandlerRegistry) -> (Arc<JobQueue>, Worker) {
        let queue = Arc::new(JobQueue::new());
        let worker = Worker::new(
            "test-worker",
            queue.clone(),
            Arc::new(registry),
            Duration::from_millis(10),
            1,
        );
        (queue, worker)
    }

    async fn wait_for_status(queue: &JobQueue, id: Uuid, status: JobStatus) -> Job {
        for _ in 0..200 {
            if let Some(job) = queue.get_job(id) {
                if job.status == status {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached {:?}", status);
    }

    #[tokio::test]
    async fn handler_result_round_trips_through_the_queue() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("double", |args| async move {
            #[derive(Deserialize)]
            struct Args {
                value: i64,
            }
            let args: Args = parse_args(&args)?;
            Ok(json!({"doubled": args.value * 2}))
        });
        let (queue, worker) = worker_with(registry);
        worker.start();

        let id = queue.enqueue("double", json!({"value": 21}), EnqueueOptions::default());
        wait_for_status(&queue, id, JobStatus::Completed).await;
        assert_eq!(queue.get_result(id), Some(json!({"doubled": 42})));

        worker.stop(true).await;
    }

    #[tokio::test]
    async fn missing_handler_tombstones_the_job() {
        let (queue, worker) = worker_with(HandlerRegistry::new());
        worker.start();

        let id = queue.enqueue("retired_job", json!({}), EnqueueOptions::default());
        let job = wait_for_status(&queue, id, JobStatus::Failed).await;
        assert!(
            job.error
                .as_deref()
                .unwrap()
                .contains("No handler registered for job: retired_job")
        );
        // No retries were burned getting there.
        assert_eq!(job.retry_count, 0);

        worker.stop(true).await;
    }

    #[tokio::test]
    async fn invalid_args_fail_without_retry() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("typed", |args| async move {
            #[derive(Deserialize)]
            struct Args {
                #[allow(dead_code)]
                symbol: String,
            }
            let _args: Args = parse_args(&args)?;
            Ok(JsonValue::Null)
        });
        let (queue, worker) = worker_with(registry);
        worker.start();

        let id = queue.enqueue("typed", json!({"nope": 1}), EnqueueOptions::default());
        let job = wait_for_status(&queue, id, JobStatus::Failed).await;
        assert!(job.error.as_deref().unwrap().contains("Invalid job arguments"));

        worker.stop(true).await;
    }

    #[tokio::test]
    async fn timeout_fails_with_the_timeout_message() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("slow", |_args| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(JsonValue::Null)
        });
        let (queue, worker) = worker_with(registry);
        worker.start();

        let id = queue.enqueue("slow", json!({}), EnqueueOptions {
            timeout_secs: 1,
            max_retries: 0,
            ..Default::default()
        });
        let job = wait_for_status(&queue, id, JobStatus::Failed).await;
        assert_eq!(job.error.as_deref(), Some("Job timed out after 1s"));

        worker.stop(false).await;
    }

    #[tokio::test]
    async fn transient_failure_is_rescheduled() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("flaky", |_args| async move {
            Err::<JsonValue, _>(JobError::failed("exchange unreachable"))
        });
        let (queue, worker) = worker_with(registry);
        worker.start();

        let id = queue.enqueue("flaky", json!({}), EnqueueOptions::default());
        let job = wait_for_status(&queue, id, JobStatus::Retrying).await;
        assert_eq!(job.retry_count, 1);
        assert!(job.scheduled_at.unwrap() > Utc::now());

        worker.stop(true).await;
    }
}
