use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use uuid::Uuid;

use crate::cron::CronExpr;
use crate::queue::{EnqueueOptions, JobPriority, JobQueue};

/// How a task recurs.
#[derive(Debug, Clone)]
pub enum ScheduleKind {
    Interval { seconds: u64 },
    Cron(CronExpr),
    Once { run_at: DateTime<Utc> },
}

/// A registered recurring (or one-shot) enqueue.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub name: String,
    pub job_name: String,
    pub args: JsonValue,
    pub priority: JobPriority,
    pub kind: ScheduleKind,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
}

impl ScheduledTask {
    fn calculate_next_run(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.kind {
            ScheduleKind::Interval { seconds } => match self.last_run {
                Some(last) => Some(last + Duration::seconds(*seconds as i64)),
                None => Some(from),
            },
            ScheduleKind::Cron(expr) => expr.next_run(from),
            ScheduleKind::Once { run_at } => {
                if self.last_run.is_none() {
                    Some(*run_at)
                } else {
                    None
                }
            }
        }
    }
}

/// Converts interval/cron/once schedules into job enqueues.
///
/// A single loop sweeps the registry every `check_interval` and enqueues any
/// enabled task whose `next_run` has arrived.
pub struct JobScheduler {
    queue: Arc<JobQueue>,
    tasks: Mutex<HashMap<String, ScheduledTask>>,
    check_interval: StdDuration,
    shutdown: watch::Sender<bool>,
}

impl JobScheduler {
    pub fn new(queue: Arc<JobQueue>, check_interval: StdDuration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            queue,
            tasks: Mutex::new(HashMap::new()),
            check_interval,
            shutdown,
        }
    }

    /// Registers a task and computes its first `next_run`.
    pub fn register(
        &self,
        name: &str,
        job_name: &str,
        args: JsonValue,
        priority: JobPriority,
        kind: ScheduleKind,
        enabled: bool,
    ) {
        let mut task = ScheduledTask {
            name: name.to_string(),
            job_name: job_name.to_string(),
            args,
            priority,
            kind,
            enabled,
            last_run: None,
            next_run: None,
            run_count: 0,
        };
        task.next_run = task.calculate_next_run(Utc::now());
        tracing::info!(task = name, next_run = ?task.next_run, "Registered scheduled task");
        self.tasks
            .lock()
            .expect("scheduler lock poisoned")
            .insert(name.to_string(), task);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tasks
            .lock()
            .expect("scheduler lock poisoned")
            .remove(name)
            .is_some()
    }

    pub fn enable(&self, name: &str) -> bool {
        let mut tasks = self.tasks.lock().expect("scheduler lock poisoned");
        match tasks.get_mut(name) {
            Some(task) => {
                task.enabled = true;
                task.next_run = task.calculate_next_run(Utc::now());
                true
            }
            None => false,
        }
    }

    pub fn disable(&self, name: &str) -> bool {
        let mut tasks = self.tasks.lock().expect("scheduler lock poisoned");
        match tasks.get_mut(name) {
            Some(task) => {
                task.enabled = false;
                true
            }
            None => false,
        }
    }

    pub fn get_task(&self, name: &str) -> Option<ScheduledTask> {
        self.tasks
            .lock()
            .expect("scheduler lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn tasks(&self) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> = self
            .tasks
            .lock()
            .expect("scheduler lock poisoned")
            .values()
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        tasks
    }

    /// Immediately enqueues a task's job, outside its schedule.
    pub fn run_task_now(&self, name: &str) -> Option<Uuid> {
        let tasks = self.tasks.lock().expect("scheduler lock poisoned");
        let task = tasks.get(name)?;
        let id = self.queue.enqueue(&task.job_name, task.args.clone(), EnqueueOptions {
            priority: task.priority,
            ..Default::default()
        });
        tracing::info!(task = name, job_id = %id, "Manually triggered scheduled task");
        Some(id)
    }

    /// One sweep: enqueue every enabled task whose time has come.
    pub fn tick(&self, now: DateTime<Utc>) {
        let mut tasks = self.tasks.lock().expect("scheduler lock poisoned");
        for task in tasks.values_mut() {
            if !task.enabled {
                continue;
            }
            let Some(next_run) = task.next_run else {
                continue;
            };
            if next_run > now {
                continue;
            }

            let job_id = self.queue.enqueue(&task.job_name, task.args.clone(), EnqueueOptions {
                priority: task.priority,
                ..Default::default()
            });
            task.last_run = Some(now);
            task.run_count += 1;
            task.next_run = task.calculate_next_run(now);
            tracing::info!(
                task = %task.name,
                job_id = %job_id,
                run_count = task.run_count,
                next_run = ?task.next_run,
                "Scheduled task enqueued"
            );
        }
    }

    /// Spawns the scheduler loop.
    pub fn start(self: &Arc<Self>) {
        let scheduler = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            tracing::info!("Job scheduler started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(scheduler.check_interval) => {
                        scheduler.tick(Utc::now());
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Job scheduler stopped");
        });
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scheduler() -> (Arc<JobQueue>, JobScheduler) {
        let queue = Arc::new(JobQueue::new());
        let scheduler = JobScheduler::new(queue.clone(), StdDuration::from_secs(30));
        (queue, scheduler)
    }

    #[test]
    fn interval_task_fires_then_waits() {
        let (queue, scheduler) = scheduler();
        scheduler.register(
            "refresh",
            "refresh_stats",
            json!({}),
            JobPriority::Normal,
            ScheduleKind::Interval { seconds: 300 },
            true,
        );

        let now = Utc::now();
        scheduler.tick(now);
        assert_eq!(queue.stats().total_pending, 1);

        // Within the interval nothing new fires.
        scheduler.tick(now + Duration::seconds(60));
        assert_eq!(queue.stats().total_pending, 1);

        scheduler.tick(now + Duration::seconds(301));
        assert_eq!(queue.stats().total_pending, 2);
        assert_eq!(scheduler.get_task("refresh").unwrap().run_count, 2);
    }

    #[test]
    fn once_task_fires_a_single_time() {
        let (queue, scheduler) = scheduler();
        scheduler.register(
            "one-off",
            "backfill",
            json!({"symbol": "BTCUSDT"}),
            JobPriority::High,
            ScheduleKind::Once {
                run_at: Utc::now() - Duration::seconds(1),
            },
            true,
        );

        scheduler.tick(Utc::now());
        scheduler.tick(Utc::now() + Duration::seconds(600));
        assert_eq!(queue.stats().total_pending, 1);
        assert_eq!(scheduler.get_task("one-off").unwrap().next_run, None);
    }

    #[test]
    fn disabled_tasks_do_not_fire() {
        let (queue, scheduler) = scheduler();
        scheduler.register(
            "muted",
            "noop",
            json!({}),
            JobPriority::Low,
            ScheduleKind::Interval { seconds: 1 },
            false,
        );
        scheduler.tick(Utc::now());
        assert_eq!(queue.stats().total_pending, 0);

        assert!(scheduler.enable("muted"));
        scheduler.tick(Utc::now() + Duration::seconds(2));
        assert_eq!(queue.stats().total_pending, 1);
    }

    #[test]
    fn cron_task_computes_future_next_run() {
        let (_queue, scheduler) = scheduler();
        scheduler.register(
            "nightly",
            "daily_report",
            json!({}),
            JobPriority::Normal,
            ScheduleKind::Cron(CronExpr::parse("0 2 * * *").unwrap()),
            true,
        );
        let task = scheduler.get_task("nightly").unwrap();
        let next = task.next_run.unwrap();
        assert!(next > Utc::now());
        assert_eq!(next.format("%H:%M").to_string(), "02:00");
    }
}
