//! # Persistent Job System
//!
//! Priority queues, a scheduler (interval/cron/once) and a worker pool for
//! out-of-band work: periodic reconciliation, stats refresh, data backfill.
//!
//! Job descriptors and the queue structures are ephemeral, re-derivable state
//! held in process memory; every queue operation is atomic with respect to
//! {priority queues, scheduled set, in-flight set, DLQ}. At any instant a job
//! lives in exactly one of those places (or its terminal store).

pub mod cron;
pub mod error;
pub mod queue;
pub mod scheduler;
pub mod worker;

pub use cron::CronExpr;
pub use error::JobError;
pub use queue::{EnqueueOptions, Job, JobPriority, JobQueue, JobStatus, QueueStats};
pub use scheduler::{JobScheduler, ScheduleKind, ScheduledTask};
pub use worker::{HandlerRegistry, JobHandler, Worker, WorkerPool, parse_args};
