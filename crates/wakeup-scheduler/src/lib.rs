//! `wakeup-scheduler`: recurring wake-up jobs, exactly-once execution and
//! the call-to-SMS fallback pipeline.
//!
//! # Overview
//!
//! Jobs live in the `wakeup_jobs` table with a precomputed UTC `next_fire`.
//! The [`engine::SchedulerEngine`] ticks periodically, claims one row in
//! `executions` per `(job_id, scheduled_for)` slot (a unique constraint makes
//! the claim race-free) and hands it to the [`worker::WorkerPool`], which runs
//! each execution through the [`runner::ExecutionRunner`].
//!
//! # Recurrence kinds
//!
//! | Kind       | Fires on                                              |
//! |------------|-------------------------------------------------------|
//! | `once`     | `start_date` only                                     |
//! | `daily`    | every local date                                      |
//! | `weekly`   | every 7th local date counted from `start_date`        |
//! | `weekdays` | Monday to Friday                                      |
//! | `weekends` | Saturday and Sunday                                   |
//! | `custom`   | the selected weekdays                                 |
//!
//! Fire times are wall-clock times in the owner's IANA zone; the civil time is
//! kept across DST transitions.

pub mod content;
pub mod db;
pub mod engine;
pub mod error;
pub mod interaction;
pub mod recurrence;
pub mod runner;
pub mod store;
pub mod types;
pub mod worker;

pub use content::{MessageComposer, VoiceScript};
pub use engine::{SchedulerEngine, TickReport};
pub use error::{Result, SchedulerError};
pub use interaction::{InteractionAction, InteractionHandler, InteractionReply, FALLBACK_REPLY};
pub use recurrence::NextFire;
pub use runner::ExecutionRunner;
pub use store::JobStore;
pub use types::{
    ContactMethod, Execution, ExecutionStatus, JobSchedule, JobStatus, NewJob, Recurrence,
    ScheduledJob, WeekdaySet,
};
pub use worker::{ExecutionQueue, WorkItem, WorkerPool};
