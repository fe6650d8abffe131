#![forbid(unsafe_code)]

//! Moves change sets from the write path to regenerated artifacts.
//!
//! A write either updates artifacts inline or hands the work off: as a work
//! queue item ([`QueueProcessor`]) or as a discover job on the task queue,
//! which fans out into one apply job per impacted subject.

pub mod apply;
pub mod args;
pub mod discover;
mod error;
pub mod job;
pub mod processor;
pub mod stat;
pub mod submit;
pub mod writer;

pub use apply::ApplyJob;
pub use args::{ConfigSource, JobKind};
pub use discover::{DiscoverJob, discover_impacted_subjects};
pub use error::JobError;
pub use job::{Job, JobContext, StoreHandle, TaskOutcome, TaskRunner, run_job};
pub use processor::{ProcessOutcome, QueueProcessor};
pub use stat::TracingStat;
pub use submit::{SubmitPolicy, TaskSystem, submit_job};
pub use writer::{WriteMode, WriteReport, Writer};
