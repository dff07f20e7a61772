//! Regular housekeeping for replicated data.
//!
//! Every invocation replays the append-only task log, picks the most overdue
//! replication task that no other process seems to be running, runs it and
//! records the outcome in the log.

pub mod backend;
pub mod clock;
pub mod config;
pub mod liveness;
pub mod maid;
pub mod task;
pub mod tasklog;

#[cfg(test)]
pub(crate) mod test_utils;
