pub mod replication;

#[cfg(test)]
mod task_test;

use crate::{
    backend::{Backend, BackendError},
    config::ConfigErrors,
    tasklog::LogEntry,
};
use chrono::{DateTime, Duration, Utc};
use replication::ReplicationTask;
use serde::{Deserialize, Serialize};
use std::{fmt, io::Write, str::FromStr};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Replication of {path} to {destination} failed")]
    Replication {
        path: String,
        destination: String,
        #[source]
        source: BackendError,
    },
    #[error("Failed to open task output")]
    Output(#[from] std::io::Error),
}

/// How often a task is supposed to run
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    #[default]
    Weekly,
    Monthly,
}

impl Frequency {
    /// fixed period length, 1/frequency
    pub fn period(self) -> Duration {
        match self {
            Self::Daily => Duration::days(1),
            Self::Weekly => Duration::days(7),
            Self::Monthly => Duration::days(30),
        }
    }

    /// Pick the frequency out of a directive value like `recursive daily`.
    ///
    /// Tokens that are not a frequency are ignored, if several frequencies are
    /// given the shortest period wins. No frequency at all means weekly.
    pub fn from_tokens(value: Option<&str>) -> Self {
        let mut selected: Option<Self> = None;

        for token in value.unwrap_or_default().split_whitespace() {
            match token.parse::<Self>() {
                Ok(frequency) => {
                    if selected.map_or(true, |current| frequency.period() < current.period()) {
                        selected = Some(frequency);
                    }
                }
                Err(_) => warn!(token = token, "Ignoring unknown directive argument"),
            }
        }

        selected.unwrap_or_default()
    }
}

impl FromStr for Frequency {
    type Err = ConfigErrors;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(ConfigErrors::IllegalFrequency(other.to_owned())),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        })
    }
}

/// Lifecycle states as they appear in the task log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    Started,
    Done,
    Failed,
}

impl FromStr for TaskState {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "STARTED" => Ok(Self::Started),
            "DONE" => Ok(Self::Done),
            "FAILED" => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Started => "STARTED",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        })
    }
}

/// All kinds of work a task can do, dispatched in `Task::execute`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    Replication(ReplicationTask),
}

/// A recurring unit of work together with what the task log knows about it
#[derive(Debug, Clone)]
pub struct Task {
    id: String,
    kind: TaskKind,
    frequency: Frequency,
    last_done: Option<DateTime<Utc>>,
    last_id: Option<String>,
    state: Option<TaskState>,
}

impl Task {
    pub fn new(kind: TaskKind, frequency: Frequency) -> Self {
        let id = match &kind {
            TaskKind::Replication(task) => task.identifier(),
        };

        Self {
            id,
            kind,
            frequency,
            last_done: None,
            last_id: None,
            state: None,
        }
    }

    /// key of this task in the task log
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn period(&self) -> Duration {
        self.frequency.period()
    }

    /// Time of the last start (or, lacking one, the last finish) seen for this task
    pub fn last_done(&self) -> Option<DateTime<Utc>> {
        self.last_done
    }

    pub fn last_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    pub fn state(&self) -> Option<TaskState> {
        self.state
    }

    /// How due the task is, in units of its own period.
    ///
    /// * `due < 0`: not due yet
    /// * `due == 0`: due exactly now
    /// * `due > 0`: overdue
    ///
    /// A task that never ran counts as due since one week ago, so a daily
    /// task that never ran reports 7.0 and a monthly one 7/30.
    pub fn due(&self, now: DateTime<Utc>) -> f64 {
        let period = seconds(self.period());

        match self.last_done {
            None => seconds(Duration::days(7)) / period,
            // elapsed time always fits a Duration, last_done + period may not
            Some(last_done) => (seconds(now - last_done) - period) / period,
        }
    }

    /// Bookkeeping right before the task is executed
    pub fn mark_started(&mut self, now: DateTime<Utc>, id: &str) {
        self.state = Some(TaskState::Started);
        self.last_done = Some(now);
        self.last_id = Some(id.to_owned());
    }

    /// Bookkeeping right after the task was executed
    pub fn mark_finished(&mut self, state: TaskState, id: &str) {
        self.state = Some(state);
        self.last_id = Some(id.to_owned());
    }

    /// Forget everything learned from the task log
    pub(crate) fn clear_history(&mut self) {
        self.last_done = None;
        self.last_id = None;
        self.state = None;
    }

    /// Take over a log record completely, including its time
    pub(crate) fn adopt(&mut self, state: TaskState, entry: &LogEntry) {
        self.state = Some(state);
        self.last_done = Some(entry.time);
        self.last_id = Some(entry.id.clone());
    }

    /// Take over the state of a log record but keep the known start time
    pub(crate) fn adopt_outcome(&mut self, state: TaskState, entry: &LogEntry) {
        self.state = Some(state);
        self.last_id = Some(entry.id.clone());
    }

    /// Run the task with start and finish bookkeeping.
    ///
    /// The state ends up as DONE or FAILED depending on the execution result,
    /// which is handed back to the caller untouched.
    pub fn run(
        &mut self,
        now: DateTime<Utc>,
        id: &str,
        backend: &dyn Backend,
        output: &mut dyn Write,
    ) -> Result<(), TaskError> {
        self.mark_started(now, id);
        debug!(task = %self.id, "Executing task");

        let result = self.execute(backend, output);

        let state = if result.is_ok() {
            TaskState::Done
        } else {
            TaskState::Failed
        };
        self.mark_finished(state, id);

        result
    }

    fn execute(&self, backend: &dyn Backend, output: &mut dyn Write) -> Result<(), TaskError> {
        match &self.kind {
            TaskKind::Replication(task) => task.execute(backend, output),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

fn seconds(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}
