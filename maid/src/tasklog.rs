
use crate::task::TaskState;
use chrono::{DateTime, Utc};
use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, ErrorKind, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, instrument, trace};

/// Fixed timestamp layout of the task log, always written with a `+0000` offset
pub const TIME_FORMAT: &str = "%Y-%m-%d_%H:%M:%S%z";

#[derive(Error, Debug)]
pub enum TaskLogError {
    #[error("Failed to append to task log {path:?}")]
    Append {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("Failed to read task log {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
}

/// who wrote a record and when
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: String,
    pub time: DateTime<Utc>,
}

/// map of task identifier -> latest record
pub type EntryMap = BTreeMap<String, LogEntry>;

/// One line of the task log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub time: DateTime<Utc>,
    pub id: String,
    pub state: TaskState,
    pub task: String,
}

/// Latest STARTED, DONE and FAILED record of every task in the log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSummary {
    pub started: EntryMap,
    pub done: EntryMap,
    pub failed: EntryMap,
}

impl LogSummary {
    /// keep the record if it is newer than what is known for its state
    pub fn record(&mut self, record: LogRecord) {
        let entries = match record.state {
            TaskState::Started => &mut self.started,
            TaskState::Done => &mut self.done,
            TaskState::Failed => &mut self.failed,
        };

        match entries.get(&record.task) {
            Some(existing) if existing.time >= record.time => {}
            _ => {
                entries.insert(
                    record.task,
                    LogEntry {
                        id: record.id,
                        time: record.time,
                    },
                );
            }
        }
    }
}

/// Append-only log of task activity, the only state that survives between runs
#[derive(Debug, Clone)]
pub struct TaskLog {
    path: PathBuf,
    id: String,
}

impl TaskLog {
    /// Use the given file as task log and the current PID as writer id
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_id(path, std::process::id().to_string())
    }

    pub fn with_id(path: impl Into<PathBuf>, id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            id: id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// id written next to every record of this process
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Append one record, `id` overrides the writer id of this log
    #[instrument(skip(self), level = "debug")]
    pub fn log(
        &self,
        state: TaskState,
        task: &str,
        id: Option<&str>,
        time: DateTime<Utc>,
    ) -> Result<(), TaskLogError> {
        let line = format!(
            "{} {} {state} {task}\n",
            time.format(TIME_FORMAT),
            id.unwrap_or(self.id.as_str())
        );

        // a single write per record, appends of small lines don't interleave
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .map_err(|error| TaskLogError::Append {
                path: self.path.clone(),
                error,
            })
    }

    /// Find the last STARTED, DONE and FAILED record of every task.
    ///
    /// Comments and lines that fail to parse are skipped, a missing file is
    /// an empty log.
    #[instrument(skip(self), level = "debug")]
    pub fn parse_log(&self) -> Result<LogSummary, TaskLogError> {
        let read_error = |error| TaskLogError::Read {
            path: self.path.clone(),
            error,
        };
        let mut summary = LogSummary::default();

        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(path = ?self.path, "Task log does not exist yet");

                return Ok(summary);
            }
            Err(error) => return Err(read_error(error)),
        };

        for line in BufReader::new(file).lines() {
            let line = match line {
                Ok(line) => line,
                Err(error) if error.kind() == ErrorKind::InvalidData => continue,
                Err(error) => return Err(read_error(error)),
            };

            match parse_line(&line) {
                Some(record) => summary.record(record),
                None => trace!(line = %line, "Skipped line"),
            }
        }

        Ok(summary)
    }
}

/// Parse a task log timestamp, any offset is converted to UTC
pub fn parse_time(timestamp: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(timestamp, TIME_FORMAT)
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

/// `<timestamp> <id> <STATE> <task>`, everything else is not a record
pub fn parse_line(line: &str) -> Option<LogRecord> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }

    let mut elements = line.split_whitespace();
    let (Some(time), Some(id), Some(state), Some(task), None) = (
        elements.next(),
        elements.next(),
        elements.next(),
        elements.next(),
        elements.next(),
    ) else {
        return None;
    };

    Some(LogRecord {
        time: parse_time(time)?,
        id: id.to_owned(),
        state: state.parse().ok()?,
        task: task.to_owned(),
    })
}
