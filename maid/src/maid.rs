
use crate::{
    backend::Backend,
    clock::Clock,
    config::{ConfigErrors, MaidConfig},
    liveness::ProcessLiveness,
    task::{replication::Directive, Task, TaskError, TaskState},
    tasklog::{LogSummary, TaskLog, TaskLogError},
};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::{
    collections::BTreeMap,
    fmt,
    fs::OpenOptions,
    io::{self, Write},
    path::PathBuf,
};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum MaidError {
    #[error("Task log unusable")]
    TaskLog(#[from] TaskLogError),
    #[error("Invalid configuration")]
    Config(#[from] ConfigErrors),
    #[error("Unknown task: {0}")]
    UnknownTask(String),
}

/// What a single invocation of the maid ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    NothingDue,
    AllRunning,
    Done(String),
    Failed(String),
}

/// The decision of one invocation, made before anything is executed
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    // open tasks, most due first
    pub due: Vec<(String, f64)>,
    // tasks that looked like they are still running
    pub skipped: Vec<String>,
    pub selected: Option<String>,
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_ranking(f, &self.due, &self.skipped)?;

        match &self.selected {
            Some(task) => writeln!(f, "Starting {task}..."),
            None if self.due.is_empty() => writeln!(f, "Nothing to do."),
            None => writeln!(f, "All due tasks seem to be running already. Nothing to do."),
        }
    }
}

/// Human readable account of one `do_something` call
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    // open tasks, most due first
    pub due: Vec<(String, f64)>,
    // tasks that looked like they are still running
    pub skipped: Vec<String>,
    pub action: Action,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_ranking(f, &self.due, &self.skipped)?;

        match &self.action {
            Action::NothingDue => writeln!(f, "Nothing to do."),
            Action::AllRunning => {
                writeln!(f, "All due tasks seem to be running already. Nothing to do.")
            }
            Action::Done(task) => writeln!(f, "Started {task}... Done."),
            Action::Failed(task) => writeln!(f, "Started {task}... Failed."),
        }
    }
}

fn write_ranking(
    f: &mut fmt::Formatter<'_>,
    due: &[(String, f64)],
    skipped: &[String],
) -> fmt::Result {
    if !due.is_empty() {
        writeln!(f, "Due tasks:")?;
        for (task, due) in due.iter() {
            writeln!(f, "* {task} ({due:.3})")?;
        }
    }

    for task in skipped.iter() {
        writeln!(f, "{task} seems to be running already. Skipping...")?;
    }

    Ok(())
}

/// Snapshot of a task for listings
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatus {
    pub id: String,
    pub due: f64,
    pub state: Option<TaskState>,
    pub last_done: Option<DateTime<Utc>>,
    pub last_id: Option<String>,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.3})", self.id, self.due)?;

        match (self.state, self.last_done, self.last_id.as_deref()) {
            (Some(state), Some(time), Some(id)) => {
                write!(f, " {state} by {id} at {}", time.format("%Y-%m-%d %H:%M:%S"))
            }
            _ => write!(f, " never run"),
        }
    }
}

/// Takes care of all regular data keeping tasks.
///
/// The maid owns the task set of one configuration and all collaborators it
/// needs to decide on and run the most due task.
pub struct Maid {
    tasklog: TaskLog,
    tasks: BTreeMap<String, Task>,
    backend: Box<dyn Backend>,
    liveness: Box<dyn ProcessLiveness>,
    clock: Box<dyn Clock>,
    output: Option<PathBuf>,
}

impl Maid {
    pub fn new(
        tasklog: TaskLog,
        backend: Box<dyn Backend>,
        liveness: Box<dyn ProcessLiveness>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            tasklog,
            tasks: BTreeMap::new(),
            backend,
            liveness,
            clock,
            output: None,
        }
    }

    /// Append task output to this file instead of stdout
    pub fn with_output(mut self, output: Option<PathBuf>) -> Self {
        self.output = output;
        self
    }

    /// Build a maid with one replication task per directive of the configuration
    #[instrument(skip_all, level = "debug")]
    pub fn load(
        config: &MaidConfig,
        backend: Box<dyn Backend>,
        liveness: Box<dyn ProcessLiveness>,
        clock: Box<dyn Clock>,
    ) -> Result<Self, ConfigErrors> {
        let mut maid = Self::new(TaskLog::new(&config.tasklog), backend, liveness, clock)
            .with_output(config.output.clone());

        for (section, option, value) in config.directives() {
            info!("Adding replication task: {section}.{option} = {}", value.unwrap_or("~"));

            let task = Directive::parse(section, option, value)?.resolve(maid.backend.as_ref())?;
            maid.add_task(task)?;
        }

        Ok(maid)
    }

    /// Register a task, identifiers must be unique
    pub fn add_task(&mut self, task: Task) -> Result<(), ConfigErrors> {
        if self.tasks.contains_key(task.id()) {
            return Err(ConfigErrors::DuplicateTask(task.id().to_owned()));
        }

        debug!(task = %task, frequency = %task.frequency(), "Registered task");
        self.tasks.insert(task.id().to_owned(), task);

        Ok(())
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn tasklog(&self) -> &TaskLog {
        &self.tasklog
    }

    /// Replay the task log into the state of every known task
    #[instrument(skip(self), level = "debug")]
    pub fn update_task_states(&mut self) -> Result<(), MaidError> {
        let summary = self.tasklog.parse_log()?;

        for task in self.tasks.values_mut() {
            reconcile(task, &summary);
        }

        Ok(())
    }

    /// Reconcile and return the open tasks, most due first.
    ///
    /// With `return_all` tasks that are not due yet are included as well.
    pub fn get_open_tasks(&mut self, return_all: bool) -> Result<Vec<&Task>, MaidError> {
        self.update_task_states()?;
        let now = self.clock.now();

        Ok(self
            .ranking(return_all, now)
            .into_iter()
            .filter_map(|(id, _)| self.tasks.get(&id))
            .collect_vec())
    }

    /// Every task with its dueness and reconciled state, most due first
    pub fn status(&mut self) -> Result<Vec<TaskStatus>, MaidError> {
        self.update_task_states()?;
        let now = self.clock.now();

        Ok(self
            .ranking(true, now)
            .into_iter()
            .filter_map(|(id, due)| {
                self.tasks.get(&id).map(|task| TaskStatus {
                    id,
                    due,
                    state: task.state(),
                    last_done: task.last_done(),
                    last_id: task.last_id().map(str::to_owned),
                })
            })
            .collect_vec())
    }

    /// Rank the open tasks and select the most due one that isn't running
    /// already, without executing anything.
    ///
    /// With `eager` tasks are considered even before they are due again.
    #[instrument(skip(self), level = "debug")]
    pub fn plan(&mut self, eager: bool) -> Result<Plan, MaidError> {
        self.update_task_states()?;
        let due = self.ranking(eager, self.clock.now());

        let mut skipped = Vec::new();
        let mut selected = None;
        for (id, _) in due.iter() {
            if self.tasks.get(id).is_some_and(|task| self.is_running(task)) {
                info!(task = %id, "Task seems to be running already, skipping");
                skipped.push(id.clone());
            } else {
                selected = Some(id.clone());
                break;
            }
        }

        match &selected {
            Some(id) => info!(task = %id, "Selected task"),
            None if due.is_empty() => info!("Nothing to do"),
            None => info!("All due tasks seem to be running already"),
        }

        Ok(Plan {
            due,
            skipped,
            selected,
        })
    }

    /// Find the most due task that isn't running already and do it.
    ///
    /// With `eager` tasks are done even before they are due again.
    #[instrument(skip(self), level = "info")]
    pub fn do_something(&mut self, eager: bool) -> Result<Report, MaidError> {
        let Plan {
            due,
            skipped,
            selected,
        } = self.plan(eager)?;

        let action = match selected {
            None if due.is_empty() => Action::NothingDue,
            None => Action::AllRunning,
            Some(id) => {
                if self.do_task(&id)? {
                    Action::Done(id)
                } else {
                    Action::Failed(id)
                }
            }
        };

        Ok(Report {
            due,
            skipped,
            action,
        })
    }

    /// Do a specific task and record it in the task log.
    ///
    /// Returns `true` if the task succeeded. Failures of the task itself end
    /// up as a FAILED record, only failures to write the log are errors.
    #[instrument(skip(self), level = "info")]
    pub fn do_task(&mut self, id: &str) -> Result<bool, MaidError> {
        if !self.tasks.contains_key(id) {
            return Err(MaidError::UnknownTask(id.to_owned()));
        }

        let writer = self.tasklog.id().to_owned();
        self.tasklog
            .log(TaskState::Started, id, None, self.clock.now())?;

        let result = match self.open_output() {
            Ok(mut output) => match self.tasks.get_mut(id) {
                Some(task) => task.run(
                    self.clock.now(),
                    &writer,
                    self.backend.as_ref(),
                    output.as_mut(),
                ),
                None => return Err(MaidError::UnknownTask(id.to_owned())),
            },
            Err(e) => Err(TaskError::from(e)),
        };

        match result {
            Ok(()) => {
                self.tasklog
                    .log(TaskState::Done, id, None, self.clock.now())?;
                info!(task = %id, "Task done");

                Ok(true)
            }
            Err(e) => {
                error!(task = %id, error = ?e, "Task failed: {e}");
                self.tasklog
                    .log(TaskState::Failed, id, None, self.clock.now())?;

                Ok(false)
            }
        }
    }

    /// (id, dueness) of all open tasks, highest dueness first, ties keep id order
    fn ranking(&self, return_all: bool, now: DateTime<Utc>) -> Vec<(String, f64)> {
        self.tasks
            .values()
            .map(|task| (task.id().to_owned(), task.due(now)))
            .filter(|(_, due)| return_all || *due >= 0.0)
            .sorted_by(|(_, a), (_, b)| b.total_cmp(a))
            .collect_vec()
    }

    /// STARTED by a process that is still alive
    fn is_running(&self, task: &Task) -> bool {
        if task.state() != Some(TaskState::Started) {
            return false;
        }

        match task.last_id().map(str::parse::<i32>) {
            Some(Ok(pid)) => self.liveness.is_alive(pid),
            Some(Err(_)) => {
                warn!(
                    task = %task,
                    id = task.last_id().unwrap_or_default(),
                    "Task was started by something that is not a PID"
                );

                false
            }
            None => false,
        }
    }

    fn open_output(&self) -> io::Result<Box<dyn Write>> {
        match &self.output {
            Some(path) => Ok(Box::new(
                OpenOptions::new().create(true).append(true).open(path)?,
            )),
            None => Ok(Box::new(io::stdout())),
        }
    }
}

/// Fold the latest log records of a task into its state.
///
/// The latest STARTED record always sets the time. The newer of the latest DONE
/// and FAILED record only takes over the state if it is newer than that start,
/// or if no start is known at all (then it sets the time as well).
///
/// This is newest-wins between DONE and FAILED. Replaying DONE before FAILED
/// and only filling in a missing time would let DONE win whenever no STARTED
/// record exists, and FAILED whenever both follow the start. Logs written by
/// the maid always carry a STARTED record before the terminal one.
fn reconcile(task: &mut Task, summary: &LogSummary) {
    task.clear_history();

    let started = summary.started.get(task.id());
    if let Some(entry) = started {
        task.adopt(TaskState::Started, entry);
    }

    // on equal times FAILED wins
    let finished = [
        (TaskState::Done, summary.done.get(task.id())),
        (TaskState::Failed, summary.failed.get(task.id())),
    ]
    .into_iter()
    .filter_map(|(state, entry)| entry.map(|entry| (state, entry)))
    .max_by_key(|(_, entry)| entry.time);

    match (started, finished) {
        (None, Some((state, entry))) => task.adopt(state, entry),
        (Some(started), Some((state, entry))) if started.time < entry.time => {
            task.adopt_outcome(state, entry)
        }
        _ => {}
    }
}
