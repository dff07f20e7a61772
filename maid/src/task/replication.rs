use super::{Frequency, Task, TaskError, TaskKind};
use crate::{backend::Backend, config::ConfigErrors};
use std::io::Write;
use tracing::{debug, info};

/// placeholder for the lexicographically last entry of a directory
pub const LATEST_PLACEHOLDER: &str = "@";

/// Replicate a folder to a storage element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationTask {
    path: String,
    destination: String,
}

impl ReplicationTask {
    /// Both values end up in the whitespace separated task log, so neither may
    /// contain whitespace
    pub fn new(path: String, destination: String) -> Result<Self, ConfigErrors> {
        for value in [&path, &destination] {
            if value.is_empty() || value.contains(char::is_whitespace) {
                return Err(ConfigErrors::InvalidIdentifier(value.clone()));
            }
        }

        Ok(Self { path, destination })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// `replicate:<destination>:<path>_Task`, independent of the frequency
    pub fn identifier(&self) -> String {
        format!("replicate:{}:{}_Task", self.destination, self.path)
    }

    pub(super) fn execute(
        &self,
        backend: &dyn Backend,
        output: &mut dyn Write,
    ) -> Result<(), TaskError> {
        info!(path = %self.path, destination = %self.destination, "Replicating");

        backend
            .replicate(&self.path, &self.destination, true, output)
            .map_err(|source| TaskError::Replication {
                path: self.path.clone(),
                destination: self.destination.clone(),
                source,
            })
    }
}

/// A parsed `replicate(<path>) = <arguments>` configuration line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub destination: String,
    pub path: String,
    pub frequency: Frequency,
}

impl Directive {
    /// Parse a directive of a storage element section.
    ///
    /// `option` must look like `replicate(<path>)`, `value` holds the optional
    /// whitespace separated arguments.
    pub fn parse(section: &str, option: &str, value: Option<&str>) -> Result<Self, ConfigErrors> {
        let path = option
            .strip_prefix("replicate(")
            .and_then(|rest| rest.strip_suffix(')'))
            .filter(|path| !path.trim().is_empty())
            .ok_or_else(|| ConfigErrors::BadDirective(option.to_owned()))?;

        Ok(Self {
            destination: section.to_owned(),
            path: path.to_owned(),
            frequency: Frequency::from_tokens(value),
        })
    }

    /// Turn the directive into a task, replacing a trailing `@` with the
    /// lexicographically last entry of its directory
    pub fn resolve(self, backend: &dyn Backend) -> Result<Task, ConfigErrors> {
        let path = match split_placeholder(&self.path) {
            Some(directory) => resolve_latest(directory, backend)?,
            None => self.path,
        };

        Ok(Task::new(
            TaskKind::Replication(ReplicationTask::new(path, self.destination)?),
            self.frequency,
        ))
    }
}

/// Return the directory part if the last path component is the placeholder
fn split_placeholder(path: &str) -> Option<&str> {
    match path.rsplit_once('/') {
        Some(("", LATEST_PLACEHOLDER)) => Some("/"),
        Some((directory, LATEST_PLACEHOLDER)) => Some(directory),
        None if path == LATEST_PLACEHOLDER => Some(""),
        _ => None,
    }
}

fn resolve_latest(directory: &str, backend: &dyn Backend) -> Result<String, ConfigErrors> {
    let latest = backend
        .list(directory)?
        .into_iter()
        .map(|entry| entry.trim_end_matches('/').to_owned())
        .filter(|entry| !entry.is_empty())
        .max()
        .ok_or_else(|| ConfigErrors::EmptyDirectory(directory.to_owned()))?;

    let resolved = join(directory, &latest);
    debug!(directory = directory, resolved = %resolved, "Resolved latest entry");

    Ok(resolved)
}

/// posix style join of a directory and an entry name
fn join(directory: &str, entry: &str) -> String {
    if directory.is_empty() || entry.starts_with('/') {
        entry.to_owned()
    } else if directory.ends_with('/') {
        format!("{directory}{entry}")
    } else {
        format!("{directory}/{entry}")
    }
}
