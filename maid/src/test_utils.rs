//! Fakes for the collaborators of the maid

use crate::{
    backend::{Backend, BackendError},
    clock::Clock,
    liveness::ProcessLiveness,
};
use chrono::{DateTime, Utc};
use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    io::Write,
    rc::Rc,
};

/// parse an RFC 3339 time, panics on bad input
pub fn at(time: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(time)
        .expect("valid RFC 3339 time")
        .with_timezone(&Utc)
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Set of PIDs considered alive
#[derive(Debug, Clone, Default)]
pub struct FakeLiveness(pub BTreeSet<i32>);

impl FakeLiveness {
    pub fn alive(pids: &[i32]) -> Self {
        Self(pids.iter().copied().collect())
    }
}

impl ProcessLiveness for FakeLiveness {
    fn is_alive(&self, pid: i32) -> bool {
        self.0.contains(&pid)
    }
}

/// In-memory storage: directory listings, failing paths and a record of all
/// replications, shared with the test through `replicated`
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    pub directories: BTreeMap<String, Vec<String>>,
    pub failing: BTreeSet<String>,
    pub replicated: Rc<RefCell<Vec<(String, String)>>>,
}

impl FakeBackend {
    pub fn with_directory(mut self, path: &str, entries: &[&str]) -> Self {
        self.directories.insert(
            path.to_owned(),
            entries.iter().map(|entry| entry.to_string()).collect(),
        );
        self
    }

    pub fn failing_on(mut self, path: &str) -> Self {
        self.failing.insert(path.to_owned());
        self
    }
}

impl Backend for FakeBackend {
    fn list(&self, path: &str) -> Result<Vec<String>, BackendError> {
        self.directories
            .get(path)
            .cloned()
            .ok_or_else(|| BackendError::Status {
                command: format!("ls {path}"),
                status: Some(2),
            })
    }

    fn replicate(
        &self,
        path: &str,
        destination: &str,
        _recursive: bool,
        progress: &mut dyn Write,
    ) -> Result<(), BackendError> {
        self.replicated
            .borrow_mut()
            .push((path.to_owned(), destination.to_owned()));
        writeln!(progress, "replicating {path} to {destination}")?;

        if self.failing.contains(path) {
            Err(BackendError::Status {
                command: "replicate".to_owned(),
                status: Some(1),
            })
        } else {
            Ok(())
        }
    }
}
