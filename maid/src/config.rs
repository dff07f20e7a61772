
use crate::{backend::BackendError, task::replication::Directive};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        Ok((fs::metadata(path)?.mode() & 0o111) != 0)
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("File {0:?} not found")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[from] Error),
    #[error("Configuration is not valid YAML")]
    InvalidYaml(#[from] serde_yaml::Error),
    #[error("Backend {0} not supported")]
    UnsupportedBackend(String),
    #[error("Backend failed to load")]
    FailedLoadBackend,
    #[error("Illegal frequency: {0}")]
    IllegalFrequency(String),
    #[error("Bad replication directive: {0}")]
    BadDirective(String),
    #[error("'{0}' can't be part of a task identifier")]
    InvalidIdentifier(String),
    #[error("Duplicate task: {0}")]
    DuplicateTask(String),
    #[error("No entries in {0} to resolve '@'")]
    EmptyDirectory(String),
    #[error("Failed to list directory")]
    Listing(#[from] BackendError),
}

/// options of one storage element section, `replicate(<path>)` -> arguments
pub type SectionConfig = BTreeMap<String, Option<String>>;

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct MaidConfig {
    // append-only log of all task activity, shared by every maid instance
    pub tasklog: PathBuf,
    // if set, task output is appended here instead of stdout
    #[serde(default)]
    pub output: Option<PathBuf>,
    pub backend: BackendConfig,
    // storage element name -> replication directives
    #[serde(default, alias = "storage_elements")]
    pub storage: BTreeMap<String, SectionConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    // Name of the selected backend, see Backends::load for the selection
    pub name: String,
    // parameters for the backend
    #[serde(default)]
    pub parameter: BTreeMap<String, serde_yaml::Value>,
}

impl MaidConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        if !path.is_file() {
            return Err(ConfigErrors::FileNotFound(path.to_path_buf()));
        }

        debug!(path = ?path, "Loading configuration");
        Ok(serde_yaml::from_reader(File::open(path)?)?)
    }

    /// All `replicate(...)` options of every section, other options are skipped
    pub fn directives(&self) -> impl Iterator<Item = (&str, &str, Option<&str>)> {
        self.storage.iter().flat_map(|(section, options)| {
            options.iter().filter_map(move |(option, value)| {
                if option.starts_with("replicate") {
                    Some((section.as_str(), option.as_str(), value.as_deref()))
                } else {
                    warn!("{section}.{option} is not a replication directive, ignoring it");
                    None
                }
            })
        })
    }

    /// Check everything that can be checked before touching the task log.
    ///
    /// Returns `true` if at least one error was found, each one is logged.
    pub fn preflight_checks(&self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        if self.storage.is_empty() {
            warn!("No storage element defined, there is nothing to do");
        }

        for (name, options) in self.storage.iter() {
            if options.is_empty() {
                warn!("Storage element {name} has no replication directives");
            }
        }

        for (section, option, value) in self.directives() {
            if let Err(e) = Directive::parse(section, option, value) {
                error!("{section}.{option} is invalid: {e}");
                contains_error = true;
            }
        }

        for (key, path) in [("tasklog", Some(&self.tasklog)), ("output", self.output.as_ref())] {
            let Some(parent) = path.and_then(|path| path.parent()) else {
                continue;
            };

            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                error!(
                    "Directory of {key} ({}) does not exist",
                    parent.to_string_lossy()
                );
                contains_error = true;
            }
        }

        if self.backend.name.to_lowercase() == "command" {
            for key in ["list", "replicate"] {
                let Some(exec) = self.backend.parameter.get(key).and_then(|value| value.as_str())
                else {
                    error!("backend.parameter.{key} must be set for the command backend");
                    contains_error = true;
                    continue;
                };

                // bare names are looked up in PATH at runtime
                let exec = PathBuf::from(exec);
                if exec.components().count() < 2 {
                    continue;
                }

                match check_executable(&exec) {
                    Ok(true) => {}
                    Ok(false) => {
                        error!(
                            "backend.parameter.{key} ({}) is not executable",
                            exec.to_string_lossy()
                        );
                        contains_error = true;
                    }
                    Err(e) => {
                        error!(
                            "Failed to determine if backend.parameter.{key} ({}) is an executable: {e}",
                            exec.to_string_lossy()
                        );
                        contains_error = true;
                    }
                }
            }
        }

        contains_error
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|directory| directory.join("maid").join("maid.yaml"))
        .unwrap_or_else(|| PathBuf::from("maid.yaml"))
}
