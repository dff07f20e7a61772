use super::BackendError;
use crate::config::{BackendConfig, ConfigErrors};
use itertools::Itertools;
use std::{
    io::{BufRead, BufReader, Read, Write},
    path::PathBuf,
    process::{Child, Command, Stdio},
    thread,
    time::Duration,
};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Backend that shells out to external tools for listing and replication.
///
/// Listing runs `<list> <params..> <path>` and reads one entry per line,
/// replication runs `<replicate> <params..> [<recursive>] <path> <destination>`
/// and forwards its stdout line by line.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    pub list: PathBuf,
    pub replicate: PathBuf,
    pub params: Vec<String>,
    pub recursive: String,
    pub timeout: Duration,
}

impl CommandBackend {
    pub fn load(config: &BackendConfig) -> Result<Self, ConfigErrors> {
        let executable = |key: &str| match config.parameter.get(key).map(|value| value.as_str()) {
            Some(Some(exec)) => Ok(PathBuf::from(exec)),
            _ => {
                error!("The command backend requires backend.parameter.{key} to be a str pointing to an executable");

                Err(ConfigErrors::FailedLoadBackend)
            }
        };

        let timeout = Duration::from_millis(match config.parameter.get("timeout") {
            Some(timeout_value) => match timeout_value.as_u64() {
                Some(value) => value,
                None => {
                    warn!("Backend timeout must be a natural number");
                    return Err(ConfigErrors::FailedLoadBackend);
                }
            },
            None => 60_000,
        });

        let params = match config.parameter.get("params") {
            Some(serde_yaml::Value::Sequence(values)) => values
                .iter()
                .map(|value| value.as_str().map(str::to_owned))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    warn!("Backend params must be a list of strings");
                    ConfigErrors::FailedLoadBackend
                })?,
            Some(_) => {
                warn!("Backend params must be a list of strings");
                return Err(ConfigErrors::FailedLoadBackend);
            }
            None => Vec::new(),
        };

        let recursive = match config.parameter.get("recursive") {
            Some(value) => match value.as_str() {
                Some(flag) => flag.to_owned(),
                None => {
                    warn!("Backend recursive flag must be a string");
                    return Err(ConfigErrors::FailedLoadBackend);
                }
            },
            None => "-r".to_owned(),
        };

        Ok(Self {
            list: executable("list")?,
            replicate: executable("replicate")?,
            params,
            recursive,
            timeout,
        })
    }

    #[instrument(skip(self), level = "debug")]
    pub fn list(&self, path: &str) -> Result<Vec<String>, BackendError> {
        let command = self.list.to_string_lossy().into_owned();
        let mut child = Command::new(&self.list)
            .args(&self.params)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|error| BackendError::Spawn {
                command: command.clone(),
                error,
            })?;

        // drain stdout on the side, a full pipe would otherwise block the child
        let mut stdout = child.stdout.take();
        let reader = thread::spawn(move || {
            let mut buffer = String::new();
            match stdout.as_mut() {
                Some(stdout) => stdout.read_to_string(&mut buffer).map(|_| buffer),
                None => Ok(buffer),
            }
        });

        match child.wait_timeout(self.timeout)? {
            Some(status) if status.success() => {
                debug!("Listing finished: {status:?}");
            }
            Some(status) => {
                return Err(BackendError::Status {
                    command,
                    status: status.code(),
                })
            }
            None => {
                kill(&mut child, &command);

                return Err(BackendError::Timeout { command });
            }
        }

        let output = match reader.join() {
            Ok(output) => output?,
            Err(_) => {
                error!(command = %command, "Reader thread for listing panicked");

                return Err(BackendError::Status {
                    command,
                    status: None,
                });
            }
        };

        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect_vec())
    }

    #[instrument(skip(self, progress), level = "debug")]
    pub fn replicate(
        &self,
        path: &str,
        destination: &str,
        recursive: bool,
        progress: &mut dyn Write,
    ) -> Result<(), BackendError> {
        let command = self.replicate.to_string_lossy().into_owned();
        let mut builder = Command::new(&self.replicate);
        builder.args(&self.params);
        if recursive {
            builder.arg(&self.recursive);
        }

        let mut child = builder
            .arg(path)
            .arg(destination)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|error| BackendError::Spawn {
                command: command.clone(),
                error,
            })?;

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                match line.and_then(|line| writeln!(progress, "{line}")) {
                    Ok(()) => {}
                    Err(error) => {
                        kill(&mut child, &command);

                        return Err(error.into());
                    }
                }
            }
            progress.flush()?;
        }

        let status = child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(BackendError::Status {
                command,
                status: status.code(),
            })
        }
    }
}

fn kill(child: &mut Child, command: &str) {
    if let Err(error) = child.kill().and_then(|()| child.wait().map(|_| ())) {
        warn!(command = command, error = ?error, "Failed to stop child process");
    }
}
