#[cfg(test)]
mod liveness_test;

use nix::{errno::Errno, sys::signal::kill, unistd::Pid};
use tracing::warn;

/// Answers whether a process recorded in the task log is still around
pub trait ProcessLiveness {
    fn is_alive(&self, pid: i32) -> bool;
}

/// Liveness check against the local process table with signal 0.
///
/// A PID that got reused by an unrelated process is reported as alive, the
/// maid then skips the task instead of running it twice.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessTable;

impl ProcessLiveness for ProcessTable {
    fn is_alive(&self, pid: i32) -> bool {
        // 0 and negative values address process groups
        if pid <= 0 {
            return false;
        }

        match kill(Pid::from_raw(pid), None) {
            Ok(()) => true,
            // exists, but belongs to someone else
            Err(Errno::EPERM) => true,
            Err(Errno::ESRCH) => false,
            Err(errno) => {
                warn!(pid = pid, errno = ?errno, "Unexpected result of liveness check");

                false
            }
        }
    }
}
