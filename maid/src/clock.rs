use chrono::{DateTime, Utc};

/// Source of the current UTC time, all dueness math goes through this
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock of the local machine
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
