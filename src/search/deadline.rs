use tokio::time::{Duration, Instant};
use crate::core::error::{Error, ErrorKind, Result};

/// Per-search deadline, checked between plan nodes and at the top of
/// long iterations.
#[derive(Debug, Clone, Copy)]
pub struct SearchDeadline {
    deadline: Instant,
}

impl SearchDeadline {
    pub fn new(timeout_ms: u64) -> Self {
        SearchDeadline {
            deadline: Instant::now() + Duration::from_millis(timeout_ms),
        }
    }

    pub fn check(&self) -> Result<()> {
        if Instant::now() >= self.deadline {
            Err(Error::new(ErrorKind::Timeout, "search deadline exceeded".to_string()))
        } else {
            Ok(())
        }
    }
}
