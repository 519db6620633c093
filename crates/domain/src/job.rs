//! Job lifecycle
//!
//! A job moves `Submitted -> Queued -> Running` and ends in exactly one of
//! `Completed`, `Failed` or `Interrupted`. Event streams can deliver messages
//! late or twice, so transitions only ever move forward.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Sent to the server, no acknowledgement yet
    Submitted,
    /// Accepted into the server queue
    Queued,
    /// The server started executing nodes
    Running,
    Completed,
    Failed,
    Interrupted,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Interrupted)
    }

    fn stage(self) -> u8 {
        match self {
            Self::Submitted => 0,
            Self::Queued => 1,
            Self::Running => 2,
            Self::Completed | Self::Failed | Self::Interrupted => 3,
        }
    }

    /// Next status if moving to `next` is a forward transition.
    ///
    /// Returns `None` for regressions, repeats and anything after a terminal
    /// status; callers ignore those events.
    pub fn advance(self, next: JobStatus) -> Option<JobStatus> {
        if self.is_terminal() || next.stage() <= self.stage() {
            None
        } else {
            Some(next)
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Submitted => "submitted",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
        };
        f.write_str(label)
    }
}

/// Error details the server reports for a failed job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub node_id: Option<String>,
    pub node_type: Option<String>,
    pub exception_type: Option<String>,
    pub exception_message: String,
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(node_id) = &self.node_id {
            write!(f, "node {}", node_id)?;
            if let Some(node_type) = &self.node_type {
                write!(f, " ({})", node_type)?;
            }
            f.write_str(": ")?;
        }
        if let Some(exception_type) = &self.exception_type {
            write!(f, "{}: ", exception_type)?;
        }
        f.write_str(&self.exception_message)
    }
}
