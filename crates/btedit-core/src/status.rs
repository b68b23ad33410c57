#![forbid(unsafe_code)]

//! Execution status of a tree node as reported by a running executor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Last known execution status of a node.
///
/// Status is transient: it is never written to XML and never captured by
/// undo snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeStatus {
    #[default]
    Idle,
    Running,
    Success,
    Failure,
    Skipped,
}

impl NodeStatus {
    pub const ALL: [NodeStatus; 5] = [
        Self::Idle,
        Self::Running,
        Self::Success,
        Self::Failure,
        Self::Skipped,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Success => "Success",
            Self::Failure => "Failure",
            Self::Skipped => "Skipped",
        }
    }

    /// Whether the node finished (successfully or not) in its last tick.
    #[must_use]
    pub const fn is_completed(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = Error;

    /// Case-insensitive; executors commonly report `RUNNING`, `SUCCESS`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Parse(format!("unknown node status `{s}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_idle() {
        assert_eq!(NodeStatus::default(), NodeStatus::Idle);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("RUNNING".parse::<NodeStatus>().unwrap(), NodeStatus::Running);
        assert_eq!(" failure ".parse::<NodeStatus>().unwrap(), NodeStatus::Failure);
        assert!("halted".parse::<NodeStatus>().is_err());
    }

    #[test]
    fn completed_statuses() {
        assert!(NodeStatus::Success.is_completed());
        assert!(NodeStatus::Failure.is_completed());
        assert!(!NodeStatus::Running.is_completed());
        assert!(!NodeStatus::Skipped.is_completed());
    }
}
