//! Transfer error taxonomy

use thiserror::Error;

pub type TransferResult<T> = Result<T, TransferError>;

/// Errors surfaced by the transfer engine.
///
/// Negotiation failures are fatal to the whole operation. Transport failures
/// are fatal to an upload but isolated to one item during a batch download.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{op} failed for {name}: {message}")]
    Negotiation {
        op: &'static str,
        name: String,
        message: String,
    },

    #[error("transfer of {name}{} failed: {message}", part_suffix(.part))]
    Transport {
        name: String,
        part: Option<u32>,
        message: String,
    },

    #[error("session for {name} is incomplete: expected {expected} parts, received {received}")]
    IncompleteSession {
        name: String,
        expected: u32,
        received: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("metadata record error: {0}")]
    Record(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

fn part_suffix(part: &Option<u32>) -> String {
    match part {
        Some(n) => format!(" (part {})", n),
        None => String::new(),
    }
}

impl TransferError {
    pub(crate) fn negotiation(
        op: &'static str,
        name: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        TransferError::Negotiation {
            op,
            name: name.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn transport(
        name: impl Into<String>,
        part: Option<u32>,
        err: impl std::fmt::Display,
    ) -> Self {
        TransferError::Transport {
            name: name.into(),
            part,
            message: err.to_string(),
        }
    }

    /// True when the failure happened while talking to the session service.
    pub fn is_negotiation(&self) -> bool {
        matches!(self, TransferError::Negotiation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::TransferError;

    #[test]
    fn transport_error_mentions_file_and_part() {
        let err = TransferError::transport("robot.glb", Some(3), "502 Bad Gateway");
        assert_eq!(
            err.to_string(),
            "transfer of robot.glb (part 3) failed: 502 Bad Gateway"
        );

        let err = TransferError::transport("robot.glb", None, "reset");
        assert_eq!(err.to_string(), "transfer of robot.glb failed: reset");
    }

    #[test]
    fn negotiation_error_is_flagged() {
        let err = TransferError::negotiation("start_session", "robot.glb", "denied");
        assert!(err.is_negotiation());
        assert_eq!(err.to_string(), "start_session failed for robot.glb: denied");
    }
}
