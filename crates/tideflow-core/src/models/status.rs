use serde::{Deserialize, Serialize};

/// Where a process stands in its lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    Unstarted,
    Running,
    Waiting,
    Pending,
    Delegated,
    Finished,
    Error,
    Expired,
    Interrupted,
    Forbidden,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unstarted => "UNSTARTED",
            Self::Running => "RUNNING",
            Self::Waiting => "WAITING",
            Self::Pending => "PENDING",
            Self::Delegated => "DELEGATED",
            Self::Finished => "FINISHED",
            Self::Error => "ERROR",
            Self::Expired => "EXPIRED",
            Self::Interrupted => "INTERRUPTED",
            Self::Forbidden => "FORBIDDEN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "UNSTARTED" => Some(Self::Unstarted),
            "RUNNING" => Some(Self::Running),
            "WAITING" => Some(Self::Waiting),
            "PENDING" => Some(Self::Pending),
            "DELEGATED" => Some(Self::Delegated),
            "FINISHED" => Some(Self::Finished),
            "ERROR" => Some(Self::Error),
            "EXPIRED" => Some(Self::Expired),
            "INTERRUPTED" => Some(Self::Interrupted),
            "FORBIDDEN" => Some(Self::Forbidden),
            _ => None,
        }
    }

    /// A terminal process never advances again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Error | Self::Expired | Self::Interrupted | Self::Forbidden
        )
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        let terminal: Vec<_> = [
            ProcessStatus::Unstarted,
            ProcessStatus::Running,
            ProcessStatus::Waiting,
            ProcessStatus::Pending,
            ProcessStatus::Delegated,
            ProcessStatus::Finished,
            ProcessStatus::Error,
            ProcessStatus::Expired,
            ProcessStatus::Interrupted,
            ProcessStatus::Forbidden,
        ]
        .into_iter()
        .filter(|s| s.is_terminal())
        .collect();

        assert_eq!(
            terminal,
            vec![
                ProcessStatus::Finished,
                ProcessStatus::Error,
                ProcessStatus::Expired,
                ProcessStatus::Interrupted,
                ProcessStatus::Forbidden,
            ]
        );
    }

    #[test]
    fn test_parse_and_serde_agree() {
        let json = serde_json::to_string(&ProcessStatus::Delegated).unwrap();
        assert_eq!(json, "\"DELEGATED\"");
        assert_eq!(ProcessStatus::parse("delegated"), Some(ProcessStatus::Delegated));
        assert_eq!(ProcessStatus::parse("bogus"), None);
    }
}
