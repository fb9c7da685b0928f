//! Source-branch deletion safety.
//!
//! Pure evaluation: no I/O, no clock. The blocking reasons are stable
//! strings in a fixed order so event streams and tests can rely on them.

/// Facts gathered before deciding whether the source branch may be deleted.
#[derive(Debug, Clone, Copy)]
pub struct SafetyInputs {
    pub open_pull_request_count: usize,
    pub branch_protected: bool,
    pub workflow_mentions: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyStatus {
    pub safe_to_delete: bool,
    pub blocking_reasons: Vec<String>,
}

pub fn evaluate(inputs: SafetyInputs) -> SafetyStatus {
    let mut blocking_reasons = Vec::new();
    if inputs.open_pull_request_count > 0 {
        blocking_reasons.push("open pull requests still target source branch".to_string());
    }
    if inputs.branch_protected {
        blocking_reasons.push("source branch is protected".to_string());
    }
    if inputs.workflow_mentions {
        blocking_reasons.push("workflow files still reference source branch".to_string());
    }
    SafetyStatus {
        safe_to_delete: blocking_reasons.is_empty(),
        blocking_reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn all_clear_is_safe() {
        let status = evaluate(SafetyInputs {
            open_pull_request_count: 0,
            branch_protected: false,
            workflow_mentions: false,
        });
        assert!(status.safe_to_delete);
        assert!(status.blocking_reasons.is_empty());
    }

    #[rstest]
    #[case(1, false, false, "open pull requests still target source branch")]
    #[case(0, true, false, "source branch is protected")]
    #[case(0, false, true, "workflow files still reference source branch")]
    fn each_input_blocks_alone(
        #[case] prs: usize,
        #[case] protected: bool,
        #[case] mentions: bool,
        #[case] reason: &str,
    ) {
        let status = evaluate(SafetyInputs {
            open_pull_request_count: prs,
            branch_protected: protected,
            workflow_mentions: mentions,
        });
        assert!(!status.safe_to_delete);
        assert_eq!(status.blocking_reasons, vec![reason.to_string()]);
    }

    #[test]
    fn reasons_keep_stable_order() {
        let status = evaluate(SafetyInputs {
            open_pull_request_count: 3,
            branch_protected: true,
            workflow_mentions: true,
        });
        assert_eq!(
            status.blocking_reasons,
            vec![
                "open pull requests still target source branch",
                "source branch is protected",
                "workflow files still reference source branch",
            ]
        );
    }
}
