use proptest::prelude::*;
use sdk::errors::{ArbiterErrorExt, WorkflowError};
use sdk::types::{Operation, TaskState};

fn any_state() -> impl Strategy<Value = TaskState> {
    prop::sample::select(TaskState::ALL.to_vec())
}

// Every error variant must carry a non-empty hint that does not echo raw input
proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "\\PC*") {
        let errs = vec![
            WorkflowError::NotFound(error_str.clone()),
            WorkflowError::RateLimited(error_str.clone()),
            WorkflowError::Judgment(error_str.clone()),
            WorkflowError::Storage(error_str.clone()),
            WorkflowError::InvalidNextAction(error_str.clone()),
            WorkflowError::InvalidInput(error_str.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            if error_str.len() > 8 {
                prop_assert!(!hint.contains(&error_str));
            }
        }
    }
}

// The edge table never offers a way out of Cancelled and never skips the
// review gate into Completed
proptest! {
    #[test]
    fn test_edge_table_invariants(from in any_state(), to in any_state()) {
        if from.can_transition_to(to) {
            prop_assert_ne!(from, TaskState::Cancelled);
            if to == TaskState::Completed {
                prop_assert_eq!(from, TaskState::ReviewReady);
            }
        }
    }
}

// Arbitrary strings only parse when they are registry names
proptest! {
    #[test]
    fn test_operation_parse_is_whitelist(name in "[a-z-]{1,30}") {
        match name.parse::<Operation>() {
            Ok(op) => prop_assert_eq!(op.as_str(), name.as_str()),
            Err(WorkflowError::InvalidNextAction(rejected)) => {
                prop_assert!(Operation::ALL.iter().all(|op| op.as_str() != rejected));
            }
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }
}
