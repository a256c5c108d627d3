//! Test assertions for runs and stage results.

use crate::core::{RunState, StageState};
use crate::errors::ModelcarError;
use crate::run::{Run, StageResult};

fn stage<'a>(run: &'a Run, name: &str) -> &'a StageResult {
    run.stage(name).unwrap_or_else(|| {
        panic!(
            "Run {} has no stage '{}'. Stages: {:?}",
            run.id,
            name,
            run.stages.iter().map(|s| &s.name).collect::<Vec<_>>()
        )
    })
}

/// Asserts that the run ended in `expected`.
pub fn assert_run_state(run: &Run, expected: RunState) {
    assert_eq!(
        run.state, expected,
        "Expected run state {expected}, got {}: {}",
        run.state,
        run.summary()
    );
}

/// Asserts that the run succeeded, with or without skipped stages.
pub fn assert_run_succeeded(run: &Run) {
    assert!(run.is_success(), "Expected success, got: {}", run.summary());
}

/// Asserts that a stage ended in `expected`.
pub fn assert_stage_state(run: &Run, name: &str, expected: StageState) {
    let result = stage(run, name);
    assert_eq!(
        result.state, expected,
        "Expected stage '{name}' to be {expected}, got {} (error: {:?})",
        result.state, result.error
    );
}

/// Asserts the number of attempts a stage made.
pub fn assert_attempts(run: &Run, name: &str, expected: u32) {
    let actual = stage(run, name).attempt_count();
    assert_eq!(
        actual, expected,
        "Expected stage '{name}' to make {expected} attempt(s), got {actual}"
    );
}

/// Asserts the backoff delays scheduled between a stage's attempts.
pub fn assert_backoffs_ms(run: &Run, name: &str, expected: &[u64]) {
    let actual = stage(run, name).backoffs_ms();
    assert_eq!(
        actual, expected,
        "Unexpected backoff schedule for stage '{name}'"
    );
}

/// Asserts that `err` is a validation error with `code`.
pub fn assert_validation_code(err: &ModelcarError, code: &str) {
    match err {
        ModelcarError::Validation(e) => assert_eq!(
            e.code(),
            Some(code),
            "Expected validation code {code}, got {:?}: {}",
            e.code(),
            e.message
        ),
        other => panic!("Expected validation error {code}, got: {other}"),
    }
}
