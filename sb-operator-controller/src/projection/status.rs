//! Ready condition and status bookkeeping for a binding.

use crate::crd::hub::common::{Condition, ConditionStatus, ProjectionRecord, SecretReference};
use crate::crd::hub::service_binding::ServiceBindingStatus;
use crate::error::BindingError;
use crate::projection::binding::ProjectionOutcome;

pub const READY: &str = "Ready";
pub const REASON_PROJECTED: &str = "Projected";
pub const REASON_NO_TARGETS: &str = "NoTargets";

/// Ready condition for a finished pass over `outcomes`, in target order.
///
/// Every outcome must have succeeded for Ready=True. Otherwise the reason is
/// the kind of the first failure and the message lists every failure.
pub fn summarize(outcomes: &[ProjectionOutcome]) -> Condition {
    if outcomes.is_empty() {
        return Condition::new(
            READY,
            ConditionStatus::False,
            REASON_NO_TARGETS,
            "no workload matches the application reference",
        );
    }

    let failures: Vec<&BindingError> = outcomes.iter().filter_map(|outcome| outcome.result.as_ref().err()).collect();
    match failures.first() {
        None => {
            let targets: Vec<String> = outcomes.iter().map(|outcome| outcome.reference.to_string()).collect();
            Condition::new(
                READY,
                ConditionStatus::True,
                REASON_PROJECTED,
                format!("projected into {}", targets.join(", ")),
            )
        }
        Some(first) => Condition::new(
            READY,
            ConditionStatus::False,
            first.reason(),
            failures.iter().map(|error| error.to_string()).collect::<Vec<_>>().join("; "),
        ),
    }
}

/// Ready condition for a pass that failed before reaching any target
pub fn failed(error: &BindingError) -> Condition {
    Condition::new(READY, ConditionStatus::False, error.reason(), error.to_string())
}

/// Whether any failure in `outcomes` is worth a quick retry
pub fn needs_retry(outcomes: &[ProjectionOutcome]) -> bool {
    outcomes
        .iter()
        .any(|outcome| outcome.result.as_ref().is_err_and(BindingError::is_retryable))
}

/// Insert `condition`, replacing the one of the same type.
///
/// The previous transition time is kept unless the status value changed.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|existing| existing.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
    conditions.sort_by(|a, b| a.type_.cmp(&b.type_));
}

/// Status to write after a pass
pub fn next_status(
    previous: Option<&ServiceBindingStatus>,
    condition: Condition,
    generation: Option<i64>,
    secret: Option<String>,
    projections: Vec<ProjectionRecord>,
) -> ServiceBindingStatus {
    let mut conditions = previous.map(|status| status.conditions.clone()).unwrap_or_default();
    set_condition(&mut conditions, condition);

    ServiceBindingStatus {
        observed_generation: generation,
        conditions,
        binding: secret.map(|name| SecretReference { name }),
        projections,
    }
}
