//! Requeue policy shared by the controllers.
use std::time::Duration;

use kube::runtime::controller::Action;

use crate::client::ErrorKind;

/// Missing collaborators usually show up shortly.
pub const NOT_FOUND_REQUEUE: Duration = Duration::from_secs(10);

/// Conflicts resolve as soon as the controller reads the current state.
pub const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

pub const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// The `error_policy` of every controller: when to retry after a failed
/// reconciliation of kind `kind`. Forbidden writes wait for the next change.
pub fn error_requeue(kind: ErrorKind) -> Action {
    match kind {
        ErrorKind::NotFound => Action::requeue(NOT_FOUND_REQUEUE),
        ErrorKind::Conflict => Action::requeue(CONFLICT_REQUEUE),
        ErrorKind::Forbidden => Action::await_change(),
        ErrorKind::Other => Action::requeue(ERROR_REQUEUE),
    }
}
