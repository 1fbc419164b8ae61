//! Facilities for reporting Kubernetes controller outcomes
//!
//! The primary entry point is [`report_controller_reconciled`].

use std::{error::Error, sync::Arc};

use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    Resource,
    core::DynamicObject,
    runtime::{
        controller::{self, Action},
        reflector::ObjectRef,
    },
};
use tracing::Instrument;

use super::k8s_events::{EventPublisher, error_to_event};

/// [`Error`] extensions that help report reconciliation errors
///
/// This should be implemented for reconciler error types.
pub trait ReconcilerError: Error {
    /// `PascalCase`d name for the error category
    ///
    /// This can typically be implemented by delegating to [`strum::EnumDiscriminants`] and [`strum::IntoStaticStr`].
    fn category(&self) -> &'static str;

    /// A reference to a secondary object providing additional context, if any
    ///
    /// This should be [`Some`] if the error happens while evaluating some related object
    /// (for example: when writing the credential Secret of an association).
    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        None
    }
}

/// Reports the controller reconciliation result to all relevant targets
///
/// Currently this means that the result is reported to:
/// * The current [`tracing::Subscriber`], typically at least stdout
/// * Kubernetes events, if there is an error that is relevant to the end user
pub fn report_controller_reconciled<K, ReconcileErr, QueueErr>(
    events: &Arc<dyn EventPublisher>,
    controller_name: &str,
    result: &Result<(ObjectRef<K>, Action), controller::Error<ReconcileErr, QueueErr>>,
) where
    K: Resource<DynamicType = ()>,
    ReconcileErr: ReconcilerError + 'static,
    QueueErr: Error + 'static,
{
    match result {
        Ok((obj, _)) => {
            tracing::info!(
                controller.name = controller_name,
                object = %obj,
                "Reconciled object"
            );
        }
        Err(err) => report_controller_error(events, controller_name, err),
    }
}

/// Reports an error to the operator administrator and, if relevant, the end user
fn report_controller_error<ReconcileErr, QueueErr>(
    events: &Arc<dyn EventPublisher>,
    controller_name: &str,
    error: &controller::Error<ReconcileErr, QueueErr>,
) where
    ReconcileErr: ReconcilerError + 'static,
    QueueErr: Error + 'static,
{
    tracing::error!(
        controller.name = controller_name,
        error = error as &dyn Error,
        "Failed to reconcile object",
    );

    // Other error types are intended for the operator administrator, and aren't linked to a specific object
    let controller::Error::ReconcilerFailed(err, obj) = error else {
        return;
    };
    let regarding = ObjectReference::from(obj.clone());
    let event = error_to_event(err);
    let events = Arc::clone(events);

    // Run in the background
    tokio::spawn(
        async move {
            events.publish(&regarding, event).await;
        }
        .in_current_span(),
    );
}
