//! Utilities for publishing Kubernetes events

use std::error::Error;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};

use super::controller::ReconcilerError;

/// Publishes [`Event`]s about objects. Publishing never fails the caller,
/// failures are only logged.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, regarding: &ObjectReference, event: Event);
}

/// Publishes through the events API, reporting as the given controller.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: kube::Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_owned(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, regarding: &ObjectReference, event: Event) {
        if let Err(err) = self.recorder.publish(&event, regarding).await {
            tracing::error!(
                error = &err as &dyn std::error::Error,
                reason = %event.reason,
                "Failed to publish K8s event"
            );
        }
    }
}

/// Converts an [`Error`] into a publishable Kubernetes [`Event`]
pub(crate) fn error_to_event<E: ReconcilerError>(err: &E) -> Event {
    // Walk the whole error chain, so that we get all the full reason for the error
    let mut full_msg = err.to_string();
    let mut source = err.source();
    while let Some(err) = source {
        full_msg.push_str(": ");
        full_msg.push_str(&err.to_string());
        source = err.source();
    }
    message::truncate_with_ellipsis(&mut full_msg, 1024);

    Event {
        type_: EventType::Warning,
        reason: err.category().to_owned(),
        note: Some(full_msg),
        action: "Reconcile".to_owned(),
        secondary: err.secondary_object().map(Into::into),
    }
}

/// A normal event noting that the association status moved from `old` to `new`.
pub fn status_change_event(old: impl std::fmt::Display, new: impl std::fmt::Display) -> Event {
    Event {
        type_: EventType::Normal,
        reason: "AssociationStatusChange".to_owned(),
        note: Some(format!("Association status changed from [{old}] to [{new}]")),
        action: "Reconcile".to_owned(),
        secondary: None,
    }
}

mod message {
    /// Ensures that `msg` is at most `max_len` _bytes_ long
    ///
    /// If `msg` is longer than `max_len` then the extra text is replaced with an ellipsis.
    pub fn truncate_with_ellipsis(msg: &mut String, max_len: usize) {
        const ELLIPSIS: char = '…';
        const ELLIPSIS_LEN: usize = ELLIPSIS.len_utf8();

        if msg.len() > max_len {
            let mut cut = max_len.saturating_sub(ELLIPSIS_LEN);
            while !msg.is_char_boundary(cut) {
                cut -= 1;
            }
            msg.truncate(cut);
            if ELLIPSIS_LEN <= max_len {
                msg.push(ELLIPSIS);
            }
        }
        debug_assert!(msg.len() <= max_len);
    }

    #[cfg(test)]
    mod tests {
        use rstest::rstest;

        use super::truncate_with_ellipsis;

        #[rstest]
        #[case::fits("hello", 5, "hello")]
        #[case::too_long("hello", 4, "h…")]
        #[case::much_too_long("hello, this is a much larger string", 4, "h…")]
        #[case::emoji("hello🙋", 8, "hello…")]
        #[case::no_room_for_ellipsis("hello", 2, "")]
        fn truncates(#[case] input: &str, #[case] max_len: usize, #[case] expected: &str) {
            let mut msg = input.to_owned();
            truncate_with_ellipsis(&mut msg, max_len);
            assert_eq!(msg, expected);
        }
    }
}
