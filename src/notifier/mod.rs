//! Best-effort progress notification.
//!
//! Workers emit a [`ProgressEvent`] after every store update. Delivery is
//! advisory: a notifier that is full, closed, or has no subscribers never
//! affects job processing, and the store remains the source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{JobStatus, Stage};

/// A progress snapshot pushed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Job the event belongs to.
    pub job_id: String,

    /// Stage the event was emitted from.
    pub stage: Stage,

    /// Job status after the update.
    pub status: JobStatus,

    /// Progress in [0, 100] after the update.
    pub percentage_completed: u8,

    /// Human-readable description, e.g. the stage display name or a
    /// failure reason.
    pub message: String,

    /// Emission time.
    pub emitted_at: DateTime<Utc>,
}

impl ProgressEvent {
    /// Build an event for a job snapshot.
    #[must_use]
    pub fn new(
        job_id: impl Into<String>,
        stage: Stage,
        status: JobStatus,
        percentage_completed: u8,
        message: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            stage,
            status,
            percentage_completed,
            message: message.into(),
            emitted_at: Utc::now(),
        }
    }
}

/// Observer interface for job progress.
///
/// `notify` must never block job processing and must never fail it;
/// implementations swallow their own delivery errors.
pub trait ProgressNotifier: Send + Sync {
    /// Push one event to whoever is listening.
    fn notify(&self, event: ProgressEvent);
}

/// Fan-out notifier on a tokio broadcast channel.
///
/// Slow subscribers lag and lose old events rather than applying
/// backpressure to the workers.
#[derive(Debug)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<ProgressEvent>,
}

static_assertions::assert_impl_all!(BroadcastNotifier: Send, Sync);

impl BroadcastNotifier {
    /// Create a notifier whose channel buffers up to `capacity` events
    /// per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to the event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl ProgressNotifier for BroadcastNotifier {
    fn notify(&self, event: ProgressEvent) {
        // send() only errors when there are no subscribers; that is not
        // a failure for a best-effort channel.
        if self.sender.send(event).is_err() {
            debug!("progress event dropped: no subscribers");
        }
    }
}

/// Notifier that invokes a closure per event. Handy in tests and for
/// embedding the pipeline in a host application.
pub struct ClosureNotifier {
    callback: Arc<dyn Fn(ProgressEvent) + Send + Sync>,
}

impl ClosureNotifier {
    /// Wrap a callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }
}

impl std::fmt::Debug for ClosureNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosureNotifier").finish_non_exhaustive()
    }
}

impl ProgressNotifier for ClosureNotifier {
    fn notify(&self, event: ProgressEvent) {
        (self.callback)(event);
    }
}

/// Notifier that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl ProgressNotifier for NullNotifier {
    fn notify(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn sample_event(pct: u8) -> ProgressEvent {
        ProgressEvent::new(
            "job-1",
            Stage::FillMissing,
            JobStatus::Pending,
            pct,
            Stage::FillMissing.display_name(),
        )
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscriber() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();

        notifier.notify(sample_event(33));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id, "job-1");
        assert_eq!(event.percentage_completed, 33);
    }

    #[test]
    fn test_broadcast_without_subscribers_is_silent() {
        let notifier = BroadcastNotifier::new(8);
        assert_eq!(notifier.subscriber_count(), 0);
        // Must not panic or error.
        notifier.notify(sample_event(66));
    }

    #[test]
    fn test_closure_notifier_invokes_callback() {
        let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let notifier = ClosureNotifier::new(move |event| {
            seen_clone.lock().push(event.percentage_completed);
        });

        notifier.notify(sample_event(33));
        notifier.notify(sample_event(66));

        assert_eq!(*seen.lock(), vec![33, 66]);
    }

    #[test]
    fn test_event_serializes_with_snake_case_stage() {
        let json = serde_json::to_string(&sample_event(100)).unwrap();
        assert!(json.contains("\"fill_missing\""));
        assert!(json.contains("\"percentage_completed\":100"));
    }
}
