//! Diagnostics for undeliverable async errors
//!
//! Errors that surface outside any caller's control flow (a saturated
//! executor rejecting work, a detached task failing) are reported to an
//! explicit channel owned by the scheduler. A classifier turns
//! executor-saturation rejections into `RejectedTaskEvent`s with a
//! snapshot of the pool; everything else is logged and dropped.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::error::CoordinatorError;
use crate::metrics::standard;
use crate::runtime::{ConsumerExecutor, ExecutorStateSnapshot};

/// Executor occupancy at the moment an event was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorStateEvent {
    pub capacity: usize,
    pub active_count: usize,
    pub queue_depth: usize,
}

impl From<ExecutorStateSnapshot> for ExecutorStateEvent {
    fn from(snapshot: ExecutorStateSnapshot) -> Self {
        Self {
            capacity: snapshot.capacity,
            active_count: snapshot.active_count,
            queue_depth: snapshot.queue_depth,
        }
    }
}

/// A task rejection, with the executor state that caused it
#[derive(Debug, Clone)]
pub struct RejectedTaskEvent {
    pub executor_state: ExecutorStateEvent,
    pub error: String,
}

/// Receives classified diagnostic events
pub trait DiagnosticEventHandler: Send + Sync {
    fn on_rejected_task(&self, event: &RejectedTaskEvent);
}

/// Default handler: logs the rejection with pool occupancy
#[derive(Default)]
pub struct LoggingDiagnosticEventHandler;

impl DiagnosticEventHandler for LoggingDiagnosticEventHandler {
    fn on_rejected_task(&self, event: &RejectedTaskEvent) {
        warn!(
            "Task rejected by consumer executor ({} active of {} slots, {} queued): {}",
            event.executor_state.active_count,
            event.executor_state.capacity,
            event.executor_state.queue_depth,
            event.error
        );
    }
}

/// Owning side of the undeliverable-error channel
pub struct UndeliverableErrorSink {
    sender: mpsc::UnboundedSender<CoordinatorError>,
}

impl UndeliverableErrorSink {
    /// Installs the classifier task. Called exactly once per scheduler,
    /// during initialization.
    pub fn install(
        executor: Arc<ConsumerExecutor>,
        handler: Arc<dyn DiagnosticEventHandler>,
    ) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<CoordinatorError>();
        tokio::spawn(async move {
            while let Some(error) = receiver.recv().await {
                if error.is_rejected_task() {
                    let event = RejectedTaskEvent {
                        executor_state: ExecutorStateEvent::from(executor.state()),
                        error: error.to_string(),
                    };
                    standard::REJECTED_TASKS.inc();
                    handler.on_rejected_task(&event);
                } else {
                    warn!("Undeliverable async error: {}", error);
                }
            }
        });
        Self { sender }
    }

    /// Reports an error that could not be delivered to any caller
    pub fn report(&self, error: CoordinatorError) {
        let _ = self.sender.send(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ExecutorConfig;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingHandler {
        events: Mutex<Vec<RejectedTaskEvent>>,
    }

    impl DiagnosticEventHandler for RecordingHandler {
        fn on_rejected_task(&self, event: &RejectedTaskEvent) {
            self.events.lock().push(event.clone());
        }
    }

    #[tokio::test]
    async fn rejected_task_errors_become_one_event_each() {
        let executor = Arc::new(ConsumerExecutor::new(ExecutorConfig {
            capacity: 3,
            max_queue_depth: 0,
        }));
        let handler = Arc::new(RecordingHandler::default());
        let sink = UndeliverableErrorSink::install(Arc::clone(&executor), handler.clone());

        sink.report(CoordinatorError::RejectedTask {
            active: 3,
            capacity: 3,
        });
        sink.report(CoordinatorError::Dependency {
            message: "transient".into(),
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let events = handler.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].executor_state.capacity, 3);
    }
}
