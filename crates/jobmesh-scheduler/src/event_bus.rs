use jobmesh_core::JobStatusTraceEvent;
use tokio::sync::broadcast;
use tracing::debug;

/// In-process broadcast of task lifecycle trace events
#[derive(Clone)]
pub struct TraceEventBus {
    sender: broadcast::Sender<JobStatusTraceEvent>,
}

impl TraceEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: JobStatusTraceEvent) {
        debug!(
            task_id = %event.task_id,
            state = ?event.state,
            "Trace event"
        );
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobStatusTraceEvent> {
        self.sender.subscribe()
    }
}

impl Default for TraceEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
