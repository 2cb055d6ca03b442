//! Typed event stream from the engine to its listeners
//!
//! Two event families: node transitions and workflow-level transitions.
//! Fan-out goes through a broadcast channel so the engine never blocks on a
//! listener; a lagging listener loses the oldest events instead of stalling
//! the scheduler.

use crate::node::{NodeRecord, NodeStatus, WorkflowStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One event emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A node changed status
    Node {
        status: NodeStatus,
        node: NodeRecord,
    },
    /// The workflow changed status or was stopped
    Workflow {
        status: WorkflowStatus,
        content: String,
    },
}

/// Broadcast fan-out of [`WorkflowEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Register a listener; each receiver drains its own queue.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }

    /// Emit to all current listeners. Send errors only mean nobody listens.
    pub fn emit(&self, event: WorkflowEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, status: NodeStatus) -> NodeRecord {
        NodeRecord {
            id: id.to_string(),
            kind: "playbook".to_string(),
            status,
            name: None,
            description: None,
            reference: None,
            playbook: None,
            skipped: false,
            started_at: None,
            ended_at: None,
        }
    }

    #[tokio::test]
    async fn listeners_receive_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(WorkflowEvent::Node {
            status: NodeStatus::Running,
            node: record("a", NodeStatus::Running),
        });
        bus.emit(WorkflowEvent::Workflow {
            status: WorkflowStatus::Ended,
            content: "_e".to_string(),
        });
        assert!(matches!(
            rx.recv().await.unwrap(),
            WorkflowEvent::Node { status: NodeStatus::Running, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            WorkflowEvent::Workflow { status: WorkflowStatus::Ended, .. }
        ));
    }

    #[test]
    fn emitting_without_listeners_is_fine() {
        let bus = EventBus::new(8);
        bus.emit(WorkflowEvent::Workflow {
            status: WorkflowStatus::Running,
            content: String::new(),
        });
    }
}
