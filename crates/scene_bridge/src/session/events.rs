//! Session event queue
//!
//! Every outside stimulus becomes an event: UI commands, host edit
//! notifications and render progress all funnel into one FIFO. Producers
//! clone an [`EventSender`] and enqueue from any thread; the session worker
//! is the only consumer and applies events strictly in enqueue order.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::Duration;

use crate::host::{NodeId, NodePath};

/// One unit of outside stimulus for the session worker
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Begin a batch render over the configured frame range
    StartBatchRender,
    /// Begin an interactive render that follows host edits
    StartInteractiveRender,
    /// Translation of the pending frame finished; start rendering it
    FrameReady,
    /// The backend finished the frame it was rendering
    FrameDone,
    /// Fractional progress of the current frame, in [0, 1]
    DisplayUpdate(f32),
    /// Apply queued host edits to the live render
    ApplyPendingUpdates,
    /// A host node changed in place
    NodeDirty(NodeId),
    /// A node appeared under an already translated parent
    NodeAdded(NodePath),
    /// A node and everything below it left the host scene
    NodeRemoved(NodeId),
    /// A node moved to a new path
    NodeRenamed {
        /// Identity of the renamed node
        id: NodeId,
        /// Path after the rename
        new_path: NodePath,
    },
    /// Stop the in-flight render but keep the session alive
    StopRendering,
    /// Tear the session down
    Shutdown,
}

/// Cloneable producer half of the session queue
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<SessionEvent>,
}

impl EventSender {
    /// Enqueue one event. Returns false once the session is gone.
    pub fn send(&self, event: SessionEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Single-consumer FIFO of session events
#[derive(Debug)]
pub struct EventQueue {
    tx: Sender<SessionEvent>,
    rx: Receiver<SessionEvent>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self { tx, rx }
    }

    /// Producer handle for other threads
    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Enqueue from the consumer side
    pub fn push(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Next event if one is already queued
    pub fn try_recv(&self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }

    /// Block until an event arrives or the timeout passes
    pub fn recv_timeout(&self, timeout: Duration) -> Option<SessionEvent> {
        self.rx.recv_timeout(timeout).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_come_out_in_enqueue_order() {
        let queue = EventQueue::new();
        queue.push(SessionEvent::StartBatchRender);
        queue.push(SessionEvent::FrameReady);
        queue.push(SessionEvent::FrameDone);

        assert_eq!(queue.try_recv(), Some(SessionEvent::StartBatchRender));
        assert_eq!(queue.try_recv(), Some(SessionEvent::FrameReady));
        assert_eq!(queue.try_recv(), Some(SessionEvent::FrameDone));
        assert_eq!(queue.try_recv(), None);
    }

    #[test]
    fn test_producers_enqueue_from_other_threads() {
        let queue = EventQueue::new();
        let sender = queue.sender();
        let worker = std::thread::spawn(move || {
            for i in 0..3 {
                assert!(sender.send(SessionEvent::NodeDirty(NodeId(i))));
            }
        });
        worker.join().unwrap();

        for i in 0..3 {
            assert_eq!(queue.try_recv(), Some(SessionEvent::NodeDirty(NodeId(i))));
        }
    }

    #[test]
    fn test_recv_timeout_gives_up_quietly() {
        let queue = EventQueue::new();
        assert_eq!(queue.recv_timeout(Duration::from_millis(5)), None);
    }
}
