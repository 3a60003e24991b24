//! Hooks notified on every node state transition.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::node::NodeSnapshot;

/// Receives a snapshot after every node state transition.
///
/// Called synchronously from the state machine with no locks held.
/// Implementations must return quickly and never block; a panic is
/// caught and logged.
pub trait StateObserver: Send + Sync {
    fn node_state_changed(&self, snapshot: &NodeSnapshot);
}

/// Forwards snapshots into an unbounded channel, e.g. towards an IPC layer.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<NodeSnapshot>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NodeSnapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StateObserver for ChannelObserver {
    fn node_state_changed(&self, snapshot: &NodeSnapshot) {
        // A closed receiver just means nobody is listening any more.
        let _ = self.tx.send(snapshot.clone());
    }
}

/// Logs every transition at debug level.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl StateObserver for TracingObserver {
    fn node_state_changed(&self, snapshot: &NodeSnapshot) {
        debug!(
            node = %snapshot.name,
            typecheck = ?snapshot.type_check,
            transpile = ?snapshot.transpile,
            "node state changed"
        );
    }
}

pub(crate) fn notify(observer: &dyn StateObserver, snapshot: &NodeSnapshot) {
    let delivered = catch_unwind(AssertUnwindSafe(|| observer.node_state_changed(snapshot)));
    if delivered.is_err() {
        warn!(node = %snapshot.name, "state observer panicked; ignoring");
    }
}
