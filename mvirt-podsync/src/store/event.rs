//! Events emitted by pod store changes.

use crate::pod::PodRecord;

/// Events emitted when pod records change.
///
/// Dispatched via a broadcast channel; sending never blocks and events are
/// dropped when nobody listens.
#[derive(Debug, Clone)]
pub enum PodEvent {
    /// A new pod was created.
    Created(PodRecord),
    /// A reconciliation changed a pod.
    Synced { old: PodRecord, new: PodRecord },
    /// A pod was deleted.
    Deleted { id: String },
}
