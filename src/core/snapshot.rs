//! Machine snapshots.
//!
//! Every microstep produces a new snapshot value; nothing handed to an
//! observer is ever mutated afterwards.

use super::history::HistoryValue;
use super::node::NodeId;
use super::state_value::StateValue;
use crate::actor::{ActorError, ActorRef, ActorSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Lifecycle status carried by a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Active,
    Done,
    Error,
    Stopped,
}

impl SnapshotStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// The state of a machine actor after a macrostep.
#[derive(Clone, Debug)]
pub struct MachineSnapshot<C> {
    pub value: StateValue,
    pub context: C,
    pub status: SnapshotStatus,
    pub history_value: HistoryValue,
    pub children: BTreeMap<String, ActorRef>,
    pub tags: BTreeSet<String>,
    pub output: Option<Value>,
    pub error: Option<ActorError>,
    pub(crate) nodes: BTreeSet<NodeId>,
    pub(crate) restored: bool,
}

impl<C> MachineSnapshot<C> {
    /// Whether the current value is within `pattern`, e.g. `"door.open"`.
    pub fn matches(&self, pattern: impl Into<StateValue>) -> bool {
        self.value.matches(&pattern.into())
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn child(&self, id: &str) -> Option<&ActorRef> {
        self.children.get(id)
    }

    /// Ids of the active state nodes, in document order.
    pub fn active_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }
}

impl<C: Clone + Send + Sync + 'static> ActorSnapshot for MachineSnapshot<C> {
    fn status(&self) -> SnapshotStatus {
        self.status
    }

    fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    fn error(&self) -> Option<&ActorError> {
        self.error.as_ref()
    }

    fn failed(mut self, error: ActorError) -> Self {
        self.status = SnapshotStatus::Error;
        self.error = Some(error);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: serde_json::Value) -> MachineSnapshot<()> {
        MachineSnapshot {
            value: serde_json::from_value(value).unwrap(),
            context: (),
            status: SnapshotStatus::Active,
            history_value: HistoryValue::new(),
            children: BTreeMap::new(),
            tags: BTreeSet::from(["busy".to_string()]),
            output: None,
            error: None,
            nodes: BTreeSet::new(),
            restored: false,
        }
    }

    #[test]
    fn matches_dotted_patterns() {
        let snapshot = snapshot(json!({"editing": "draft"}));

        assert!(snapshot.matches("editing"));
        assert!(snapshot.matches("editing.draft"));
        assert!(!snapshot.matches("editing.review"));
    }

    #[test]
    fn tags_are_queryable() {
        let snapshot = snapshot(json!("idle"));

        assert!(snapshot.has_tag("busy"));
        assert!(!snapshot.has_tag("idle"));
    }

    #[test]
    fn failing_sets_error_status() {
        let failed = snapshot(json!("idle")).failed(ActorError::new("bad"));

        assert_eq!(failed.status, SnapshotStatus::Error);
        assert_eq!(failed.error.map(|e| e.message), Some("bad".to_string()));
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(SnapshotStatus::Done).unwrap(), json!("done"));
        assert!(SnapshotStatus::Stopped.is_terminal());
        assert!(!SnapshotStatus::Active.is_terminal());
    }
}
