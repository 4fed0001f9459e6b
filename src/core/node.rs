//! State nodes and transition definitions.
//!
//! Nodes live in a [`StateTree`](super::StateTree) arena. A node's index in the
//! arena is its document order, which doubles as the tie-break when resolving
//! conflicting transitions.

use super::guard::Guard;
use crate::effects::{Action, Mapper};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Index of a node in its tree. Equal to its pre-order position.
pub type NodeId = usize;

/// The kind of a state node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Atomic,
    Compound,
    Parallel,
    Final,
    History,
}

impl NodeKind {
    /// Atomic and final nodes have no active children.
    pub fn is_atomic(self) -> bool {
        matches!(self, Self::Atomic | Self::Final)
    }
}

/// How much of a configuration a history node remembers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    #[default]
    Shallow,
    Deep,
}

/// A resolved transition.
pub struct TransitionDef<C> {
    pub source: NodeId,
    /// Event descriptor; empty for eventless transitions.
    pub event_type: String,
    /// `None` for targetless transitions, which run actions without exiting anything.
    pub targets: Option<Vec<NodeId>>,
    pub guard: Option<Guard<C>>,
    pub actions: Vec<Action<C>>,
    pub reenter: bool,
}

impl<C> TransitionDef<C> {
    pub fn has_targets(&self) -> bool {
        self.targets.as_ref().is_some_and(|targets| !targets.is_empty())
    }

    pub(crate) fn target_slice(&self) -> &[NodeId] {
        self.targets.as_deref().unwrap_or(&[])
    }
}

impl<C> Clone for TransitionDef<C> {
    fn clone(&self) -> Self {
        Self {
            source: self.source,
            event_type: self.event_type.clone(),
            targets: self.targets.clone(),
            guard: self.guard.clone(),
            actions: self.actions.clone(),
            reenter: self.reenter,
        }
    }
}

/// An actor invoked for as long as its state is active.
pub struct InvokeDef<C> {
    pub id: String,
    /// Key of the actor logic in the machine's implementations.
    pub src: String,
    pub system_id: Option<String>,
    pub input: Option<Mapper<C, Value>>,
    pub sync_snapshot: bool,
}

impl<C> Clone for InvokeDef<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            src: self.src.clone(),
            system_id: self.system_id.clone(),
            input: self.input.clone(),
            sync_snapshot: self.sync_snapshot,
        }
    }
}

/// A node of the state tree.
pub struct StateNode<C> {
    pub id: String,
    pub key: String,
    /// Keys from the root to this node; empty for the root.
    pub path: Vec<String>,
    pub kind: NodeKind,
    pub order: NodeId,
    pub parent: Option<NodeId>,
    /// Children in document order, history nodes included.
    pub children: Vec<NodeId>,
    pub history: Option<HistoryKind>,
    pub tags: Vec<String>,
    pub meta: Option<Value>,
    pub description: Option<String>,
    pub(crate) on: Vec<(String, Vec<TransitionDef<C>>)>,
    pub(crate) always: Vec<TransitionDef<C>>,
    pub(crate) entry: Vec<Action<C>>,
    pub(crate) exit: Vec<Action<C>>,
    pub(crate) initial: Option<TransitionDef<C>>,
    pub(crate) history_target: Option<Vec<NodeId>>,
    pub(crate) invoke: Vec<InvokeDef<C>>,
    pub(crate) output: Option<Mapper<C, Value>>,
}

impl<C> StateNode<C> {
    /// Transitions keyed by event descriptor, in definition order.
    pub fn transitions(&self) -> impl Iterator<Item = (&str, &[TransitionDef<C>])> {
        self.on
            .iter()
            .map(|(descriptor, transitions)| (descriptor.as_str(), transitions.as_slice()))
    }

    pub fn invocations(&self) -> &[InvokeDef<C>] {
        &self.invoke
    }

    pub(crate) fn transitions_for(&self, descriptor: &str) -> Option<&[TransitionDef<C>]> {
        self.on
            .iter()
            .find(|(key, _)| key == descriptor)
            .map(|(_, transitions)| transitions.as_slice())
    }

    pub(crate) fn initial_actions(&self) -> &[Action<C>] {
        self.initial
            .as_ref()
            .map(|initial| initial.actions.as_slice())
            .unwrap_or(&[])
    }
}
