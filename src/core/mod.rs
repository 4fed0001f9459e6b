//! Core statechart types and logic.
//!
//! This module contains the pure part of the engine:
//! - Events and state values
//! - The immutable state node tree
//! - Guard predicates for transition control
//! - Transition selection and exit/entry set computation
//! - Snapshots and history
//!
//! Nothing in here performs side effects; the engine in [`crate::effects`]
//! drives these functions and the actor runtime executes what they plan.

mod event;
mod guard;
mod history;
mod node;
pub(crate) mod resolver;
mod snapshot;
mod state_value;
mod tree;

pub use event::{descriptor_matches, Event, INIT_EVENT, STOP_EVENT, WILDCARD};
pub(crate) use event::AFTER_PREFIX;
pub use guard::{Guard, GuardArgs};
pub(crate) use guard::GuardScope;
pub use history::HistoryValue;
pub use node::{HistoryKind, InvokeDef, NodeId, NodeKind, StateNode, TransitionDef};
pub use snapshot::{MachineSnapshot, SnapshotStatus};
pub use state_value::StateValue;
pub use tree::StateTree;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Bounds required of machine context types.
///
/// Context is cloned into every snapshot and serialized when persisting.
pub trait Context: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Context for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}
