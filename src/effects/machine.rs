//! Statechart machines as actor logic.

use super::engine::{Engine, Macrostep};
use super::error::MachineError;
use super::implementations::Implementations;
use crate::actor::{
    ActorError, ActorLogic, ActorOptions, ActorScope, ActorSystem, SimulatedClock, TracingLogger,
};
use crate::checkpoint::CheckpointError;
use crate::core::{
    Context, Event, GuardScope, HistoryValue, MachineSnapshot, NodeId, SnapshotStatus,
    StateTree, StateValue, TransitionDef,
};
use crate::core::resolver;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Builds the initial context from the actor's input.
pub(crate) type ContextFactory<C> = Arc<dyn Fn(Option<&Value>) -> C + Send + Sync>;

/// A built statechart: an immutable node tree plus its implementations.
///
/// Machines are cheap to clone and are the [`ActorLogic`] behind machine
/// actors. Build one with [`MachineBuilder`](crate::builder::MachineBuilder).
///
/// # Example
///
/// ```rust
/// use statecraft::builder::{MachineBuilder, StateConfig};
/// use statecraft::Event;
///
/// let machine = MachineBuilder::new("toggle")
///     .context(0u32)
///     .initial("off")
///     .state("off", StateConfig::new().on("FLIP", "on"))
///     .state("on", StateConfig::new().on("FLIP", "off"))
///     .build()
///     .unwrap();
///
/// let off = machine.initial_snapshot_pure(None);
/// let on = machine.next_snapshot(&off, &Event::new("FLIP"));
/// assert!(on.matches("on"));
/// ```
pub struct Machine<C> {
    id: String,
    tree: Arc<StateTree<C>>,
    context: ContextFactory<C>,
    implementations: Arc<Implementations<C>>,
}

impl<C> Clone for Machine<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            tree: Arc::clone(&self.tree),
            context: Arc::clone(&self.context),
            implementations: Arc::clone(&self.implementations),
        }
    }
}

impl<C> fmt::Debug for Machine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("id", &self.id)
            .field("states", &self.tree.len())
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedMachine<C> {
    value: StateValue,
    context: C,
    status: SnapshotStatus,
    #[serde(default)]
    history_value: HistoryValue,
    #[serde(default)]
    children: BTreeMap<String, PersistedChild>,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<ActorError>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedChild {
    src: Option<String>,
    snapshot: Value,
    #[serde(default)]
    system_id: Option<String>,
    #[serde(default)]
    sync_snapshot: bool,
}

impl<C: Clone + Send + Sync + 'static> Machine<C> {
    pub(crate) fn new(
        id: String,
        tree: StateTree<C>,
        context: ContextFactory<C>,
        implementations: Implementations<C>,
    ) -> Self {
        Self {
            id,
            tree: Arc::new(tree),
            context,
            implementations: Arc::new(implementations),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tree(&self) -> &StateTree<C> {
        &self.tree
    }

    pub fn implementations(&self) -> &Implementations<C> {
        &self.implementations
    }

    /// A copy of this machine with `implementations` merged over its own.
    pub fn provide(&self, implementations: Implementations<C>) -> Self {
        let merged = (*self.implementations).clone().merge(implementations);
        Self {
            implementations: Arc::new(merged),
            ..self.clone()
        }
    }

    fn engine<'a>(&'a self, scope: &'a ActorScope) -> Engine<'a, C> {
        Engine::new(&self.tree, &self.implementations, scope, &self.id)
    }

    fn pure_scope() -> ActorScope {
        ActorScope::inert(ActorSystem::new(
            Arc::new(SimulatedClock::new()),
            Arc::new(TracingLogger),
        ))
    }

    /// Run the initial macrostep, reporting every microstate.
    pub fn initial_macrostep(&self, scope: &ActorScope, input: Option<Value>) -> Macrostep<C> {
        let context = (self.context)(input.as_ref());
        match self.engine(scope).initial(context, &Event::init(input)) {
            Ok(step) => step,
            Err(failure) => {
                let snapshot = failure.into_snapshot();
                Macrostep {
                    microstates: vec![snapshot.clone()],
                    snapshot,
                }
            }
        }
    }

    /// Process `event` against `snapshot`, reporting every microstate.
    pub fn macrostep(
        &self,
        snapshot: &MachineSnapshot<C>,
        event: &Event,
        scope: &ActorScope,
    ) -> Macrostep<C> {
        if snapshot.status.is_terminal() {
            return Macrostep {
                snapshot: snapshot.clone(),
                microstates: Vec::new(),
            };
        }
        let mut current = snapshot.clone();
        current.restored = false;
        match self.engine(scope).macrostep(current, event) {
            Ok(step) => step,
            Err(failure) => {
                let snapshot = failure.into_snapshot();
                Macrostep {
                    microstates: vec![snapshot.clone()],
                    snapshot,
                }
            }
        }
    }

    /// The initial snapshot, computed without running any effects.
    pub fn initial_snapshot_pure(&self, input: Option<Value>) -> MachineSnapshot<C> {
        self.initial_macrostep(&Self::pure_scope(), input).snapshot
    }

    /// The snapshot after `event`, computed without running any effects.
    pub fn next_snapshot(&self, snapshot: &MachineSnapshot<C>, event: &Event) -> MachineSnapshot<C> {
        self.macrostep(snapshot, event, &Self::pure_scope()).snapshot
    }

    /// The transitions `event` would take from `snapshot`.
    pub fn transition_data(
        &self,
        snapshot: &MachineSnapshot<C>,
        event: &Event,
    ) -> Result<Vec<&TransitionDef<C>>, MachineError> {
        let guards = GuardScope {
            registry: &self.implementations.guards,
            tree: &self.tree,
            nodes: &snapshot.nodes,
            value: &snapshot.value,
        };
        resolver::select_transitions(&self.tree, &snapshot.nodes, &snapshot.context, event, &guards)
            .map_err(MachineError::Guard)
    }

    /// Whether `event` would change anything: some enabled transition has a
    /// target or actions. Guard errors count as "no".
    pub fn can(&self, snapshot: &MachineSnapshot<C>, event: &Event) -> bool {
        self.transition_data(snapshot, event)
            .map(|transitions| {
                transitions
                    .iter()
                    .any(|transition| transition.has_targets() || !transition.actions.is_empty())
            })
            .unwrap_or(false)
    }

    /// Event types handled by the active states.
    pub fn next_events(&self, snapshot: &MachineSnapshot<C>) -> BTreeSet<String> {
        snapshot
            .nodes
            .iter()
            .flat_map(|&node| self.tree.own_events(node).iter().cloned())
            .collect()
    }

    /// Metadata of the active states, keyed by state id.
    pub fn meta(&self, snapshot: &MachineSnapshot<C>) -> BTreeMap<String, Value> {
        snapshot
            .nodes
            .iter()
            .map(|&node| self.tree.node(node))
            .filter_map(|state| state.meta.clone().map(|meta| (state.id.clone(), meta)))
            .collect()
    }

    /// A snapshot for the (possibly partial) `value` with the given context.
    ///
    /// Missing parts of the configuration are filled in with initial states.
    pub fn resolve_state(
        &self,
        value: impl Into<StateValue>,
        context: C,
    ) -> Result<MachineSnapshot<C>, CheckpointError> {
        let nodes = self.resolve_nodes(&value.into())?;
        let status = if self.tree.is_in_final_state(&nodes, self.tree.root()) {
            SnapshotStatus::Done
        } else {
            SnapshotStatus::Active
        };
        Ok(MachineSnapshot {
            value: self.tree.state_value(&nodes),
            context,
            status,
            history_value: HistoryValue::new(),
            children: BTreeMap::new(),
            tags: self.tree.tags(&nodes),
            output: None,
            error: None,
            nodes,
            restored: false,
        })
    }

    fn resolve_nodes(&self, value: &StateValue) -> Result<BTreeSet<NodeId>, CheckpointError> {
        self.tree
            .nodes_from_value(value)
            .map_err(|state| CheckpointError::IncompatibleSnapshot {
                node: self.id.clone(),
                state,
            })
    }
}

impl<C: Context> ActorLogic for Machine<C> {
    type Snapshot = MachineSnapshot<C>;

    fn initial_snapshot(&self, scope: &ActorScope, input: Option<Value>) -> MachineSnapshot<C> {
        self.initial_macrostep(scope, input).snapshot
    }

    fn transition(
        &self,
        snapshot: &MachineSnapshot<C>,
        event: &Event,
        scope: &ActorScope,
    ) -> MachineSnapshot<C> {
        self.macrostep(snapshot, event, scope).snapshot
    }

    fn start(&self, snapshot: &MachineSnapshot<C>, scope: &ActorScope) {
        for child in snapshot.children.values() {
            if child.snapshot_status() == SnapshotStatus::Active {
                child.start();
            }
        }
        if snapshot.restored {
            self.engine(scope).rearm(snapshot);
        }
    }

    fn persisted_snapshot(&self, snapshot: &MachineSnapshot<C>) -> Result<Value, CheckpointError> {
        let mut children = BTreeMap::new();
        for (id, child) in &snapshot.children {
            children.insert(
                id.clone(),
                PersistedChild {
                    src: child.src().map(str::to_string),
                    snapshot: child.persisted_snapshot()?,
                    system_id: child.system_id().map(str::to_string),
                    sync_snapshot: child.sync_snapshot(),
                },
            );
        }
        let persisted = PersistedMachine {
            value: snapshot.value.clone(),
            context: snapshot.context.clone(),
            status: snapshot.status,
            history_value: snapshot.history_value.clone(),
            children,
            tags: snapshot.tags.clone(),
            output: snapshot.output.clone(),
            error: snapshot.error.clone(),
        };
        serde_json::to_value(persisted)
            .map_err(|err| CheckpointError::SerializationFailed(err.to_string()))
    }

    fn restore_snapshot(
        &self,
        persisted: Value,
        scope: &ActorScope,
    ) -> Result<MachineSnapshot<C>, CheckpointError> {
        let persisted: PersistedMachine<C> = serde_json::from_value(persisted)
            .map_err(|err| CheckpointError::DeserializationFailed(err.to_string()))?;
        let nodes = self.resolve_nodes(&persisted.value)?;

        let mut children = BTreeMap::new();
        for (id, child) in persisted.children {
            let logic = child
                .src
                .as_ref()
                .and_then(|src| self.implementations.actors.get(src));
            let Some(logic) = logic else {
                tracing::warn!(
                    machine = %self.id,
                    child = %id,
                    src = ?child.src,
                    "child logic not registered, skipping restore"
                );
                continue;
            };
            let mut options = ActorOptions::child(scope, id.clone(), child.src, child.sync_snapshot);
            options.system_id = child.system_id;
            children.insert(id, logic.restore(child.snapshot, options)?);
        }

        Ok(MachineSnapshot {
            value: self.tree.state_value(&nodes),
            context: persisted.context,
            status: persisted.status,
            history_value: persisted.history_value,
            children,
            tags: self.tree.tags(&nodes),
            output: persisted.output,
            error: persisted.error,
            nodes,
            restored: true,
        })
    }
}
