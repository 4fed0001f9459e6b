//! Microstep and macrostep execution.
//!
//! A microstep takes one set of enabled transitions: exit states, run
//! transition actions, enter states. A macrostep runs microsteps for an
//! external event until no raised event or eventless transition is left.
//!
//! Failures roll back: the result of a failed macrostep is the last snapshot
//! whose microstep completed, in error status. Effects queued by the failed
//! microstep are discarded and the children it spawned are released.

use super::action::{Action, ActionArgs, DelayRef, Effect, SendTarget, SpawnDef};
use super::error::MachineError;
use super::implementations::Implementations;
use crate::actor::{ActorError, ActorOptions, ActorRef, ActorScope, InspectionEvent, ProcessingStatus};
use crate::core::resolver::{self, EntrySet};
use crate::core::{
    Event, GuardScope, HistoryKind, HistoryValue, MachineSnapshot, NodeId, NodeKind,
    SnapshotStatus, StateTree, StateValue, TransitionDef, AFTER_PREFIX, INIT_EVENT, STOP_EVENT,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

/// The outcome of a macrostep.
#[derive(Clone, Debug)]
pub struct Macrostep<C> {
    pub snapshot: MachineSnapshot<C>,
    /// The snapshot after each microstep, in order.
    pub microstates: Vec<MachineSnapshot<C>>,
}

/// A macrostep aborted by a guard or action error.
#[derive(Debug)]
pub(crate) struct StepFailure<C> {
    /// The last snapshot whose microstep completed.
    pub snapshot: MachineSnapshot<C>,
    pub error: MachineError,
}

impl<C: Clone + Send + Sync + 'static> StepFailure<C> {
    /// The rolled-back snapshot in error status.
    pub fn into_snapshot(self) -> MachineSnapshot<C> {
        let mut snapshot = self.snapshot;
        snapshot.status = SnapshotStatus::Error;
        snapshot.error = Some(ActorError::from(self.error));
        snapshot
    }
}

pub(crate) struct Engine<'a, C> {
    tree: &'a StateTree<C>,
    implementations: &'a Implementations<C>,
    scope: &'a ActorScope,
    machine_id: &'a str,
    queue: VecDeque<Event>,
    spawned: Vec<ActorRef>,
    changed: bool,
}

impl<'a, C: Clone + Send + Sync + 'static> Engine<'a, C> {
    pub fn new(
        tree: &'a StateTree<C>,
        implementations: &'a Implementations<C>,
        scope: &'a ActorScope,
        machine_id: &'a str,
    ) -> Self {
        Self {
            tree,
            implementations,
            scope,
            machine_id,
            queue: VecDeque::new(),
            spawned: Vec::new(),
            changed: false,
        }
    }

    /// Enter the initial configuration and settle it.
    pub fn initial(&mut self, context: C, init: &Event) -> Result<Macrostep<C>, StepFailure<C>> {
        let tree = self.tree;
        let root = tree.root();
        let pre_initial = MachineSnapshot {
            value: StateValue::Branch(BTreeMap::new()),
            context,
            status: SnapshotStatus::Active,
            history_value: HistoryValue::new(),
            children: BTreeMap::new(),
            tags: BTreeSet::new(),
            output: None,
            error: None,
            nodes: BTreeSet::new(),
            restored: false,
        };
        let initial = TransitionDef {
            source: root,
            event_type: String::new(),
            targets: Some(tree.initial_nodes(root)),
            guard: None,
            actions: Vec::new(),
            reenter: true,
        };
        let entered = self.step(&[&initial], pre_initial, init, true)?;
        self.report(&entered, init, &[&initial]);
        let mut settled = self.macrostep(entered.clone(), init)?;
        settled.microstates.insert(0, entered);
        Ok(settled)
    }

    pub fn macrostep(
        &mut self,
        snapshot: MachineSnapshot<C>,
        event: &Event,
    ) -> Result<Macrostep<C>, StepFailure<C>> {
        let mut microstates = Vec::new();

        if event.event_type == STOP_EVENT {
            let stopped = self.stop(snapshot, event);
            microstates.push(stopped.clone());
            return Ok(Macrostep {
                snapshot: stopped,
                microstates,
            });
        }

        let mut current = snapshot;
        let mut next_event = event.clone();

        if event.event_type != INIT_EVENT {
            let transitions = match self.select(&current, event) {
                Ok(transitions) => transitions,
                Err(error) => return Err(self.fail(current, error)),
            };
            if event.is_error_actor() && transitions.is_empty() {
                current.status = SnapshotStatus::Error;
                current.error = Some(
                    event
                        .error()
                        .unwrap_or_else(|| ActorError::new("child actor failed")),
                );
                self.stop_children(&mut current);
                microstates.push(current.clone());
                return Ok(Macrostep {
                    snapshot: current,
                    microstates,
                });
            }
            current = self.step(&transitions, current, event, false)?;
            self.report(&current, event, &transitions);
            microstates.push(current.clone());
        }

        let mut select_eventless = true;
        while current.status == SnapshotStatus::Active {
            let mut transitions = Vec::new();
            if select_eventless {
                transitions = match self.eventless(&current, &next_event) {
                    Ok(transitions) => transitions,
                    Err(error) => return Err(self.fail(current, error)),
                };
            }
            let eventless = !transitions.is_empty();
            if !eventless {
                let Some(raised) = self.queue.pop_front() else {
                    break;
                };
                next_event = raised;
                transitions = match self.select(&current, &next_event) {
                    Ok(transitions) => transitions,
                    Err(error) => return Err(self.fail(current, error)),
                };
            }
            current = self.step(&transitions, current, &next_event, false)?;
            select_eventless = !eventless || self.changed;
            self.report(&current, &next_event, &transitions);
            microstates.push(current.clone());
        }

        if current.status != SnapshotStatus::Active {
            self.stop_children(&mut current);
        }
        Ok(Macrostep {
            snapshot: current,
            microstates,
        })
    }

    /// Schedule again the delayed transitions of a restored configuration.
    pub fn rearm(&mut self, snapshot: &MachineSnapshot<C>) {
        let tree = self.tree;
        let init = Event::init(None);
        let mut scratch = snapshot.clone();
        for &node in &snapshot.nodes {
            for action in &tree.node(node).entry {
                let Action::Raise {
                    delay: Some(_),
                    id: Some(id),
                    ..
                } = action
                else {
                    continue;
                };
                if !id.starts_with(AFTER_PREFIX) {
                    continue;
                }
                if let Err(error) = self.execute(&mut scratch, &init, action, None) {
                    tracing::warn!(
                        machine = %self.machine_id,
                        timer = %id,
                        error = %error,
                        "delayed transition not re-armed"
                    );
                }
            }
        }
    }

    fn guard_scope<'s>(&'s self, snapshot: &'s MachineSnapshot<C>) -> GuardScope<'s, C> {
        GuardScope {
            registry: &self.implementations.guards,
            tree: self.tree,
            nodes: &snapshot.nodes,
            value: &snapshot.value,
        }
    }

    fn select(
        &self,
        snapshot: &MachineSnapshot<C>,
        event: &Event,
    ) -> Result<Vec<&'a TransitionDef<C>>, MachineError> {
        let guards = self.guard_scope(snapshot);
        resolver::select_transitions(self.tree, &snapshot.nodes, &snapshot.context, event, &guards)
            .map_err(MachineError::Guard)
    }

    fn eventless(
        &self,
        snapshot: &MachineSnapshot<C>,
        event: &Event,
    ) -> Result<Vec<&'a TransitionDef<C>>, MachineError> {
        let guards = self.guard_scope(snapshot);
        resolver::select_eventless(
            self.tree,
            &snapshot.nodes,
            &snapshot.history_value,
            &snapshot.context,
            event,
            &guards,
        )
        .map_err(MachineError::Guard)
    }

    /// A microstep that rolls back its own effects on failure.
    fn step<'t>(
        &mut self,
        transitions: &[&'t TransitionDef<C>],
        snapshot: MachineSnapshot<C>,
        event: &Event,
        is_initial: bool,
    ) -> Result<MachineSnapshot<C>, StepFailure<C>> {
        let mark = self.scope.deferred_mark();
        self.spawned.clear();
        self.changed = false;
        let rollback = snapshot.clone();
        match self.microstep(transitions, snapshot, event, is_initial) {
            Ok(next) => Ok(next),
            Err(error) => {
                self.scope.truncate_deferred(mark);
                for child in self.spawned.drain(..) {
                    child.stop_child();
                }
                Err(self.fail(rollback, error))
            }
        }
    }

    fn fail(&mut self, mut snapshot: MachineSnapshot<C>, error: MachineError) -> StepFailure<C> {
        tracing::debug!(machine = %self.machine_id, error = %error, "macrostep failed");
        for child in snapshot.children.values() {
            child.stop_child();
        }
        snapshot.restored = false;
        StepFailure { snapshot, error }
    }

    fn microstep<'t>(
        &mut self,
        transitions: &[&'t TransitionDef<C>],
        snapshot: MachineSnapshot<C>,
        event: &Event,
        is_initial: bool,
    ) -> Result<MachineSnapshot<C>, MachineError> {
        if transitions.is_empty() {
            return Ok(snapshot);
        }
        let tree = self.tree;
        let mut next = snapshot;
        let mut nodes = next.nodes.clone();
        let mut history = next.history_value.clone();
        let filtered = resolver::remove_conflicting(tree, transitions.to_vec(), &nodes, &history);

        if !is_initial {
            let exiting: Vec<NodeId> = resolver::exit_set(tree, &filtered, &nodes, &history)
                .into_iter()
                .rev()
                .collect();
            for &node in &exiting {
                for history_node in tree.history_children(node) {
                    let deep = tree.node(history_node).history == Some(HistoryKind::Deep);
                    let recorded = nodes
                        .iter()
                        .copied()
                        .filter(|&active| {
                            if deep {
                                tree.node(active).kind.is_atomic()
                                    && tree.is_descendant(active, node)
                            } else {
                                tree.node(active).parent == Some(node)
                            }
                        })
                        .map(|active| tree.node(active).id.clone())
                        .collect();
                    history = history.record(tree.node(history_node).id.clone(), recorded);
                }
            }
            for node in exiting {
                let state = tree.node(node);
                let mut actions = state.exit.clone();
                actions.extend(
                    state
                        .invoke
                        .iter()
                        .map(|invoke| Action::StopChild(invoke.id.clone())),
                );
                self.run(&mut next, event, &actions, None)?;
                nodes.remove(&node);
            }
        }

        let transition_actions: Vec<Action<C>> = filtered
            .iter()
            .flat_map(|transition| transition.actions.iter().cloned())
            .collect();
        self.run(&mut next, event, &transition_actions, None)?;

        let EntrySet {
            to_enter,
            mut default_entry,
        } = resolver::entry_set(tree, &filtered, &history);
        if is_initial {
            default_entry.insert(tree.root());
        }
        let mut completed = BTreeSet::new();
        for node in to_enter {
            nodes.insert(node);
            let state = tree.node(node);
            let mut actions = state.entry.clone();
            actions.extend(
                state
                    .invoke
                    .iter()
                    .map(|invoke| Action::SpawnChild(SpawnDef::from(invoke))),
            );
            if default_entry.contains(&node) {
                actions.extend(state.initial_actions().iter().cloned());
            }
            self.run(&mut next, event, &actions, None)?;

            if state.kind != NodeKind::Final {
                continue;
            }
            let Some(parent) = state.parent else {
                continue;
            };
            let parent_kind = tree.node(parent).kind;
            let mut marker = if parent_kind == NodeKind::Parallel {
                Some(parent)
            } else {
                tree.node(parent).parent
            };
            let mut completion = marker.unwrap_or(node);
            if parent_kind == NodeKind::Compound {
                let output = state.output.as_ref().map(|output| output(&next.context, event));
                self.queue
                    .push_back(Event::done_state(&tree.node(parent).id, output));
            }
            while let Some(ancestor) = marker.filter(|&ancestor| {
                tree.node(ancestor).kind == NodeKind::Parallel
                    && !completed.contains(&ancestor)
                    && tree.is_in_final_state(&nodes, ancestor)
            }) {
                completed.insert(ancestor);
                self.queue
                    .push_back(Event::done_state(&tree.node(ancestor).id, None));
                completion = ancestor;
                marker = tree.node(ancestor).parent;
            }
            if marker.is_some() {
                continue;
            }
            next.status = SnapshotStatus::Done;
            next.output = self.machine_output(&next.context, event, completion);
        }

        if next.status == SnapshotStatus::Done {
            let exits: Vec<Action<C>> = nodes
                .iter()
                .rev()
                .flat_map(|&node| tree.node(node).exit.iter().cloned())
                .collect();
            self.run(&mut next, event, &exits, None)?;
        }

        if nodes != next.nodes || history != next.history_value {
            self.changed = true;
        }
        next.value = tree.state_value(&nodes);
        next.tags = tree.tags(&nodes);
        next.nodes = nodes;
        next.history_value = history;
        Ok(next)
    }

    fn machine_output(&self, context: &C, event: &Event, completion: NodeId) -> Option<Value> {
        let tree = self.tree;
        let output = tree.node(tree.root()).output.as_ref()?;
        let node = tree.node(completion);
        let completion_output = match (&node.output, node.parent) {
            (Some(mapper), Some(_)) => Some(mapper(context, event)),
            _ => None,
        };
        let done = Event::done_state(&node.id, completion_output);
        Some(output(context, &done))
    }

    /// Exit every active state, deepest first, and stop all children.
    fn stop(&mut self, mut snapshot: MachineSnapshot<C>, event: &Event) -> MachineSnapshot<C> {
        let tree = self.tree;
        let exiting: Vec<NodeId> = snapshot.nodes.iter().rev().copied().collect();
        for node in exiting {
            let state = tree.node(node);
            let mut actions = state.exit.clone();
            actions.extend(
                state
                    .invoke
                    .iter()
                    .map(|invoke| Action::StopChild(invoke.id.clone())),
            );
            if let Err(error) = self.run(&mut snapshot, event, &actions, None) {
                tracing::warn!(
                    machine = %self.machine_id,
                    state = %state.id,
                    error = %error,
                    "exit action failed while stopping"
                );
            }
        }
        self.stop_children(&mut snapshot);
        snapshot.status = SnapshotStatus::Stopped;
        snapshot
    }

    fn stop_children(&mut self, snapshot: &mut MachineSnapshot<C>) {
        let ids: Vec<String> = snapshot.children.keys().cloned().collect();
        for id in ids {
            self.stop_child(snapshot, &id);
        }
    }

    fn report<'t>(
        &self,
        snapshot: &MachineSnapshot<C>,
        event: &Event,
        transitions: &[&'t TransitionDef<C>],
    ) {
        self.scope.inspect(InspectionEvent::Microstep {
            session_id: self.scope.session_id().to_string(),
            event: event.clone(),
            value: snapshot.value.clone(),
            transitions: transitions
                .iter()
                .map(|transition| self.tree.node(transition.source).id.clone())
                .collect(),
        });
    }

    fn run(
        &mut self,
        snapshot: &mut MachineSnapshot<C>,
        event: &Event,
        actions: &[Action<C>],
        params: Option<&Value>,
    ) -> Result<(), MachineError> {
        for action in actions {
            self.execute(snapshot, event, action, params)?;
        }
        Ok(())
    }

    fn execute(
        &mut self,
        snapshot: &mut MachineSnapshot<C>,
        event: &Event,
        action: &Action<C>,
        params: Option<&Value>,
    ) -> Result<(), MachineError> {
        match action {
            Action::Assign(update) => {
                snapshot.context =
                    update(&snapshot.context, event, params).map_err(|message| {
                        MachineError::Action {
                            action: action.name().to_string(),
                            message,
                        }
                    })?;
                self.changed = true;
            }
            Action::Raise {
                event: source,
                delay,
                id,
            } => {
                let raised = source.resolve(&snapshot.context, event);
                match delay {
                    None => self.queue.push_back(raised),
                    Some(delay) => {
                        let delay_ms = self.resolve_delay(delay, &snapshot.context, event)?;
                        let id = id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
                        let system = self.scope.system().clone();
                        let session = self.scope.session_id().to_string();
                        self.scope.defer(move || {
                            system.schedule(&session, &session, raised, delay_ms, id);
                            Ok(())
                        });
                    }
                }
            }
            Action::SendTo {
                target,
                event: source,
                delay,
                id,
            } => {
                if self.scope.is_inert() {
                    return Ok(());
                }
                let target = self.resolve_target(snapshot, target)?;
                let sent = source.resolve(&snapshot.context, event);
                let delay_ms = match delay {
                    Some(delay) => Some(self.resolve_delay(delay, &snapshot.context, event)?),
                    None => None,
                };
                let id = id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
                let system = self.scope.system().clone();
                let session = self.scope.session_id().to_string();
                self.scope.defer(move || {
                    match delay_ms {
                        Some(delay_ms) => system.schedule(&session, &target, sent, delay_ms, id),
                        None => match system.get_session(&target) {
                            Some(recipient) => system.relay(Some(&session), &recipient, sent),
                            None => tracing::warn!(
                                target = %target,
                                event = %sent.event_type,
                                "send target no longer exists"
                            ),
                        },
                    }
                    Ok(())
                });
            }
            Action::Cancel(id) => {
                let system = self.scope.system().clone();
                let session = self.scope.session_id().to_string();
                let id = id.clone();
                self.scope.defer(move || {
                    system.cancel(&session, &id);
                    Ok(())
                });
            }
            Action::SpawnChild(spawn) => self.spawn(snapshot, event, spawn)?,
            Action::StopChild(id) => self.stop_child(snapshot, id),
            Action::Log { label, value } => {
                let value = value(&snapshot.context, event);
                let logger = self.scope.logger();
                let label = label.clone();
                self.perform(action.name(), move || {
                    logger.log(label.as_deref(), &value);
                    Ok(())
                })?;
            }
            Action::Emit(source) => {
                let emitted = source.resolve(&snapshot.context, event);
                let system = self.scope.system().clone();
                let session = self.scope.session_id().to_string();
                self.scope.defer(move || {
                    if let Some(actor) = system.get_session(&session) {
                        actor.emit(&emitted);
                    }
                    Ok(())
                });
            }
            Action::Custom { name, f } => self.custom(snapshot, event, name, f, params)?,
            Action::Named {
                name,
                params: own_params,
            } => {
                let resolved = self.implementations.actions.get(name).cloned().ok_or_else(|| {
                    MachineError::MissingImplementation {
                        kind: "action",
                        name: name.clone(),
                    }
                })?;
                let params = own_params.as_ref().or(params);
                match &resolved {
                    Action::Custom { f, .. } => self.custom(snapshot, event, name, f, params)?,
                    other => self.execute(snapshot, event, other, params)?,
                }
            }
            Action::Enqueue(enqueue) => {
                let actions = enqueue(&snapshot.context, event);
                self.run(snapshot, event, &actions, params)?;
            }
        }
        Ok(())
    }

    /// Run `effect` now if the actor is running, otherwise once it starts.
    fn perform(
        &self,
        name: &str,
        effect: impl FnOnce() -> Result<(), String> + Send + 'static,
    ) -> Result<(), MachineError> {
        if self.scope.processing() == ProcessingStatus::Running {
            return effect().map_err(|message| MachineError::Action {
                action: name.to_string(),
                message,
            });
        }
        let name = name.to_string();
        self.scope.defer(move || {
            effect().map_err(|message| {
                ActorError::from(MachineError::Action {
                    action: name,
                    message,
                })
            })
        });
        Ok(())
    }

    fn custom(
        &self,
        snapshot: &MachineSnapshot<C>,
        event: &Event,
        name: &str,
        f: &Effect<C>,
        params: Option<&Value>,
    ) -> Result<(), MachineError> {
        if self.scope.is_inert() {
            return Ok(());
        }
        let f = Arc::clone(f);
        let system = self.scope.system().clone();
        let session = self.scope.session_id().to_string();
        let action = name.to_string();
        let mut args = ActionArgs {
            context: snapshot.context.clone(),
            event: event.clone(),
            params: params.cloned(),
            self_ref: None,
            system: system.clone(),
        };
        self.perform(name, move || {
            args.self_ref = system.get_session(&session);
            system.inspect_event(InspectionEvent::Action {
                session_id: session,
                action,
                params: args.params.clone(),
            });
            f(&args)
        })
    }

    fn spawn(
        &mut self,
        snapshot: &mut MachineSnapshot<C>,
        event: &Event,
        spawn: &SpawnDef<C>,
    ) -> Result<(), MachineError> {
        let logic = self.implementations.actors.get(&spawn.src).ok_or_else(|| {
            MachineError::MissingImplementation {
                kind: "actor",
                name: spawn.src.clone(),
            }
        })?;
        if self.scope.is_inert() {
            return Ok(());
        }
        if let Some(system_id) = &spawn.system_id {
            if self.scope.system().get(system_id).is_some() {
                return Err(MachineError::DuplicateSystemId(system_id.clone()));
            }
        }
        let id = spawn
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut options =
            ActorOptions::child(self.scope, id.clone(), Some(spawn.src.clone()), spawn.sync_snapshot);
        options.system_id = spawn.system_id.clone();
        options.input = spawn
            .input
            .as_ref()
            .map(|input| input(&snapshot.context, event));
        let child = logic.spawn(options);
        snapshot.children.insert(id, child.clone());
        self.spawned.push(child.clone());
        self.changed = true;
        self.scope.defer(move || {
            if !child.is_stopped() {
                child.start();
            }
            Ok(())
        });
        Ok(())
    }

    fn stop_child(&mut self, snapshot: &mut MachineSnapshot<C>, id: &str) {
        let Some(child) = snapshot.children.remove(id) else {
            return;
        };
        self.changed = true;
        if self.scope.is_inert() {
            return;
        }
        self.scope
            .system()
            .unregister(child.session_id(), child.system_id());
        if child.is_running() {
            self.scope.defer(move || {
                child.stop_child();
                Ok(())
            });
        } else {
            child.stop_child();
        }
    }

    fn resolve_delay(&self, delay: &DelayRef, context: &C, event: &Event) -> Result<u64, MachineError> {
        match delay {
            DelayRef::Millis(ms) => Ok(*ms),
            DelayRef::Named(name) => self
                .implementations
                .delays
                .get(name)
                .map(|delay| delay(context, event))
                .ok_or_else(|| MachineError::MissingImplementation {
                    kind: "delay",
                    name: name.clone(),
                }),
        }
    }

    fn resolve_target(
        &self,
        snapshot: &MachineSnapshot<C>,
        target: &SendTarget,
    ) -> Result<String, MachineError> {
        let unknown = |name: &str| MachineError::UnknownTarget {
            target: name.to_string(),
            machine: self.machine_id.to_string(),
        };
        match target {
            SendTarget::SelfRef => Ok(self.scope.session_id().to_string()),
            SendTarget::Parent => self.scope.parent.clone().ok_or_else(|| unknown("#_parent")),
            SendTarget::Child(id) => snapshot
                .children
                .get(id)
                .map(|child| child.session_id().to_string())
                .ok_or_else(|| unknown(id)),
            SendTarget::System(system_id) => self
                .scope
                .system()
                .get(system_id)
                .map(|actor| actor.session_id().to_string())
                .ok_or_else(|| unknown(system_id)),
        }
    }
}
