//! Builder for constructing machines.
//!
//! Building runs in two passes. The first lays the configuration out as a
//! pre-order arena of state nodes, expanding `after`, `invoke` and `on_done`
//! into plain actions and event handlers. The second resolves initial states
//! and transition targets against the finished arena.

use super::error::BuildError;
use super::state::{StateConfig, StateType};
use super::transition::{InvokeConfig, InvokeSource, TransitionConfig};
use crate::actor::{ActorLogic, LogicRef};
use crate::core::{Event, Guard, InvokeDef, NodeId, NodeKind, StateNode, StateTree, TransitionDef};
use crate::effects::{Action, ContextFactory, Implementations, Machine};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

type Check = Validation<(), NonEmptyVec<BuildError>>;

/// Builder for constructing machines with a fluent API.
///
/// The builder configures the root state; nested states are described with
/// [`StateConfig`].
///
/// # Example
///
/// ```rust
/// use statecraft::builder::{MachineBuilder, StateConfig};
///
/// let light = MachineBuilder::new("light")
///     .context(())
///     .initial("green")
///     .state("green", StateConfig::new().after(1000u64, "yellow"))
///     .state("yellow", StateConfig::new().after(500u64, "red"))
///     .state("red", StateConfig::new().on("RESET", "green"))
///     .build()
///     .unwrap();
///
/// assert!(light.initial_snapshot_pure(None).matches("green"));
/// ```
pub struct MachineBuilder<C> {
    id: String,
    context: Option<ContextFactory<C>>,
    root: StateConfig<C>,
    implementations: Implementations<C>,
}

impl<C: Clone + Send + Sync + 'static> MachineBuilder<C> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context: None,
            root: StateConfig::new(),
            implementations: Implementations::new(),
        }
    }

    /// Initial context, the same for every actor (required).
    pub fn context(mut self, context: C) -> Self {
        self.context = Some(Arc::new(move |_: Option<&Value>| context.clone()));
        self
    }

    /// Initial context computed from the actor's input (required).
    pub fn context_from_input<F>(mut self, factory: F) -> Self
    where
        F: Fn(Option<&Value>) -> C + Send + Sync + 'static,
    {
        self.context = Some(Arc::new(factory));
        self
    }

    /// Replace the root configuration wholesale.
    pub fn root(mut self, root: StateConfig<C>) -> Self {
        self.root = root;
        self
    }

    /// Make the root a parallel state.
    pub fn parallel(mut self) -> Self {
        self.root.kind = StateType::Parallel;
        self
    }

    pub fn initial(mut self, key: impl Into<String>) -> Self {
        self.root = self.root.initial(key);
        self
    }

    pub fn state(mut self, key: impl Into<String>, state: StateConfig<C>) -> Self {
        self.root = self.root.state(key, state);
        self
    }

    /// Handle `event` at the root, whatever state is active.
    pub fn on(mut self, event: impl Into<String>, transition: impl Into<TransitionConfig<C>>) -> Self {
        self.root = self.root.on(event, transition);
        self
    }

    pub fn always(mut self, transition: impl Into<TransitionConfig<C>>) -> Self {
        self.root = self.root.always(transition);
        self
    }

    pub fn entry(mut self, action: impl Into<Action<C>>) -> Self {
        self.root = self.root.entry(action);
        self
    }

    pub fn exit(mut self, action: impl Into<Action<C>>) -> Self {
        self.root = self.root.exit(action);
        self
    }

    pub fn invoke(mut self, invoke: InvokeConfig<C>) -> Self {
        self.root = self.root.invoke(invoke);
        self
    }

    /// Output of the machine once it reaches a top-level final state.
    ///
    /// The mapper sees the done event of the completed state, whose
    /// `output` carries that state's own output.
    pub fn output<F>(mut self, output: F) -> Self
    where
        F: Fn(&C, &Event) -> Value + Send + Sync + 'static,
    {
        self.root = self.root.output(output);
        self
    }

    pub fn action(mut self, name: impl Into<String>, action: Action<C>) -> Self {
        self.implementations = self.implementations.action(name, action);
        self
    }

    pub fn guard(mut self, name: impl Into<String>, guard: Guard<C>) -> Self {
        self.implementations = self.implementations.guard(name, guard);
        self
    }

    pub fn delay(mut self, name: impl Into<String>, ms: u64) -> Self {
        self.implementations = self.implementations.delay(name, ms);
        self
    }

    pub fn actor<L: ActorLogic>(mut self, src: impl Into<String>, logic: L) -> Self {
        self.implementations = self.implementations.actor(src, logic);
        self
    }

    pub fn implementations(mut self, implementations: Implementations<C>) -> Self {
        self.implementations = self.implementations.merge(implementations);
        self
    }

    /// Build the machine, reporting every configuration problem at once.
    pub fn build(self) -> Result<Machine<C>, BuildError> {
        let MachineBuilder {
            id,
            context,
            root,
            mut implementations,
        } = self;

        let mut layout = Layout::new(&id);
        layout.add(id.clone(), Vec::new(), None, root);
        let Layout {
            nodes,
            pending,
            invoked,
            mut checks,
            ..
        } = layout;
        for (src, logic) in invoked {
            implementations = implementations.actor_ref(src, logic);
        }

        checks.push(match context {
            Some(_) => Validation::success(()),
            None => Validation::fail(BuildError::MissingContext),
        });

        let mut tree = StateTree::new(nodes);
        for pending in pending {
            checks.extend(resolve(&mut tree, pending));
        }
        checks.extend(parallel_conflicts(&tree));

        match Validation::all_vec(checks) {
            Validation::Success(_) => {
                let context = context.ok_or(BuildError::MissingContext)?;
                Ok(Machine::new(id, tree, context, implementations))
            }
            Validation::Failure(errors) => Err(collapse(errors)),
        }
    }
}

fn collapse(errors: NonEmptyVec<BuildError>) -> BuildError {
    let mut errors: Vec<BuildError> = errors.iter().cloned().collect();
    match errors.len() {
        1 => errors.remove(0),
        _ => BuildError::Multiple(errors),
    }
}

/// What the second pass still has to resolve for one node.
struct Pending<C> {
    node: NodeId,
    kind: NodeKind,
    initial: Option<(String, Vec<Action<C>>)>,
    handlers: Vec<(String, Vec<TransitionConfig<C>>)>,
    always: Vec<TransitionConfig<C>>,
    history_target: Option<String>,
}

struct Layout<'a, C> {
    machine_id: &'a str,
    nodes: Vec<StateNode<C>>,
    pending: Vec<Pending<C>>,
    invoked: Vec<(String, LogicRef)>,
    ids: HashSet<String>,
    checks: Vec<Check>,
}

impl<'a, C: 'static> Layout<'a, C> {
    fn new(machine_id: &'a str) -> Self {
        Self {
            machine_id,
            nodes: Vec::new(),
            pending: Vec::new(),
            invoked: Vec::new(),
            ids: HashSet::new(),
            checks: Vec::new(),
        }
    }

    fn add(
        &mut self,
        key: String,
        path: Vec<String>,
        parent: Option<NodeId>,
        config: StateConfig<C>,
    ) -> NodeId {
        let order = self.nodes.len();
        let id = config.id.clone().unwrap_or_else(|| {
            std::iter::once(self.machine_id)
                .chain(path.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(".")
        });
        if !self.ids.insert(id.clone()) {
            self.checks
                .push(Validation::fail(BuildError::DuplicateId(id.clone())));
        }
        let kind = match config.kind {
            StateType::Normal if config.states.is_empty() => NodeKind::Atomic,
            StateType::Normal => NodeKind::Compound,
            StateType::Parallel => NodeKind::Parallel,
            StateType::Final => NodeKind::Final,
            StateType::History(_) => NodeKind::History,
        };
        let history = match config.kind {
            StateType::History(history) => Some(history),
            _ => None,
        };

        let StateConfig {
            initial,
            initial_actions,
            states,
            on,
            always,
            after,
            on_done,
            mut entry,
            mut exit,
            invoke,
            tags,
            meta,
            description,
            output,
            history_target,
            ..
        } = config;

        let mut handlers: Vec<(String, Vec<TransitionConfig<C>>)> = Vec::new();
        for (event, transition) in on {
            add_handler(&mut handlers, event, transition);
        }
        for (delay, transition) in after {
            let event_type = Event::after_type(&delay.to_string(), &id);
            if !handlers.iter().any(|(event, _)| *event == event_type) {
                entry.push(
                    Action::raise(Event::new(event_type.clone()))
                        .delayed(delay.clone())
                        .with_id(event_type.clone()),
                );
                exit.push(Action::cancel(event_type.clone()));
            }
            add_handler(&mut handlers, event_type, transition);
        }
        for transition in on_done {
            add_handler(&mut handlers, Event::done_state_type(&id), transition);
        }

        let mut invocations = Vec::new();
        for (index, invoke) in invoke.into_iter().enumerate() {
            let invoke_id = invoke
                .id
                .unwrap_or_else(|| format!("{id}:invocation[{index}]"));
            let src = match invoke.src {
                InvokeSource::Named(src) => src,
                InvokeSource::Inline(logic) => {
                    let src = format!("xstate.invoke.{invoke_id}");
                    self.invoked.push((src.clone(), logic));
                    src
                }
            };
            let sync_snapshot = !invoke.on_snapshot.is_empty();
            for transition in invoke.on_done {
                add_handler(&mut handlers, Event::done_actor_type(&invoke_id), transition);
            }
            for transition in invoke.on_error {
                add_handler(&mut handlers, Event::error_actor_type(&invoke_id), transition);
            }
            for transition in invoke.on_snapshot {
                add_handler(&mut handlers, Event::snapshot_type(&invoke_id), transition);
            }
            invocations.push(InvokeDef {
                id: invoke_id,
                src,
                system_id: invoke.system_id,
                input: invoke.input,
                sync_snapshot,
            });
        }

        self.nodes.push(StateNode {
            id,
            key,
            path: path.clone(),
            kind,
            order,
            parent,
            children: Vec::new(),
            history,
            tags,
            meta,
            description,
            on: Vec::new(),
            always: Vec::new(),
            entry,
            exit,
            initial: None,
            history_target: None,
            invoke: invocations,
            output,
        });
        self.pending.push(Pending {
            node: order,
            kind,
            initial: initial.map(|key| (key, initial_actions)),
            handlers,
            always,
            history_target,
        });

        let children = states
            .into_iter()
            .map(|(child_key, child)| {
                let mut child_path = path.clone();
                child_path.push(child_key.clone());
                self.add(child_key, child_path, Some(order), child)
            })
            .collect();
        self.nodes[order].children = children;
        order
    }
}

fn add_handler<C>(
    handlers: &mut Vec<(String, Vec<TransitionConfig<C>>)>,
    event: String,
    transition: TransitionConfig<C>,
) {
    match handlers.iter_mut().find(|(existing, _)| *existing == event) {
        Some((_, transitions)) => transitions.push(transition),
        None => handlers.push((event, vec![transition])),
    }
}

fn resolve<C: 'static>(tree: &mut StateTree<C>, pending: Pending<C>) -> Vec<Check> {
    let node = pending.node;
    let state = tree.node(node).id.clone();
    let mut checks = Vec::new();

    let initial = match (pending.kind, pending.initial) {
        (NodeKind::Compound, None) => {
            checks.push(Validation::fail(BuildError::MissingInitial {
                state: state.clone(),
            }));
            None
        }
        (NodeKind::Compound, Some((key, actions))) => match tree.node_by_path(node, &key) {
            Ok(target) if tree.is_descendant(target, node) => Some(TransitionDef {
                source: node,
                event_type: String::new(),
                targets: Some(vec![target]),
                guard: None,
                actions,
                reenter: false,
            }),
            _ => {
                checks.push(Validation::fail(BuildError::InvalidInitial {
                    state: state.clone(),
                    initial: key,
                }));
                None
            }
        },
        _ => None,
    };

    let mut on = Vec::new();
    for (event, configs) in pending.handlers {
        let mut transitions = Vec::new();
        for config in configs {
            match resolve_transition(tree, node, &event, config) {
                Ok(transition) => transitions.push(transition),
                Err(error) => checks.push(Validation::fail(error)),
            }
        }
        on.push((event, transitions));
    }

    let mut always = Vec::new();
    for config in pending.always {
        match resolve_transition(tree, node, "", config) {
            Ok(transition) => always.push(transition),
            Err(error) => checks.push(Validation::fail(error)),
        }
    }

    let history_target = match pending.history_target {
        Some(target) => match tree.resolve_target(node, &target) {
            Ok(resolved) => Some(vec![resolved]),
            Err(reason) => {
                checks.push(Validation::fail(BuildError::UnresolvedTarget {
                    state: state.clone(),
                    target,
                    reason,
                }));
                None
            }
        },
        None => None,
    };

    let resolved = tree.node_mut(node);
    resolved.initial = initial;
    resolved.on = on;
    resolved.always = always;
    resolved.history_target = history_target;
    checks
}

fn resolve_transition<C>(
    tree: &StateTree<C>,
    source: NodeId,
    event: &str,
    config: TransitionConfig<C>,
) -> Result<TransitionDef<C>, BuildError> {
    let targets = if config.targets.is_empty() {
        None
    } else {
        let resolved = config
            .targets
            .iter()
            .map(|target| {
                tree.resolve_target(source, target)
                    .map_err(|reason| BuildError::UnresolvedTarget {
                        state: tree.node(source).id.clone(),
                        target: target.clone(),
                        reason,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Some(resolved)
    };
    Ok(TransitionDef {
        source,
        event_type: event.to_string(),
        targets,
        guard: config.guard,
        actions: config.actions,
        reenter: config.reenter,
    })
}

/// Parallel regions that handle the same event where one of them targets
/// into another region.
fn parallel_conflicts<C>(tree: &StateTree<C>) -> Vec<Check> {
    let within = |node: NodeId, region: NodeId| node == region || tree.is_descendant(node, region);
    let mut conflicts = BTreeSet::new();
    for parallel in tree.iter().filter(|state| state.kind == NodeKind::Parallel) {
        let regions: Vec<NodeId> = tree.regions(parallel.order).collect();
        for &region in &regions {
            let others: Vec<NodeId> = regions.iter().copied().filter(|&r| r != region).collect();
            for state in tree.iter().filter(|state| within(state.order, region)) {
                for (event, transitions) in state.transitions() {
                    let crosses = transitions.iter().any(|transition| {
                        transition.target_slice().iter().any(|&target| {
                            others.iter().any(|&other| within(target, other))
                        })
                    });
                    let shared = others.iter().any(|&other| {
                        tree.iter().any(|candidate| {
                            within(candidate.order, other)
                                && candidate.transitions_for(event).is_some()
                        })
                    });
                    if crosses && shared {
                        conflicts.insert((parallel.id.clone(), event.to_string()));
                    }
                }
            }
        }
    }
    conflicts
        .into_iter()
        .map(|(state, event)| Validation::fail(BuildError::ParallelConflict { state, event }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HistoryKind;
    use crate::effects::DelayRef;

    fn nested() -> MachineBuilder<()> {
        MachineBuilder::new("app")
            .context(())
            .initial("idle")
            .state("idle", StateConfig::new().on("LOAD", "loading.fetching"))
            .state(
                "loading",
                StateConfig::new()
                    .initial("fetching")
                    .state("fetching", StateConfig::new().on("DONE", "#app.ready"))
                    .state("hist", StateConfig::history(HistoryKind::Shallow)),
            )
            .state("ready", StateConfig::final_state())
    }

    #[test]
    fn builds_ids_in_document_order() {
        let machine = nested().build().unwrap();
        let tree = machine.tree();

        let ids: Vec<&str> = tree.iter().map(|node| node.id.as_str()).collect();
        assert_eq!(
            ids,
            [
                "app",
                "app.idle",
                "app.loading",
                "app.loading.fetching",
                "app.loading.hist",
                "app.ready"
            ]
        );
        assert!(tree.iter().enumerate().all(|(index, node)| node.order == index));
        assert_eq!(tree.node(2).kind, NodeKind::Compound);
        assert_eq!(tree.node(4).kind, NodeKind::History);
    }

    #[test]
    fn targets_resolve_across_the_tree() {
        let machine = nested().build().unwrap();
        let tree = machine.tree();

        let load = tree.candidates(1, "LOAD")[0];
        assert_eq!(load.targets, Some(vec![3]));
        let done = tree.candidates(3, "DONE")[0];
        assert_eq!(done.targets, Some(vec![5]));
    }

    #[test]
    fn every_problem_is_reported() {
        let result = MachineBuilder::<()>::new("broken")
            .initial("a")
            .state("a", StateConfig::new().on("GO", "nowhere"))
            .state("b", StateConfig::new().state("b1", StateConfig::new()))
            .build();

        let error = result.unwrap_err();
        let errors = error.errors();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&&BuildError::MissingContext));
        assert!(errors
            .iter()
            .any(|e| matches!(e, BuildError::UnresolvedTarget { target, .. } if target == "nowhere")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, BuildError::MissingInitial { state } if state == "broken.b")));
    }

    #[test]
    fn invalid_initial_is_rejected() {
        let result = MachineBuilder::new("m")
            .context(())
            .initial("missing")
            .state("a", StateConfig::new())
            .build();

        assert!(matches!(
            result,
            Err(BuildError::InvalidInitial { initial, .. }) if initial == "missing"
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let result = MachineBuilder::new("m")
            .context(())
            .initial("a")
            .state("a", StateConfig::new().id("same"))
            .state("b", StateConfig::new().id("same"))
            .build();

        assert!(matches!(result, Err(BuildError::DuplicateId(id)) if id == "same"));
    }

    #[test]
    fn cross_region_targets_on_shared_events_conflict() {
        let result = MachineBuilder::new("p")
            .context(())
            .parallel()
            .state(
                "left",
                StateConfig::new()
                    .initial("l1")
                    .state("l1", StateConfig::new().on("GO", "#p.right.r2")),
            )
            .state(
                "right",
                StateConfig::new()
                    .initial("r1")
                    .state("r1", StateConfig::new().on("GO", "r2"))
                    .state("r2", StateConfig::new()),
            )
            .build();

        assert!(matches!(
            result,
            Err(BuildError::ParallelConflict { state, event }) if state == "p" && event == "GO"
        ));
    }

    #[test]
    fn after_expands_into_timer_actions() {
        let machine = MachineBuilder::new("light")
            .context(())
            .initial("green")
            .state("green", StateConfig::new().after(1000u64, "yellow"))
            .state("yellow", StateConfig::new())
            .build()
            .unwrap();
        let green = machine.tree().node(1);
        let event = "xstate.after.1000.light.green";

        assert!(matches!(
            &green.entry[..],
            [Action::Raise { id: Some(id), delay: Some(DelayRef::Millis(1000)), .. }] if id == event
        ));
        assert!(matches!(&green.exit[..], [Action::Cancel(id)] if id == event));
        assert_eq!(machine.tree().candidates(1, event)[0].targets, Some(vec![2]));
    }

    #[test]
    fn invocations_get_default_ids_and_handlers() {
        let machine = MachineBuilder::new("m")
            .context(())
            .initial("busy")
            .state(
                "busy",
                StateConfig::new()
                    .invoke(
                        InvokeConfig::logic(crate::logic::empty_logic())
                            .on_done("idle")
                            .on_snapshot(TransitionConfig::new()),
                    )
                    .on_done("idle"),
            )
            .state("idle", StateConfig::new())
            .build()
            .unwrap();
        let busy = machine.tree().node(1);
        let invoke = &busy.invocations()[0];

        assert_eq!(invoke.id, "m.busy:invocation[0]");
        assert_eq!(invoke.src, "xstate.invoke.m.busy:invocation[0]");
        assert!(invoke.sync_snapshot);
        assert!(machine.implementations().actors.contains_key(&invoke.src));
        let events: Vec<&str> = busy.transitions().map(|(event, _)| event).collect();
        assert_eq!(
            events,
            [
                "xstate.done.state.m.busy",
                "xstate.done.actor.m.busy:invocation[0]",
                "xstate.snapshot.m.busy:invocation[0]"
            ]
        );
    }
}
