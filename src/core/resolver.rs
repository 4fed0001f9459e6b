//! Transition selection and exit/entry set computation.
//!
//! These are pure functions of the tree, the active configuration and the
//! recorded history. The engine uses them to plan a microstep before any
//! action runs.

use super::event::Event;
use super::guard::GuardScope;
use super::history::HistoryValue;
use super::node::{NodeId, NodeKind, TransitionDef};
use super::tree::StateTree;
use std::collections::BTreeSet;

/// Transitions enabled by `event` in the configuration `nodes`.
///
/// Selection descends through active children first; a state only handles the
/// event itself when none of its active descendants did. Parallel regions
/// contribute independently.
pub(crate) fn select_transitions<'t, C: 'static>(
    tree: &'t StateTree<C>,
    nodes: &BTreeSet<NodeId>,
    context: &C,
    event: &Event,
    guards: &GuardScope<'_, C>,
) -> Result<Vec<&'t TransitionDef<C>>, String> {
    select_from(tree, tree.root(), nodes, context, event, guards)
}

fn select_from<'t, C: 'static>(
    tree: &'t StateTree<C>,
    node: NodeId,
    nodes: &BTreeSet<NodeId>,
    context: &C,
    event: &Event,
    guards: &GuardScope<'_, C>,
) -> Result<Vec<&'t TransitionDef<C>>, String> {
    let mut inner = Vec::new();
    match tree.node(node).kind {
        NodeKind::Parallel => {
            for region in tree.regions(node).filter(|region| nodes.contains(region)) {
                inner.extend(select_from(tree, region, nodes, context, event, guards)?);
            }
        }
        NodeKind::Compound => {
            if let Some(child) = tree.regions(node).find(|child| nodes.contains(child)) {
                inner = select_from(tree, child, nodes, context, event, guards)?;
            }
        }
        _ => {}
    }
    if !inner.is_empty() {
        return Ok(inner);
    }
    Ok(next_transition(tree, node, context, event, guards)?
        .into_iter()
        .collect())
}

/// The first candidate of `node` whose guard passes.
fn next_transition<'t, C: 'static>(
    tree: &'t StateTree<C>,
    node: NodeId,
    context: &C,
    event: &Event,
    guards: &GuardScope<'_, C>,
) -> Result<Option<&'t TransitionDef<C>>, String> {
    for candidate in tree.candidates(node, &event.event_type) {
        if guard_passes(tree, candidate, context, event, guards)? {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

fn guard_passes<C: 'static>(
    tree: &StateTree<C>,
    transition: &TransitionDef<C>,
    context: &C,
    event: &Event,
    guards: &GuardScope<'_, C>,
) -> Result<bool, String> {
    let Some(guard) = &transition.guard else {
        return Ok(true);
    };
    guard.evaluate(context, event, guards).map_err(|err| {
        format!(
            "Unable to evaluate guard '{}' in transition for event '{}' in state node '{}':\n{err}",
            guard.name(),
            event.event_type,
            tree.node(transition.source).id
        )
    })
}

/// Eventless transitions enabled in the configuration `nodes`.
///
/// Each atomic state contributes the first passing `always` transition of
/// itself or its nearest ancestor that defines any.
pub(crate) fn select_eventless<'t, C: 'static>(
    tree: &'t StateTree<C>,
    nodes: &BTreeSet<NodeId>,
    history: &HistoryValue,
    context: &C,
    event: &Event,
    guards: &GuardScope<'_, C>,
) -> Result<Vec<&'t TransitionDef<C>>, String> {
    let mut enabled: Vec<&'t TransitionDef<C>> = Vec::new();
    for &atomic in nodes.iter().filter(|&&node| tree.node(node).kind.is_atomic()) {
        let search = std::iter::once(atomic).chain(tree.proper_ancestors(atomic, None));
        'states: for state in search {
            let always = &tree.node(state).always;
            if always.is_empty() {
                continue;
            }
            for transition in always {
                if guard_passes(tree, transition, context, event, guards)? {
                    if !enabled.iter().any(|t| std::ptr::eq(*t, transition)) {
                        enabled.push(transition);
                    }
                    break 'states;
                }
            }
        }
    }
    Ok(remove_conflicting(tree, enabled, nodes, history))
}

/// Drop transitions whose exit sets overlap an already accepted one.
///
/// A transition from a descendant pre-empts its ancestor's; otherwise the
/// earlier one wins. The result is ordered by source.
pub(crate) fn remove_conflicting<'t, C>(
    tree: &StateTree<C>,
    enabled: Vec<&'t TransitionDef<C>>,
    nodes: &BTreeSet<NodeId>,
    history: &HistoryValue,
) -> Vec<&'t TransitionDef<C>> {
    let mut filtered: Vec<&'t TransitionDef<C>> = Vec::new();
    for t1 in enabled {
        let exit1 = exit_set(tree, &[t1], nodes, history);
        let mut preempted = false;
        let mut to_remove = Vec::new();
        for (index, t2) in filtered.iter().enumerate() {
            let exit2 = exit_set(tree, &[*t2], nodes, history);
            if exit1.intersection(&exit2).next().is_some() {
                if tree.is_descendant(t1.source, t2.source) {
                    to_remove.push(index);
                } else {
                    preempted = true;
                    break;
                }
            }
        }
        if !preempted {
            for index in to_remove.into_iter().rev() {
                filtered.remove(index);
            }
            filtered.push(t1);
        }
    }
    filtered.sort_by_key(|t| t.source);
    filtered
}

/// Nodes recorded by a history node, if any.
pub(crate) fn recorded<C>(
    tree: &StateTree<C>,
    history: &HistoryValue,
    node: NodeId,
) -> Option<Vec<NodeId>> {
    history.get(&tree.node(node).id).map(|ids| {
        ids.iter()
            .filter_map(|id| tree.node_by_id(id))
            .collect()
    })
}

/// Targets with history nodes replaced by what they restore.
pub(crate) fn effective_targets<C>(
    tree: &StateTree<C>,
    targets: &[NodeId],
    history: &HistoryValue,
) -> Vec<NodeId> {
    let mut resolved = Vec::new();
    for &target in targets {
        let expanded = if tree.node(target).kind == NodeKind::History {
            match recorded(tree, history, target) {
                Some(nodes) => nodes,
                None => effective_targets(tree, &tree.history_default(target), history),
            }
        } else {
            vec![target]
        };
        for node in expanded {
            if !resolved.contains(&node) {
                resolved.push(node);
            }
        }
    }
    resolved
}

/// The state a transition is scoped to.
///
/// `None` means the transition reaches past the root and every node is in
/// scope.
pub(crate) fn transition_domain<C>(
    tree: &StateTree<C>,
    transition: &TransitionDef<C>,
    history: &HistoryValue,
) -> Option<NodeId> {
    let targets = effective_targets(tree, transition.targets.as_deref()?, history);
    let source = transition.source;
    if !transition.reenter
        && targets
            .iter()
            .all(|&target| target == source || tree.is_descendant(target, source))
    {
        return Some(source);
    }
    let mut states = targets;
    states.push(source);
    if let Some(lca) = least_common_ancestor(tree, &states) {
        return Some(lca);
    }
    if transition.reenter {
        return None;
    }
    Some(tree.root())
}

fn least_common_ancestor<C>(tree: &StateTree<C>, states: &[NodeId]) -> Option<NodeId> {
    let (&head, tail) = states.split_first()?;
    tree.proper_ancestors(head, None)
        .into_iter()
        .find(|&ancestor| tail.iter().all(|&node| tree.is_descendant(node, ancestor)))
}

fn within<C>(tree: &StateTree<C>, node: NodeId, domain: Option<NodeId>) -> bool {
    match domain {
        Some(domain) => tree.is_descendant(node, domain),
        None => true,
    }
}

/// Active nodes left by the given transitions.
pub(crate) fn exit_set<C>(
    tree: &StateTree<C>,
    transitions: &[&TransitionDef<C>],
    nodes: &BTreeSet<NodeId>,
    history: &HistoryValue,
) -> BTreeSet<NodeId> {
    let mut exit = BTreeSet::new();
    for transition in transitions {
        if !transition.has_targets() {
            continue;
        }
        let domain = transition_domain(tree, transition, history);
        if transition.reenter && Some(transition.source) == domain {
            exit.insert(transition.source);
        }
        exit.extend(
            nodes
                .iter()
                .copied()
                .filter(|&node| within(tree, node, domain)),
        );
    }
    exit
}

/// States entered by the given transitions.
#[derive(Debug, Default)]
pub(crate) struct EntrySet {
    pub to_enter: BTreeSet<NodeId>,
    /// States entered by default, whose initial actions run.
    pub default_entry: BTreeSet<NodeId>,
}

pub(crate) fn entry_set<C>(
    tree: &StateTree<C>,
    transitions: &[&TransitionDef<C>],
    history: &HistoryValue,
) -> EntrySet {
    let mut set = EntrySet::default();
    for transition in transitions {
        let domain = transition_domain(tree, transition, history);
        for &target in transition.target_slice() {
            if tree.node(target).kind != NodeKind::History
                && (transition.source != target
                    || Some(transition.source) != domain
                    || transition.reenter)
            {
                set.to_enter.insert(target);
                set.default_entry.insert(target);
            }
            add_descendants(tree, target, history, &mut set);
        }
        let reentrancy_domain = if tree.node(transition.source).parent.is_none() && transition.reenter
        {
            None
        } else {
            domain
        };
        for target in effective_targets(tree, transition.target_slice(), history) {
            let mut ancestors = tree.proper_ancestors(target, domain);
            if let Some(domain) = domain.filter(|&d| tree.node(d).kind == NodeKind::Parallel) {
                ancestors.push(domain);
            }
            add_ancestors(tree, &ancestors, reentrancy_domain, history, &mut set);
        }
    }
    set
}

fn add_descendants<C>(tree: &StateTree<C>, node: NodeId, history: &HistoryValue, set: &mut EntrySet) {
    let state = tree.node(node);
    match state.kind {
        NodeKind::History => {
            let parent = state.parent;
            let (targets, via_parent_initial) = match recorded(tree, history, node) {
                Some(nodes) => (nodes, false),
                None => (
                    tree.history_default(node),
                    state.history_target.is_none(),
                ),
            };
            for &target in &targets {
                set.to_enter.insert(target);
                if via_parent_initial {
                    if let Some(parent) = parent {
                        set.default_entry.insert(parent);
                    }
                }
                add_descendants(tree, target, history, set);
            }
            for &target in &targets {
                let ancestors = tree.proper_ancestors(target, parent);
                add_ancestors(tree, &ancestors, None, history, set);
            }
        }
        NodeKind::Compound => {
            let Some(initial) = tree.initial_target(node) else {
                return;
            };
            if tree.node(initial).kind != NodeKind::History {
                set.to_enter.insert(initial);
                set.default_entry.insert(initial);
            }
            add_descendants(tree, initial, history, set);
            let ancestors = tree.proper_ancestors(initial, Some(node));
            add_ancestors(tree, &ancestors, None, history, set);
        }
        NodeKind::Parallel => {
            for region in tree.regions(node).collect::<Vec<_>>() {
                if !set
                    .to_enter
                    .iter()
                    .any(|&entered| tree.is_descendant(entered, region))
                {
                    set.to_enter.insert(region);
                    set.default_entry.insert(region);
                    add_descendants(tree, region, history, set);
                }
            }
        }
        NodeKind::Atomic | NodeKind::Final => {}
    }
}

fn add_ancestors<C>(
    tree: &StateTree<C>,
    ancestors: &[NodeId],
    reentrancy_domain: Option<NodeId>,
    history: &HistoryValue,
    set: &mut EntrySet,
) {
    for &ancestor in ancestors {
        if reentrancy_domain.map_or(true, |domain| tree.is_descendant(ancestor, domain)) {
            set.to_enter.insert(ancestor);
        }
        if tree.node(ancestor).kind == NodeKind::Parallel {
            for region in tree.regions(ancestor).collect::<Vec<_>>() {
                if !set
                    .to_enter
                    .iter()
                    .any(|&entered| tree.is_descendant(entered, region))
                {
                    set.to_enter.insert(region);
                    add_descendants(tree, region, history, set);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::HistoryKind;
    use crate::core::tree::tests::node;
    use crate::core::StateValue;
    use std::collections::HashMap;

    fn transition(source: NodeId, event: &str, targets: Option<Vec<NodeId>>) -> TransitionDef<()> {
        TransitionDef {
            source,
            event_type: event.to_string(),
            targets,
            guard: None,
            actions: Vec::new(),
            reenter: false,
        }
    }

    /// m { a { a1, a2, hist (deep) }, b (parallel) { x { x1 }, y { y1 } } }
    fn sample() -> StateTree<()> {
        let mut nodes = vec![
            node("m", NodeKind::Compound, 0, None, vec![1, 5]),
            node("m.a", NodeKind::Compound, 1, Some(0), vec![2, 3, 4]),
            node("m.a.a1", NodeKind::Atomic, 2, Some(1), vec![]),
            node("m.a.a2", NodeKind::Atomic, 3, Some(1), vec![]),
            node("m.a.hist", NodeKind::History, 4, Some(1), vec![]),
            node("m.b", NodeKind::Parallel, 5, Some(0), vec![6, 8]),
            node("m.b.x", NodeKind::Compound, 6, Some(5), vec![7]),
            node("m.b.x.x1", NodeKind::Atomic, 7, Some(6), vec![]),
            node("m.b.y", NodeKind::Compound, 8, Some(5), vec![9]),
            node("m.b.y.y1", NodeKind::Atomic, 9, Some(8), vec![]),
        ];
        nodes[0].initial = Some(transition(0, "", Some(vec![1])));
        nodes[1].initial = Some(transition(1, "", Some(vec![2])));
        nodes[4].history = Some(HistoryKind::Deep);
        nodes[6].initial = Some(transition(6, "", Some(vec![7])));
        nodes[8].initial = Some(transition(8, "", Some(vec![9])));
        nodes[2].on = vec![("GO".into(), vec![transition(2, "GO", Some(vec![5]))])];
        nodes[1].on = vec![
            ("GO".into(), vec![transition(1, "GO", Some(vec![3]))]),
            ("NEXT".into(), vec![transition(1, "NEXT", Some(vec![3]))]),
        ];
        StateTree::new(nodes)
    }

    fn select(tree: &StateTree<()>, nodes: &BTreeSet<NodeId>, event: &str) -> Vec<NodeId> {
        let registry = HashMap::new();
        let value = tree.state_value(nodes);
        let scope = GuardScope {
            registry: &registry,
            tree,
            nodes,
            value: &value,
        };
        select_transitions(tree, nodes, &(), &Event::new(event), &scope)
            .unwrap()
            .into_iter()
            .map(|t| t.source)
            .collect()
    }

    #[test]
    fn deepest_handler_wins() {
        let tree = sample();
        let nodes = BTreeSet::from([0, 1, 2]);

        assert_eq!(select(&tree, &nodes, "GO"), vec![2]);
        assert_eq!(select(&tree, &nodes, "NEXT"), vec![1]);
        assert!(select(&tree, &nodes, "UNKNOWN").is_empty());
    }

    #[test]
    fn external_transition_exits_up_to_common_ancestor() {
        let tree = sample();
        let nodes = BTreeSet::from([0, 1, 2]);
        let go = transition(2, "GO", Some(vec![5]));

        assert_eq!(transition_domain(&tree, &go, &HistoryValue::new()), Some(0));
        assert_eq!(
            exit_set(&tree, &[&go], &nodes, &HistoryValue::new()),
            BTreeSet::from([1, 2])
        );
    }

    #[test]
    fn entering_parallel_enters_every_region() {
        let tree = sample();
        let go = transition(2, "GO", Some(vec![5]));
        let entry = entry_set(&tree, &[&go], &HistoryValue::new());

        assert_eq!(entry.to_enter, BTreeSet::from([5, 6, 7, 8, 9]));
        assert!(entry.default_entry.contains(&6));
    }

    #[test]
    fn child_transition_stays_inside_source() {
        let tree = sample();
        let next = transition(1, "NEXT", Some(vec![3]));
        let nodes = BTreeSet::from([0, 1, 2]);

        assert_eq!(transition_domain(&tree, &next, &HistoryValue::new()), Some(1));
        assert_eq!(
            exit_set(&tree, &[&next], &nodes, &HistoryValue::new()),
            BTreeSet::from([2])
        );
        assert_eq!(
            entry_set(&tree, &[&next], &HistoryValue::new()).to_enter,
            BTreeSet::from([3])
        );
    }

    #[test]
    fn reentering_self_transition_exits_source() {
        let tree = sample();
        let mut again = transition(1, "AGAIN", Some(vec![1]));
        again.reenter = true;
        let nodes = BTreeSet::from([0, 1, 3]);

        assert_eq!(
            exit_set(&tree, &[&again], &nodes, &HistoryValue::new()),
            BTreeSet::from([1, 3])
        );
        assert_eq!(
            entry_set(&tree, &[&again], &HistoryValue::new()).to_enter,
            BTreeSet::from([1, 2])
        );
    }

    #[test]
    fn history_target_restores_recorded_state() {
        let tree = sample();
        let back = transition(5, "BACK", Some(vec![4]));
        let history = HistoryValue::new().record("m.a.hist", vec!["m.a.a2".into()]);
        let entry = entry_set(&tree, &[&back], &history);

        assert!(entry.to_enter.contains(&3));
        assert!(entry.to_enter.contains(&1));
        assert!(!entry.to_enter.contains(&2));
    }

    #[test]
    fn history_without_record_uses_parent_initial() {
        let tree = sample();
        let back = transition(5, "BACK", Some(vec![4]));
        let entry = entry_set(&tree, &[&back], &HistoryValue::new());

        assert!(entry.to_enter.contains(&2));
        assert!(entry.default_entry.contains(&1));
    }

    #[test]
    fn descendant_source_preempts_ancestor() {
        let tree = sample();
        let nodes = BTreeSet::from([0, 1, 2]);
        let parent = transition(1, "GO", Some(vec![3]));
        let child = transition(2, "GO", Some(vec![5]));
        let kept = remove_conflicting(&tree, vec![&parent, &child], &nodes, &HistoryValue::new());

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].source, 2);
    }

    #[test]
    fn targetless_transitions_never_conflict() {
        let tree = sample();
        let nodes = BTreeSet::from([0, 5, 6, 7, 8, 9]);
        let x = transition(7, "TICK", None);
        let y = transition(9, "TICK", None);
        let kept = remove_conflicting(&tree, vec![&y, &x], &nodes, &HistoryValue::new());

        assert_eq!(kept.iter().map(|t| t.source).collect::<Vec<_>>(), vec![7, 9]);
    }

    #[test]
    fn value_of_parallel_configuration() {
        let tree = sample();
        let nodes = BTreeSet::from([0, 5, 6, 7, 8, 9]);

        assert_eq!(
            tree.state_value(&nodes),
            serde_json::from_value::<StateValue>(serde_json::json!({"b": {"x": "x1", "y": "y1"}}))
                .unwrap()
        );
    }
}
