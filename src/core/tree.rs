//! The immutable state node tree and its structural queries.
//!
//! The tree is an arena: nodes are stored in pre-order, so a node's index is
//! also its document order. Derived per-node views are computed on first use
//! and cached in side tables.

use super::event::descriptor_matches;
use super::node::{NodeId, NodeKind, StateNode, TransitionDef};
use super::state_value::StateValue;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

/// Arena of state nodes with id lookup and memoized event views.
pub struct StateTree<C> {
    nodes: Vec<StateNode<C>>,
    ids: HashMap<String, NodeId>,
    own_events: Vec<OnceLock<Vec<String>>>,
    events: Vec<OnceLock<Vec<String>>>,
}

impl<C> StateTree<C> {
    /// Wrap nodes already laid out in pre-order.
    pub(crate) fn new(nodes: Vec<StateNode<C>>) -> Self {
        let ids = nodes
            .iter()
            .map(|node| (node.id.clone(), node.order))
            .collect();
        let own_events = nodes.iter().map(|_| OnceLock::new()).collect();
        let events = nodes.iter().map(|_| OnceLock::new()).collect();
        Self {
            nodes,
            ids,
            own_events,
            events,
        }
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn node(&self, node: NodeId) -> &StateNode<C> {
        &self.nodes[node]
    }

    pub(crate) fn node_mut(&mut self, node: NodeId) -> &mut StateNode<C> {
        &mut self.nodes[node]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StateNode<C>> {
        self.nodes.iter()
    }

    /// Find a node by id, with or without the leading `#`.
    ///
    /// `#form.step.fields` resolves the whole id first, then falls back to the
    /// longest id prefix followed by a relative key path.
    pub fn node_by_id(&self, id: &str) -> Option<NodeId> {
        let id = id.strip_prefix('#').unwrap_or(id);
        if let Some(&node) = self.ids.get(id) {
            return Some(node);
        }
        let parts: Vec<&str> = id.split('.').collect();
        (1..parts.len()).rev().find_map(|split| {
            let base = self.ids.get(&parts[..split].join("."))?;
            parts[split..]
                .iter()
                .try_fold(*base, |node, key| self.child_by_key(node, key))
        })
    }

    pub fn child_by_key(&self, node: NodeId, key: &str) -> Option<NodeId> {
        self.nodes[node]
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child].key == key)
    }

    /// Walk a dotted key path starting below `from`.
    pub fn node_by_path(&self, from: NodeId, path: &str) -> Result<NodeId, String> {
        if path.starts_with('#') {
            if let Some(node) = self.node_by_id(path) {
                return Ok(node);
            }
        }
        let mut current = from;
        for key in path.split('.') {
            if key.is_empty() {
                break;
            }
            current = self.child_by_key(current, key).ok_or_else(|| {
                format!(
                    "Child state '{key}' does not exist on '{}'",
                    self.nodes[current].id
                )
            })?;
        }
        Ok(current)
    }

    /// Resolve a transition target written on `from`.
    ///
    /// `#id` targets are global, `.child` targets are relative to `from`, and
    /// plain targets are siblings of `from`.
    pub fn resolve_target(&self, from: NodeId, target: &str) -> Result<NodeId, String> {
        if target.starts_with('#') {
            return self
                .node_by_id(target)
                .ok_or_else(|| format!("Unable to locate state node with id '{target}'"));
        }
        let node = &self.nodes[from];
        if let Some(relative) = target.strip_prefix('.') {
            return self.node_by_path(from, relative).map_err(|err| {
                format!("Invalid transition definition for state node '{}':\n{err}", node.id)
            });
        }
        match node.parent {
            Some(parent) => self.node_by_path(parent, target).map_err(|err| {
                format!("Invalid transition definition for state node '{}':\n{err}", node.id)
            }),
            None => Err(format!(
                "Invalid target: \"{target}\" is not a valid target from the root node. Did you mean \".{target}\"?"
            )),
        }
    }

    /// Whether `node` is a proper descendant of `ancestor`.
    pub fn is_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut marker = self.nodes[node].parent;
        while let Some(parent) = marker {
            if parent == ancestor {
                return true;
            }
            marker = self.nodes[parent].parent;
        }
        false
    }

    /// Ancestors of `node`, nearest first, stopping before `to`.
    pub fn proper_ancestors(&self, node: NodeId, to: Option<NodeId>) -> Vec<NodeId> {
        let mut ancestors = Vec::new();
        if to == Some(node) {
            return ancestors;
        }
        let mut marker = self.nodes[node].parent;
        while let Some(parent) = marker {
            if Some(parent) == to {
                break;
            }
            ancestors.push(parent);
            marker = self.nodes[parent].parent;
        }
        ancestors
    }

    /// Children that take part in a configuration (history nodes excluded).
    pub fn regions(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[node]
            .children
            .iter()
            .copied()
            .filter(|&child| self.nodes[child].kind != NodeKind::History)
    }

    pub fn history_children(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[node]
            .children
            .iter()
            .copied()
            .filter(|&child| self.nodes[child].kind == NodeKind::History)
    }

    pub fn initial_target(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node]
            .initial
            .as_ref()
            .and_then(|initial| initial.target_slice().first().copied())
    }

    /// Targets a history node falls back to when nothing was recorded.
    pub fn history_default(&self, history: NodeId) -> Vec<NodeId> {
        let node = &self.nodes[history];
        if let Some(targets) = &node.history_target {
            return targets.clone();
        }
        node.parent
            .and_then(|parent| self.initial_target(parent))
            .into_iter()
            .collect()
    }

    /// `node` plus every state entered by default below it.
    pub fn initial_nodes(&self, node: NodeId) -> Vec<NodeId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            match self.nodes[current].kind {
                NodeKind::Compound => stack.extend(self.initial_target(current)),
                NodeKind::Parallel => stack.extend(self.regions(current)),
                _ => {}
            }
        }
        seen.into_iter().collect()
    }

    fn initial_nodes_with_ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut states = self.initial_nodes(node);
        let ancestors: Vec<NodeId> = states
            .iter()
            .flat_map(|&state| self.proper_ancestors(state, Some(node)))
            .collect();
        states.extend(ancestors);
        states
    }

    /// Complete a partial node set into a full configuration.
    ///
    /// Compound nodes without an active child gain their initial states,
    /// parallel nodes gain all missing regions, and every ancestor is added.
    pub fn complete(&self, nodes: impl IntoIterator<Item = NodeId>) -> BTreeSet<NodeId> {
        let mut set: BTreeSet<NodeId> = nodes.into_iter().collect();
        let mut pending: Vec<NodeId> = set.iter().copied().collect();
        while let Some(node) = pending.pop() {
            let additions: Vec<NodeId> = match self.nodes[node].kind {
                NodeKind::Compound => {
                    let has_child = self.nodes[node]
                        .children
                        .iter()
                        .any(|child| set.contains(child));
                    if has_child {
                        Vec::new()
                    } else {
                        self.initial_nodes_with_ancestors(node)
                    }
                }
                NodeKind::Parallel => self
                    .regions(node)
                    .filter(|child| !set.contains(child))
                    .flat_map(|child| self.initial_nodes_with_ancestors(child))
                    .collect(),
                _ => Vec::new(),
            };
            for addition in additions {
                if set.insert(addition) {
                    pending.push(addition);
                }
            }
        }
        let ancestors: Vec<NodeId> = set
            .iter()
            .flat_map(|&node| self.proper_ancestors(node, None))
            .collect();
        set.extend(ancestors);
        set
    }

    /// Resolve a state value into the full set of active nodes.
    pub fn nodes_from_value(&self, value: &StateValue) -> Result<BTreeSet<NodeId>, String> {
        let mut nodes = vec![self.root()];
        self.collect_value_nodes(self.root(), value, &mut nodes)?;
        let nodes = self.complete(nodes);
        for &node in &nodes {
            let state = &self.nodes[node];
            if state.kind != NodeKind::Compound {
                continue;
            }
            let active: Vec<&str> = state
                .children
                .iter()
                .filter(|child| nodes.contains(child))
                .map(|&child| self.nodes[child].key.as_str())
                .collect();
            if active.len() > 1 {
                return Err(format!(
                    "States {} of '{}' cannot be active together",
                    active.join(", "),
                    state.id
                ));
            }
        }
        Ok(nodes)
    }

    fn collect_value_nodes(
        &self,
        node: NodeId,
        value: &StateValue,
        out: &mut Vec<NodeId>,
    ) -> Result<(), String> {
        match value {
            StateValue::Leaf(key) => {
                let child = self.child_by_key(node, key).ok_or_else(|| {
                    format!("State '{key}' does not exist on '{}'", self.nodes[node].id)
                })?;
                out.push(child);
            }
            StateValue::Branch(entries) => {
                for (key, sub) in entries {
                    let child = self.node_by_path(node, key)?;
                    out.push(child);
                    self.collect_value_nodes(child, sub, out)?;
                }
            }
        }
        Ok(())
    }

    /// The state value of a configuration.
    pub fn state_value(&self, nodes: &BTreeSet<NodeId>) -> StateValue {
        let mut adjacency: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for &node in nodes {
            adjacency.entry(node).or_default();
            if let Some(parent) = self.nodes[node].parent {
                if nodes.contains(&parent) {
                    adjacency.entry(parent).or_default().push(node);
                }
            }
        }
        self.value_from_adjacency(self.root(), &adjacency)
    }

    fn value_from_adjacency(
        &self,
        node: NodeId,
        adjacency: &BTreeMap<NodeId, Vec<NodeId>>,
    ) -> StateValue {
        let Some(children) = adjacency.get(&node) else {
            return StateValue::Branch(BTreeMap::new());
        };
        if self.nodes[node].kind == NodeKind::Compound {
            match children.first() {
                Some(&child) if self.nodes[child].kind.is_atomic() => {
                    return StateValue::Leaf(self.nodes[child].key.clone());
                }
                Some(_) => {}
                None => return StateValue::Branch(BTreeMap::new()),
            }
        }
        StateValue::Branch(
            children
                .iter()
                .map(|&child| {
                    (
                        self.nodes[child].key.clone(),
                        self.value_from_adjacency(child, adjacency),
                    )
                })
                .collect(),
        )
    }

    /// Whether `node` has reached a final configuration.
    pub fn is_in_final_state(&self, nodes: &BTreeSet<NodeId>, node: NodeId) -> bool {
        match self.nodes[node].kind {
            NodeKind::Compound => self
                .regions(node)
                .any(|child| self.nodes[child].kind == NodeKind::Final && nodes.contains(&child)),
            NodeKind::Parallel => self
                .regions(node)
                .all(|child| self.is_in_final_state(nodes, child)),
            kind => kind == NodeKind::Final,
        }
    }

    /// Transitions of `node` that may handle `event_type`.
    ///
    /// An exact descriptor wins; otherwise matching wildcard descriptors are
    /// used, most specific first.
    pub fn candidates(&self, node: NodeId, event_type: &str) -> Vec<&TransitionDef<C>> {
        let state = &self.nodes[node];
        if let Some(exact) = state.transitions_for(event_type) {
            return exact.iter().collect();
        }
        let mut wildcards: Vec<&(String, Vec<TransitionDef<C>>)> = state
            .on
            .iter()
            .filter(|(descriptor, _)| {
                (descriptor == "*" || descriptor.ends_with(".*"))
                    && descriptor_matches(descriptor, event_type)
            })
            .collect();
        wildcards.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        wildcards
            .into_iter()
            .flat_map(|(_, transitions)| transitions.iter())
            .collect()
    }

    /// Descriptors this node reacts to.
    pub fn own_events(&self, node: NodeId) -> &[String] {
        self.own_events[node].get_or_init(|| {
            self.nodes[node]
                .on
                .iter()
                .filter(|(_, transitions)| {
                    transitions
                        .iter()
                        .any(|t| t.targets.is_some() || !t.actions.is_empty() || t.reenter)
                })
                .map(|(descriptor, _)| descriptor.clone())
                .collect()
        })
    }

    /// Descriptors this node or any descendant reacts to.
    pub fn events(&self, node: NodeId) -> &[String] {
        self.events[node].get_or_init(|| {
            let mut events: Vec<String> = self.own_events(node).to_vec();
            for &child in &self.nodes[node].children {
                for event in self.events(child) {
                    if !events.contains(event) {
                        events.push(event.clone());
                    }
                }
            }
            events
        })
    }

    pub fn tags(&self, nodes: &BTreeSet<NodeId>) -> BTreeSet<String> {
        nodes
            .iter()
            .flat_map(|&node| self.nodes[node].tags.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::node::HistoryKind;
    use serde_json::json;

    pub(crate) fn node(
        id: &str,
        kind: NodeKind,
        order: NodeId,
        parent: Option<NodeId>,
        children: Vec<NodeId>,
    ) -> StateNode<()> {
        let path: Vec<String> = id.split('.').skip(1).map(str::to_string).collect();
        StateNode {
            id: id.to_string(),
            key: path.last().cloned().unwrap_or_else(|| id.to_string()),
            path,
            kind,
            order,
            parent,
            children,
            history: (kind == NodeKind::History).then_some(HistoryKind::Shallow),
            tags: Vec::new(),
            meta: None,
            description: None,
            on: Vec::new(),
            always: Vec::new(),
            entry: Vec::new(),
            exit: Vec::new(),
            initial: None,
            history_target: None,
            invoke: Vec::new(),
            output: None,
        }
    }

    fn initial(source: NodeId, target: NodeId) -> Option<TransitionDef<()>> {
        Some(TransitionDef {
            source,
            event_type: String::new(),
            targets: Some(vec![target]),
            guard: None,
            actions: Vec::new(),
            reenter: false,
        })
    }

    /// m (parallel) { a (compound) { a1, a2 }, b (compound) { b1, b2 (final) } }
    fn sample() -> StateTree<()> {
        let mut nodes = vec![
            node("m", NodeKind::Parallel, 0, None, vec![1, 4]),
            node("m.a", NodeKind::Compound, 1, Some(0), vec![2, 3]),
            node("m.a.a1", NodeKind::Atomic, 2, Some(1), vec![]),
            node("m.a.a2", NodeKind::Atomic, 3, Some(1), vec![]),
            node("m.b", NodeKind::Compound, 4, Some(0), vec![5, 6]),
            node("m.b.b1", NodeKind::Atomic, 5, Some(4), vec![]),
            node("m.b.b2", NodeKind::Final, 6, Some(4), vec![]),
        ];
        nodes[1].initial = initial(1, 2);
        nodes[4].initial = initial(4, 5);
        StateTree::new(nodes)
    }

    #[test]
    fn lookup_by_id_and_path() {
        let tree = sample();

        assert_eq!(tree.node_by_id("#m.a.a2"), Some(3));
        assert_eq!(tree.node_by_path(0, "b.b2"), Ok(6));
        assert!(tree.node_by_path(0, "b.zz").is_err());
    }

    #[test]
    fn targets_resolve_relative_to_parent() {
        let tree = sample();

        assert_eq!(tree.resolve_target(2, "a2"), Ok(3));
        assert_eq!(tree.resolve_target(1, ".a2"), Ok(3));
        assert_eq!(tree.resolve_target(2, "#m.b.b2"), Ok(6));
        assert!(tree.resolve_target(0, "a").is_err());
    }

    #[test]
    fn descendants_and_ancestors() {
        let tree = sample();

        assert!(tree.is_descendant(2, 0));
        assert!(!tree.is_descendant(1, 1));
        assert_eq!(tree.proper_ancestors(2, None), vec![1, 0]);
        assert_eq!(tree.proper_ancestors(2, Some(0)), vec![1]);
    }

    #[test]
    fn initial_configuration_covers_all_regions() {
        let tree = sample();
        let nodes = tree.complete(tree.initial_nodes(0));

        assert_eq!(nodes, BTreeSet::from([0, 1, 2, 4, 5]));
        assert_eq!(
            serde_json::to_value(tree.state_value(&nodes)).unwrap(),
            json!({"a": "a1", "b": "b1"})
        );
    }

    #[test]
    fn value_round_trips_through_nodes() {
        let tree = sample();
        let value: StateValue = serde_json::from_value(json!({"a": "a2", "b": "b2"})).unwrap();
        let nodes = tree.nodes_from_value(&value).unwrap();

        assert_eq!(tree.state_value(&nodes), value);
    }

    #[test]
    fn partial_values_are_completed() {
        let tree = sample();
        let value: StateValue = serde_json::from_value(json!({"a": "a2"})).unwrap();
        let nodes = tree.nodes_from_value(&value).unwrap();

        assert!(nodes.contains(&5));
    }

    #[test]
    fn unknown_state_value_is_rejected() {
        let tree = sample();
        let value: StateValue = serde_json::from_value(json!({"a": "nope"})).unwrap();

        assert_eq!(
            tree.nodes_from_value(&value),
            Err("State 'nope' does not exist on 'm.a'".to_string())
        );
    }

    #[test]
    fn sibling_states_cannot_both_be_restored() {
        let tree = sample();
        let value: StateValue =
            serde_json::from_value(json!({"a": {"a1": {}, "a2": {}}})).unwrap();

        assert_eq!(
            tree.nodes_from_value(&value),
            Err("States a1, a2 of 'm.a' cannot be active together".to_string())
        );
    }

    #[test]
    fn parallel_final_requires_every_region() {
        let tree = sample();
        let mut nodes = tree
            .nodes_from_value(&serde_json::from_value(json!({"a": "a1", "b": "b2"})).unwrap())
            .unwrap();

        assert!(tree.is_in_final_state(&nodes, 4));
        assert!(!tree.is_in_final_state(&nodes, 0));

        nodes.remove(&6);
        assert!(!tree.is_in_final_state(&nodes, 4));
    }
}
