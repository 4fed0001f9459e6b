//! State node configuration.

use super::transition::{InvokeConfig, TransitionConfig};
use crate::core::{Event, HistoryKind};
use crate::effects::{Action, DelayRef, Mapper};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StateType {
    /// Compound when it has children, atomic otherwise.
    Normal,
    Parallel,
    Final,
    History(HistoryKind),
}

/// Configuration of one state and, recursively, its children.
///
/// ```rust
/// use statecraft::builder::StateConfig;
///
/// let editing: StateConfig<()> = StateConfig::new()
///     .initial("draft")
///     .state("draft", StateConfig::new().on("REVIEW", "review"))
///     .state("review", StateConfig::new().on("APPROVE", "#doc.published"))
///     .tag("editable");
/// ```
pub struct StateConfig<C> {
    pub(crate) kind: StateType,
    pub(crate) id: Option<String>,
    pub(crate) initial: Option<String>,
    pub(crate) initial_actions: Vec<Action<C>>,
    pub(crate) states: Vec<(String, StateConfig<C>)>,
    pub(crate) on: Vec<(String, TransitionConfig<C>)>,
    pub(crate) always: Vec<TransitionConfig<C>>,
    pub(crate) after: Vec<(DelayRef, TransitionConfig<C>)>,
    pub(crate) on_done: Vec<TransitionConfig<C>>,
    pub(crate) entry: Vec<Action<C>>,
    pub(crate) exit: Vec<Action<C>>,
    pub(crate) invoke: Vec<InvokeConfig<C>>,
    pub(crate) tags: Vec<String>,
    pub(crate) meta: Option<Value>,
    pub(crate) description: Option<String>,
    pub(crate) output: Option<Mapper<C, Value>>,
    pub(crate) history_target: Option<String>,
}

impl<C: 'static> StateConfig<C> {
    pub fn new() -> Self {
        Self::of(StateType::Normal)
    }

    /// A state whose children are all active at once.
    pub fn parallel() -> Self {
        Self::of(StateType::Parallel)
    }

    /// A final state; entering it completes its parent.
    pub fn final_state() -> Self {
        Self::of(StateType::Final)
    }

    /// A pseudo-state that re-enters the last active child of its parent.
    pub fn history(kind: HistoryKind) -> Self {
        Self::of(StateType::History(kind))
    }

    fn of(kind: StateType) -> Self {
        Self {
            kind,
            id: None,
            initial: None,
            initial_actions: Vec::new(),
            states: Vec::new(),
            on: Vec::new(),
            always: Vec::new(),
            after: Vec::new(),
            on_done: Vec::new(),
            entry: Vec::new(),
            exit: Vec::new(),
            invoke: Vec::new(),
            tags: Vec::new(),
            meta: None,
            description: None,
            output: None,
            history_target: None,
        }
    }

    /// Explicit id, addressable as `#id` from any transition.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn initial(mut self, key: impl Into<String>) -> Self {
        self.initial = Some(key.into());
        self
    }

    /// Action run when the state is entered through its initial child.
    pub fn initial_action(mut self, action: impl Into<Action<C>>) -> Self {
        self.initial_actions.push(action.into());
        self
    }

    pub fn state(mut self, key: impl Into<String>, state: StateConfig<C>) -> Self {
        self.states.push((key.into(), state));
        self
    }

    /// Handle `event`; repeated calls for one event are tried in order.
    pub fn on(mut self, event: impl Into<String>, transition: impl Into<TransitionConfig<C>>) -> Self {
        self.on.push((event.into(), transition.into()));
        self
    }

    /// An eventless transition, taken as soon as its guard passes.
    pub fn always(mut self, transition: impl Into<TransitionConfig<C>>) -> Self {
        self.always.push(transition.into());
        self
    }

    /// A transition taken after the state has been active for `delay`.
    pub fn after(
        mut self,
        delay: impl Into<DelayRef>,
        transition: impl Into<TransitionConfig<C>>,
    ) -> Self {
        self.after.push((delay.into(), transition.into()));
        self
    }

    /// Taken when a final child of this state is entered.
    pub fn on_done(mut self, transition: impl Into<TransitionConfig<C>>) -> Self {
        self.on_done.push(transition.into());
        self
    }

    pub fn entry(mut self, action: impl Into<Action<C>>) -> Self {
        self.entry.push(action.into());
        self
    }

    pub fn exit(mut self, action: impl Into<Action<C>>) -> Self {
        self.exit.push(action.into());
        self
    }

    pub fn invoke(mut self, invoke: InvokeConfig<C>) -> Self {
        self.invoke.push(invoke);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Output of a final state, carried by the parent's done event.
    pub fn output<F>(mut self, output: F) -> Self
    where
        F: Fn(&C, &Event) -> Value + Send + Sync + 'static,
    {
        self.output = Some(Arc::new(output));
        self
    }

    /// Default target of a history state with nothing recorded.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.history_target = Some(target.into());
        self
    }
}

impl<C: 'static> Default for StateConfig<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_events_keep_definition_order() {
        let state = StateConfig::<()>::new()
            .on("GO", TransitionConfig::to("a"))
            .on("GO", TransitionConfig::to("b"));

        let targets: Vec<&str> = state
            .on
            .iter()
            .map(|(_, transition)| transition.targets()[0].as_str())
            .collect();
        assert_eq!(targets, ["a", "b"]);
    }

    #[test]
    fn constructors_set_the_state_type() {
        assert_eq!(StateConfig::<()>::parallel().kind, StateType::Parallel);
        assert_eq!(StateConfig::<()>::final_state().kind, StateType::Final);
        assert_eq!(
            StateConfig::<()>::history(HistoryKind::Deep).kind,
            StateType::History(HistoryKind::Deep)
        );
    }
}
