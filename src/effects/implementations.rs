//! Named implementations referenced by machine definitions.

use super::action::{Action, Mapper};
use crate::actor::{logic_ref, ActorLogic, LogicRef};
use crate::core::{Event, Guard};
use std::collections::HashMap;
use std::sync::Arc;

/// Actions, guards, delays and actor logic looked up by key.
///
/// Lookups are exact; a missing key is a `MissingImplementation` error at
/// the point of use.
pub struct Implementations<C> {
    pub(crate) actions: HashMap<String, Action<C>>,
    pub(crate) guards: HashMap<String, Guard<C>>,
    pub(crate) delays: HashMap<String, Mapper<C, u64>>,
    pub(crate) actors: HashMap<String, LogicRef>,
}

impl<C: 'static> Implementations<C> {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
            guards: HashMap::new(),
            delays: HashMap::new(),
            actors: HashMap::new(),
        }
    }

    pub fn action(mut self, name: impl Into<String>, action: Action<C>) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    pub fn guard(mut self, name: impl Into<String>, guard: Guard<C>) -> Self {
        self.guards.insert(name.into(), guard);
        self
    }

    /// A fixed named delay.
    pub fn delay(mut self, name: impl Into<String>, ms: u64) -> Self {
        self.delays.insert(name.into(), Arc::new(move |_: &C, _: &Event| ms));
        self
    }

    /// A named delay computed when the event is scheduled.
    pub fn delay_with<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&C, &Event) -> u64 + Send + Sync + 'static,
    {
        self.delays.insert(name.into(), Arc::new(f));
        self
    }

    pub fn actor<L: ActorLogic>(mut self, src: impl Into<String>, logic: L) -> Self {
        self.actors.insert(src.into(), logic_ref(logic));
        self
    }

    pub(crate) fn actor_ref(mut self, src: impl Into<String>, logic: LogicRef) -> Self {
        self.actors.insert(src.into(), logic);
        self
    }

    /// `self` with every entry of `other` added, `other` winning on clashes.
    pub fn merge(mut self, other: Implementations<C>) -> Self {
        self.actions.extend(other.actions);
        self.guards.extend(other.guards);
        self.delays.extend(other.delays);
        self.actors.extend(other.actors);
        self
    }
}

impl<C: 'static> Default for Implementations<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Clone for Implementations<C> {
    fn clone(&self) -> Self {
        Self {
            actions: self.actions.clone(),
            guards: self.guards.clone(),
            delays: self.delays.clone(),
            actors: self.actors.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::empty_logic;

    #[test]
    fn merge_prefers_the_newer_entry() {
        let base = Implementations::<()>::new()
            .delay("short", 10)
            .guard("ready", Guard::new(|_, _| false));
        let overrides = Implementations::new().delay("short", 5);

        let merged = base.merge(overrides);

        assert_eq!((merged.delays["short"])(&(), &Event::new("x")), 5);
        assert!(merged.guards.contains_key("ready"));
    }

    #[test]
    fn actors_are_registered_by_src() {
        let implementations = Implementations::<()>::new().actor("noop", empty_logic());

        assert!(implementations.actors.contains_key("noop"));
    }
}
