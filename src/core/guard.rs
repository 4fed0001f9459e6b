//! Guard predicates for controlling transitions.
//!
//! Guards are pure functions of the context and the triggering event. They
//! are evaluated in definition order during transition selection; the first
//! transition whose guard passes is taken.

use super::event::Event;
use super::node::NodeId;
use super::state_value::StateValue;
use super::tree::StateTree;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Arguments handed to a guard predicate.
pub struct GuardArgs<'a, C> {
    pub context: &'a C,
    pub event: &'a Event,
    /// Parameters supplied where a named guard is referenced.
    pub params: Option<&'a Value>,
}

type Predicate<C> = Arc<dyn Fn(&GuardArgs<'_, C>) -> Result<bool, String> + Send + Sync>;

/// Pure predicate that determines if a transition can be taken.
///
/// # Example
///
/// ```rust
/// use statecraft::core::{Event, Guard};
///
/// #[derive(Clone)]
/// struct Account {
///     balance: i64,
/// }
///
/// let has_funds = Guard::new(|account: &Account, event: &Event| {
///     let amount = event.get("amount").and_then(|v| v.as_i64()).unwrap_or(0);
///     account.balance >= amount
/// });
///
/// let event = Event::new("WITHDRAW").with("amount", 50);
/// assert_eq!(has_funds.check(&Account { balance: 100 }, &event), Ok(true));
/// assert_eq!(has_funds.check(&Account { balance: 10 }, &event), Ok(false));
/// ```
pub enum Guard<C> {
    Predicate(Predicate<C>),
    /// Reference to a guard registered under a name, with optional params.
    Named {
        name: String,
        params: Option<Value>,
    },
    Not(Box<Guard<C>>),
    And(Vec<Guard<C>>),
    Or(Vec<Guard<C>>),
    /// Passes while the given state (`"a.b"` or `"#id"`) is active.
    StateIn(String),
}

impl<C: 'static> Guard<C> {
    /// Create a guard from a pure predicate.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&C, &Event) -> bool + Send + Sync + 'static,
    {
        Guard::Predicate(Arc::new(move |args: &GuardArgs<'_, C>| {
            Ok(predicate(args.context, args.event))
        }))
    }

    /// Create a guard that receives the params of the referencing transition.
    pub fn with_params<F>(predicate: F) -> Self
    where
        F: Fn(&GuardArgs<'_, C>) -> bool + Send + Sync + 'static,
    {
        Guard::Predicate(Arc::new(move |args: &GuardArgs<'_, C>| Ok(predicate(args))))
    }

    /// Create a guard that can fail. A failing guard aborts the step.
    pub fn fallible<F>(predicate: F) -> Self
    where
        F: Fn(&C, &Event) -> Result<bool, String> + Send + Sync + 'static,
    {
        Guard::Predicate(Arc::new(move |args: &GuardArgs<'_, C>| {
            predicate(args.context, args.event)
        }))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Guard::Named {
            name: name.into(),
            params: None,
        }
    }

    pub fn named_with(name: impl Into<String>, params: Value) -> Self {
        Guard::Named {
            name: name.into(),
            params: Some(params),
        }
    }

    pub fn not(guard: Guard<C>) -> Self {
        Guard::Not(Box::new(guard))
    }

    pub fn and(guards: Vec<Guard<C>>) -> Self {
        Guard::And(guards)
    }

    pub fn or(guards: Vec<Guard<C>>) -> Self {
        Guard::Or(guards)
    }

    pub fn state_in(state: impl Into<String>) -> Self {
        Guard::StateIn(state.into())
    }

    /// Evaluate a self-contained guard.
    ///
    /// Named and `state_in` guards need a running machine and report an error here.
    pub fn check(&self, context: &C, event: &Event) -> Result<bool, String> {
        match self {
            Guard::Predicate(predicate) => predicate(&GuardArgs {
                context,
                event,
                params: None,
            }),
            Guard::Not(inner) => inner.check(context, event).map(|passed| !passed),
            Guard::And(guards) => {
                for guard in guards {
                    if !guard.check(context, event)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Guard::Or(guards) => {
                for guard in guards {
                    if guard.check(context, event)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Guard::Named { name, .. } => Err(format!("guard '{name}' is not resolvable here")),
            Guard::StateIn(state) => Err(format!("stateIn('{state}') needs a machine snapshot")),
        }
    }

    /// Name used in diagnostics.
    pub fn name(&self) -> String {
        match self {
            Guard::Predicate(_) => "inline".to_string(),
            Guard::Named { name, .. } => name.clone(),
            Guard::Not(_) => "not".to_string(),
            Guard::And(_) => "and".to_string(),
            Guard::Or(_) => "or".to_string(),
            Guard::StateIn(state) => format!("stateIn({state})"),
        }
    }

    pub(crate) fn evaluate(
        &self,
        context: &C,
        event: &Event,
        scope: &GuardScope<'_, C>,
    ) -> Result<bool, String> {
        self.evaluate_with(context, event, None, scope)
    }

    fn evaluate_with(
        &self,
        context: &C,
        event: &Event,
        params: Option<&Value>,
        scope: &GuardScope<'_, C>,
    ) -> Result<bool, String> {
        match self {
            Guard::Predicate(predicate) => predicate(&GuardArgs {
                context,
                event,
                params,
            }),
            Guard::Named { name, params } => {
                let guard = scope
                    .registry
                    .get(name)
                    .ok_or_else(|| format!("Guard '{name}' is not implemented"))?;
                guard.evaluate_with(context, event, params.as_ref(), scope)
            }
            Guard::Not(inner) => inner
                .evaluate_with(context, event, params, scope)
                .map(|passed| !passed),
            Guard::And(guards) => {
                for guard in guards {
                    if !guard.evaluate_with(context, event, params, scope)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Guard::Or(guards) => {
                for guard in guards {
                    if guard.evaluate_with(context, event, params, scope)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Guard::StateIn(state) => Ok(scope.is_in(state)),
        }
    }
}

impl<C> Clone for Guard<C> {
    fn clone(&self) -> Self {
        match self {
            Guard::Predicate(predicate) => Guard::Predicate(Arc::clone(predicate)),
            Guard::Named { name, params } => Guard::Named {
                name: name.clone(),
                params: params.clone(),
            },
            Guard::Not(inner) => Guard::Not(inner.clone()),
            Guard::And(guards) => Guard::And(guards.clone()),
            Guard::Or(guards) => Guard::Or(guards.clone()),
            Guard::StateIn(state) => Guard::StateIn(state.clone()),
        }
    }
}

impl<C: 'static> fmt::Debug for Guard<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guard({})", self.name())
    }
}

impl<C: 'static> From<&str> for Guard<C> {
    fn from(name: &str) -> Self {
        Guard::named(name)
    }
}

/// Everything a guard may consult besides context and event.
pub(crate) struct GuardScope<'a, C> {
    pub registry: &'a HashMap<String, Guard<C>>,
    pub tree: &'a StateTree<C>,
    pub nodes: &'a BTreeSet<NodeId>,
    pub value: &'a StateValue,
}

impl<C> GuardScope<'_, C> {
    fn is_in(&self, state: &str) -> bool {
        if state.starts_with('#') {
            return self
                .tree
                .node_by_id(state)
                .is_some_and(|node| self.nodes.contains(&node));
        }
        self.value.matches(&StateValue::from(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Counter {
        count: i32,
    }

    fn ping() -> Event {
        Event::new("PING")
    }

    #[test]
    fn guard_allows_matching_context() {
        let guard = Guard::new(|c: &Counter, _: &Event| c.count > 0);

        assert_eq!(guard.check(&Counter { count: 1 }, &ping()), Ok(true));
        assert_eq!(guard.check(&Counter { count: 0 }, &ping()), Ok(false));
    }

    #[test]
    fn guard_is_deterministic() {
        let guard = Guard::new(|c: &Counter, _: &Event| c.count % 2 == 0);
        let context = Counter { count: 4 };

        assert_eq!(guard.check(&context, &ping()), guard.check(&context, &ping()));
    }

    #[test]
    fn combinators_compose() {
        let positive = Guard::new(|c: &Counter, _: &Event| c.count > 0);
        let small = Guard::new(|c: &Counter, _: &Event| c.count < 10);
        let both = Guard::and(vec![positive.clone(), small.clone()]);
        let neither = Guard::not(Guard::or(vec![positive, small]));

        assert_eq!(both.check(&Counter { count: 5 }, &ping()), Ok(true));
        assert_eq!(both.check(&Counter { count: 50 }, &ping()), Ok(false));
        assert_eq!(neither.check(&Counter { count: 5 }, &ping()), Ok(false));
    }

    #[test]
    fn fallible_guard_reports_errors() {
        let guard = Guard::fallible(|_: &Counter, _: &Event| Err("no data".to_string()));

        assert_eq!(
            guard.check(&Counter { count: 0 }, &ping()),
            Err("no data".to_string())
        );
    }

    #[test]
    fn named_guards_need_a_registry() {
        let guard: Guard<Counter> = Guard::named("isReady");

        assert!(guard.check(&Counter { count: 0 }, &ping()).is_err());
        assert_eq!(guard.name(), "isReady");
    }
}
