//! Transition and invocation configuration.

use crate::actor::{logic_ref, ActorLogic, LogicRef};
use crate::core::{Event, Guard};
use crate::effects::{Action, Mapper};
use serde_json::Value;
use std::sync::Arc;

/// A transition as written in a machine definition.
///
/// Targets are unresolved strings (`"sibling"`, `".child"`, `"#id"`) until
/// the machine is built.
///
/// # Example
///
/// ```rust
/// use statecraft::builder::TransitionConfig;
/// use statecraft::core::Guard;
/// use statecraft::effects::Action;
///
/// let submit: TransitionConfig<u32> = TransitionConfig::to("submitting")
///     .guard(Guard::new(|attempts: &u32, _| *attempts < 3))
///     .action(Action::assign(|attempts: &u32, _| attempts + 1));
/// assert_eq!(submit.targets(), ["submitting"]);
/// ```
pub struct TransitionConfig<C> {
    pub(crate) targets: Vec<String>,
    pub(crate) guard: Option<Guard<C>>,
    pub(crate) actions: Vec<Action<C>>,
    pub(crate) reenter: bool,
}

impl<C: 'static> TransitionConfig<C> {
    /// A targetless transition: runs actions without leaving the state.
    pub fn new() -> Self {
        Self {
            targets: Vec::new(),
            guard: None,
            actions: Vec::new(),
            reenter: false,
        }
    }

    pub fn to(target: impl Into<String>) -> Self {
        Self::new().target(target)
    }

    /// Add a target; several targets enter several parallel regions.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    pub fn guard(mut self, guard: impl Into<Guard<C>>) -> Self {
        self.guard = Some(guard.into());
        self
    }

    pub fn action(mut self, action: impl Into<Action<C>>) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn actions(mut self, actions: impl IntoIterator<Item = Action<C>>) -> Self {
        self.actions.extend(actions);
        self
    }

    /// Exit and re-enter the source even when the target is inside it.
    pub fn reenter(mut self) -> Self {
        self.reenter = true;
        self
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }
}

impl<C: 'static> Default for TransitionConfig<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: 'static> From<&str> for TransitionConfig<C> {
    fn from(target: &str) -> Self {
        Self::to(target)
    }
}

impl<C: 'static> From<String> for TransitionConfig<C> {
    fn from(target: String) -> Self {
        Self::to(target)
    }
}

pub(crate) enum InvokeSource {
    Named(String),
    Inline(LogicRef),
}

/// An actor invoked while its state is active.
///
/// The source is either the key of registered actor logic or inline logic.
/// Inline logic is registered under `xstate.invoke.<id>` when the machine is
/// built, so it can be recreated when a snapshot is restored.
pub struct InvokeConfig<C> {
    pub(crate) src: InvokeSource,
    pub(crate) id: Option<String>,
    pub(crate) system_id: Option<String>,
    pub(crate) input: Option<Mapper<C, Value>>,
    pub(crate) on_done: Vec<TransitionConfig<C>>,
    pub(crate) on_error: Vec<TransitionConfig<C>>,
    pub(crate) on_snapshot: Vec<TransitionConfig<C>>,
}

impl<C: 'static> InvokeConfig<C> {
    /// Invoke the actor logic registered under `src`.
    pub fn new(src: impl Into<String>) -> Self {
        Self::with_source(InvokeSource::Named(src.into()))
    }

    /// Invoke `logic` directly.
    pub fn logic<L: ActorLogic>(logic: L) -> Self {
        Self::with_source(InvokeSource::Inline(logic_ref(logic)))
    }

    fn with_source(src: InvokeSource) -> Self {
        Self {
            src,
            id: None,
            system_id: None,
            input: None,
            on_done: Vec::new(),
            on_error: Vec::new(),
            on_snapshot: Vec::new(),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }

    pub fn input<F>(mut self, input: F) -> Self
    where
        F: Fn(&C, &Event) -> Value + Send + Sync + 'static,
    {
        self.input = Some(Arc::new(input));
        self
    }

    pub fn on_done(mut self, transition: impl Into<TransitionConfig<C>>) -> Self {
        self.on_done.push(transition.into());
        self
    }

    pub fn on_error(mut self, transition: impl Into<TransitionConfig<C>>) -> Self {
        self.on_error.push(transition.into());
        self
    }

    /// React to every snapshot of the invoked actor; turns on snapshot syncing.
    pub fn on_snapshot(mut self, transition: impl Into<TransitionConfig<C>>) -> Self {
        self.on_snapshot.push(transition.into());
        self
    }
}
