//! Machine actions.
//!
//! Actions are data: the engine resolves them against the working snapshot
//! during a microstep. Context updates apply immediately; everything that
//! touches other actors or timers is queued on the actor scope and runs once
//! the snapshot is committed.

use crate::actor::{ActorRef, ActorSystem};
use crate::core::{Event, InvokeDef};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Value computed from context and event.
pub type Mapper<C, T> = Arc<dyn Fn(&C, &Event) -> T + Send + Sync>;

pub(crate) type Updater<C> =
    Arc<dyn Fn(&C, &Event, Option<&Value>) -> Result<C, String> + Send + Sync>;

pub(crate) type Effect<C> = Arc<dyn Fn(&ActionArgs<C>) -> Result<(), String> + Send + Sync>;

pub(crate) type Enqueuer<C> = Arc<dyn Fn(&C, &Event) -> Vec<Action<C>> + Send + Sync>;

/// What a custom action receives.
#[derive(Clone)]
pub struct ActionArgs<C> {
    pub context: C,
    pub event: Event,
    pub params: Option<Value>,
    pub self_ref: Option<ActorRef>,
    pub system: ActorSystem,
}

/// Event produced by `raise`, `send_to` and `emit`.
pub enum EventSource<C> {
    Static(Event),
    Dynamic(Mapper<C, Event>),
    /// The event being processed.
    Current,
}

impl<C> EventSource<C> {
    pub(crate) fn resolve(&self, context: &C, event: &Event) -> Event {
        match self {
            EventSource::Static(static_event) => static_event.clone(),
            EventSource::Dynamic(mapper) => mapper(context, event),
            EventSource::Current => event.clone(),
        }
    }
}

impl<C> Clone for EventSource<C> {
    fn clone(&self) -> Self {
        match self {
            EventSource::Static(event) => EventSource::Static(event.clone()),
            EventSource::Dynamic(mapper) => EventSource::Dynamic(Arc::clone(mapper)),
            EventSource::Current => EventSource::Current,
        }
    }
}

/// Recipient of `send_to`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendTarget {
    Parent,
    SelfRef,
    /// A child of the sending machine, by id.
    Child(String),
    /// Any actor in the system, by system id.
    System(String),
}

impl From<&str> for SendTarget {
    fn from(child: &str) -> Self {
        SendTarget::Child(child.to_string())
    }
}

/// A delay in milliseconds, or the key of a named delay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DelayRef {
    Millis(u64),
    Named(String),
}

impl From<u64> for DelayRef {
    fn from(ms: u64) -> Self {
        DelayRef::Millis(ms)
    }
}

impl From<&str> for DelayRef {
    fn from(name: &str) -> Self {
        DelayRef::Named(name.to_string())
    }
}

impl fmt::Display for DelayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelayRef::Millis(ms) => write!(f, "{ms}"),
            DelayRef::Named(name) => f.write_str(name),
        }
    }
}

/// A child actor to create, from an invoke definition or `spawn_child`.
pub struct SpawnDef<C> {
    /// Key of the logic in the machine's actor implementations.
    pub src: String,
    pub id: Option<String>,
    pub system_id: Option<String>,
    pub input: Option<Mapper<C, Value>>,
    pub sync_snapshot: bool,
}

impl<C> SpawnDef<C> {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            id: None,
            system_id: None,
            input: None,
            sync_snapshot: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }

    pub fn with_input<F>(mut self, input: F) -> Self
    where
        F: Fn(&C, &Event) -> Value + Send + Sync + 'static,
    {
        self.input = Some(Arc::new(input));
        self
    }

    pub fn sync_snapshot(mut self) -> Self {
        self.sync_snapshot = true;
        self
    }
}

impl<C> From<&InvokeDef<C>> for SpawnDef<C> {
    fn from(invoke: &InvokeDef<C>) -> Self {
        Self {
            src: invoke.src.clone(),
            id: Some(invoke.id.clone()),
            system_id: invoke.system_id.clone(),
            input: invoke.input.clone(),
            sync_snapshot: invoke.sync_snapshot,
        }
    }
}

impl<C> Clone for SpawnDef<C> {
    fn clone(&self) -> Self {
        Self {
            src: self.src.clone(),
            id: self.id.clone(),
            system_id: self.system_id.clone(),
            input: self.input.clone(),
            sync_snapshot: self.sync_snapshot,
        }
    }
}

/// An action run on entry, exit or during a transition.
///
/// # Example
///
/// ```rust
/// use statecraft::effects::Action;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Counter {
///     count: u32,
/// }
///
/// let increment: Action<Counter> = Action::assign(|ctx: &Counter, _| Counter {
///     count: ctx.count + 1,
/// });
/// let notify: Action<Counter> = Action::send_parent("INCREMENTED");
/// let later: Action<Counter> = Action::raise("TICK").delayed(500u64).with_id("tick");
///
/// assert_eq!(increment.name(), "xstate.assign");
/// assert_eq!(notify.name(), "xstate.sendTo");
/// assert_eq!(later.name(), "xstate.raise");
/// ```
pub enum Action<C> {
    Assign(Updater<C>),
    Raise {
        event: EventSource<C>,
        delay: Option<DelayRef>,
        id: Option<String>,
    },
    SendTo {
        target: SendTarget,
        event: EventSource<C>,
        delay: Option<DelayRef>,
        id: Option<String>,
    },
    Cancel(String),
    SpawnChild(SpawnDef<C>),
    StopChild(String),
    Log {
        label: Option<String>,
        value: Mapper<C, Value>,
    },
    Emit(EventSource<C>),
    Custom {
        name: String,
        f: Effect<C>,
    },
    /// Looked up in the machine's action implementations.
    Named {
        name: String,
        params: Option<Value>,
    },
    Enqueue(Enqueuer<C>),
}

impl<C: 'static> Action<C> {
    /// Replace the context with the result of `f`.
    pub fn assign<F>(f: F) -> Self
    where
        F: Fn(&C, &Event) -> C + Send + Sync + 'static,
    {
        Action::Assign(Arc::new(move |context, event, _| Ok(f(context, event))))
    }

    /// Like [`Action::assign`], with the params of a named action.
    pub fn assign_with<F>(f: F) -> Self
    where
        F: Fn(&C, &Event, Option<&Value>) -> C + Send + Sync + 'static,
    {
        Action::Assign(Arc::new(move |context, event, params| {
            Ok(f(context, event, params))
        }))
    }

    /// A context update that may fail; failure puts the actor in error.
    pub fn try_assign<F>(f: F) -> Self
    where
        F: Fn(&C, &Event) -> Result<C, String> + Send + Sync + 'static,
    {
        Action::Assign(Arc::new(move |context, event, _| f(context, event)))
    }

    /// Queue `event` on the machine itself, ahead of external events.
    pub fn raise(event: impl Into<Event>) -> Self {
        Action::Raise {
            event: EventSource::Static(event.into()),
            delay: None,
            id: None,
        }
    }

    pub fn raise_with<F>(f: F) -> Self
    where
        F: Fn(&C, &Event) -> Event + Send + Sync + 'static,
    {
        Action::Raise {
            event: EventSource::Dynamic(Arc::new(f)),
            delay: None,
            id: None,
        }
    }

    pub fn send_to(target: impl Into<SendTarget>, event: impl Into<Event>) -> Self {
        Action::SendTo {
            target: target.into(),
            event: EventSource::Static(event.into()),
            delay: None,
            id: None,
        }
    }

    pub fn send_to_with<F>(target: impl Into<SendTarget>, f: F) -> Self
    where
        F: Fn(&C, &Event) -> Event + Send + Sync + 'static,
    {
        Action::SendTo {
            target: target.into(),
            event: EventSource::Dynamic(Arc::new(f)),
            delay: None,
            id: None,
        }
    }

    pub fn send_parent(event: impl Into<Event>) -> Self {
        Self::send_to(SendTarget::Parent, event)
    }

    pub fn send_parent_with<F>(f: F) -> Self
    where
        F: Fn(&C, &Event) -> Event + Send + Sync + 'static,
    {
        Self::send_to_with(SendTarget::Parent, f)
    }

    /// Send the current event on to `target`.
    pub fn forward_to(target: impl Into<SendTarget>) -> Self {
        Action::SendTo {
            target: target.into(),
            event: EventSource::Current,
            delay: None,
            id: None,
        }
    }

    /// Cancel a delayed `raise`/`send_to` by its id.
    pub fn cancel(send_id: impl Into<String>) -> Self {
        Action::Cancel(send_id.into())
    }

    pub fn spawn_child(spawn: SpawnDef<C>) -> Self {
        Action::SpawnChild(spawn)
    }

    pub fn stop_child(id: impl Into<String>) -> Self {
        Action::StopChild(id.into())
    }

    pub fn log<F>(f: F) -> Self
    where
        F: Fn(&C, &Event) -> Value + Send + Sync + 'static,
    {
        Action::Log {
            label: None,
            value: Arc::new(f),
        }
    }

    pub fn log_labeled<F>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn(&C, &Event) -> Value + Send + Sync + 'static,
    {
        Action::Log {
            label: Some(label.into()),
            value: Arc::new(f),
        }
    }

    /// Deliver `event` to the actor's `on` listeners.
    pub fn emit(event: impl Into<Event>) -> Self {
        Action::Emit(EventSource::Static(event.into()))
    }

    pub fn emit_with<F>(f: F) -> Self
    where
        F: Fn(&C, &Event) -> Event + Send + Sync + 'static,
    {
        Action::Emit(EventSource::Dynamic(Arc::new(f)))
    }

    /// Arbitrary side effect.
    ///
    /// Runs in place while the actor is running, and after start when the
    /// actor has not started yet.
    pub fn custom<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ActionArgs<C>) + Send + Sync + 'static,
    {
        Action::Custom {
            name: name.into(),
            f: Arc::new(move |args| {
                f(args);
                Ok(())
            }),
        }
    }

    /// A side effect that may fail; failure puts the actor in error.
    pub fn fallible<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ActionArgs<C>) -> Result<(), String> + Send + Sync + 'static,
    {
        Action::Custom {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Action::Named {
            name: name.into(),
            params: None,
        }
    }

    pub fn named_with(name: impl Into<String>, params: Value) -> Self {
        Action::Named {
            name: name.into(),
            params: Some(params),
        }
    }

    /// Choose actions at run time from context and event.
    pub fn enqueue<F>(f: F) -> Self
    where
        F: Fn(&C, &Event) -> Vec<Action<C>> + Send + Sync + 'static,
    {
        Action::Enqueue(Arc::new(f))
    }

    /// Delay a `raise` or `send_to`. Other actions are returned unchanged.
    pub fn delayed(self, delay: impl Into<DelayRef>) -> Self {
        match self {
            Action::Raise { event, id, .. } => Action::Raise {
                event,
                delay: Some(delay.into()),
                id,
            },
            Action::SendTo {
                target, event, id, ..
            } => Action::SendTo {
                target,
                event,
                delay: Some(delay.into()),
                id,
            },
            other => other,
        }
    }

    /// Name a delayed `raise` or `send_to` so it can be cancelled.
    pub fn with_id(self, send_id: impl Into<String>) -> Self {
        match self {
            Action::Raise { event, delay, .. } => Action::Raise {
                event,
                delay,
                id: Some(send_id.into()),
            },
            Action::SendTo {
                target,
                event,
                delay,
                ..
            } => Action::SendTo {
                target,
                event,
                delay,
                id: Some(send_id.into()),
            },
            other => other,
        }
    }
}

impl<C> Action<C> {
    /// Type name used in inspection and error messages.
    pub fn name(&self) -> &str {
        match self {
            Action::Assign(_) => "xstate.assign",
            Action::Raise { .. } => "xstate.raise",
            Action::SendTo { .. } => "xstate.sendTo",
            Action::Cancel(_) => "xstate.cancel",
            Action::SpawnChild(_) => "xstate.spawnChild",
            Action::StopChild(_) => "xstate.stopChild",
            Action::Log { .. } => "xstate.log",
            Action::Emit(_) => "xstate.emit",
            Action::Custom { name, .. } => name,
            Action::Named { name, .. } => name,
            Action::Enqueue(_) => "xstate.enqueueActions",
        }
    }
}

impl<C> Clone for Action<C> {
    fn clone(&self) -> Self {
        match self {
            Action::Assign(f) => Action::Assign(Arc::clone(f)),
            Action::Raise { event, delay, id } => Action::Raise {
                event: event.clone(),
                delay: delay.clone(),
                id: id.clone(),
            },
            Action::SendTo {
                target,
                event,
                delay,
                id,
            } => Action::SendTo {
                target: target.clone(),
                event: event.clone(),
                delay: delay.clone(),
                id: id.clone(),
            },
            Action::Cancel(id) => Action::Cancel(id.clone()),
            Action::SpawnChild(spawn) => Action::SpawnChild(spawn.clone()),
            Action::StopChild(id) => Action::StopChild(id.clone()),
            Action::Log { label, value } => Action::Log {
                label: label.clone(),
                value: Arc::clone(value),
            },
            Action::Emit(event) => Action::Emit(event.clone()),
            Action::Custom { name, f } => Action::Custom {
                name: name.clone(),
                f: Arc::clone(f),
            },
            Action::Named { name, params } => Action::Named {
                name: name.clone(),
                params: params.clone(),
            },
            Action::Enqueue(f) => Action::Enqueue(Arc::clone(f)),
        }
    }
}

impl<C> fmt::Debug for Action<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action({})", self.name())
    }
}

impl<C: 'static> From<&str> for Action<C> {
    fn from(name: &str) -> Self {
        Action::named(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delay_and_id_apply_to_sends() {
        let action: Action<()> = Action::send_parent("PING").delayed(100u64).with_id("ping");

        match action {
            Action::SendTo {
                target, delay, id, ..
            } => {
                assert_eq!(target, SendTarget::Parent);
                assert_eq!(delay, Some(DelayRef::Millis(100)));
                assert_eq!(id.as_deref(), Some("ping"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn delay_leaves_other_actions_alone() {
        let action: Action<()> = Action::cancel("x").delayed("slow");

        assert!(matches!(action, Action::Cancel(id) if id == "x"));
    }

    #[test]
    fn event_sources_resolve() {
        let current = Event::new("NOW");
        let dynamic: EventSource<i32> =
            EventSource::Dynamic(Arc::new(|n: &i32, _: &Event| Event::new("N").with("n", *n)));

        assert_eq!(EventSource::<i32>::Current.resolve(&1, &current), current);
        assert_eq!(dynamic.resolve(&7, &current).get("n"), Some(&json!(7)));
    }

    #[test]
    fn strings_become_named_actions() {
        let action: Action<()> = "notify".into();

        assert_eq!(action.name(), "notify");
        assert!(matches!(action, Action::Named { params: None, .. }));
    }

    #[test]
    fn spawn_defs_copy_invoke_settings() {
        let invoke: InvokeDef<()> = InvokeDef {
            id: "fetch".into(),
            src: "fetcher".into(),
            system_id: Some("api".into()),
            input: None,
            sync_snapshot: true,
        };

        let spawn = SpawnDef::from(&invoke);

        assert_eq!(spawn.id.as_deref(), Some("fetch"));
        assert_eq!(spawn.src, "fetcher");
        assert!(spawn.sync_snapshot);
    }
}
