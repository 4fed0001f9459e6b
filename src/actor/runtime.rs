//! Actor runtime.
//!
//! An [`Actor`] owns a logic value, its latest snapshot and a mailbox. Events
//! are processed one at a time on the thread that delivers them; an event sent
//! while the actor is busy is queued and handled by the running drain.
//!
//! # Example
//!
//! ```rust
//! use statecraft::actor::{Actor, ActorOptions, ActorStatus};
//! use statecraft::logic::from_transition;
//! use statecraft::Event;
//!
//! let counter = from_transition(|count: &i64, event: &Event| match event.event_type.as_str() {
//!     "INC" => count + 1,
//!     _ => *count,
//! }, 0);
//!
//! let actor = Actor::new(counter, ActorOptions::default());
//! actor.start();
//! actor.send("INC");
//! actor.send("INC");
//!
//! assert_eq!(actor.snapshot().context, 2);
//! assert_eq!(actor.status(), ActorStatus::Active);
//! ```

use super::clock::{Clock, SystemClock};
use super::error::ActorError;
use super::logger::{Logger, TracingLogger};
use super::logic::{ActorLogic, ActorScope, ActorSnapshot, ProcessingStatus};
use super::mailbox::Mailbox;
use super::observer::{Observer, Subscription};
use super::system::{ActorSystem, InspectionEvent};
use crate::checkpoint::CheckpointError;
use crate::core::{Event, SnapshotStatus, STOP_EVENT, WILDCARD};
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Inspector = Arc<dyn Fn(&InspectionEvent) + Send + Sync>;
type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Options for creating an actor.
#[derive(Clone, Default)]
pub struct ActorOptions {
    pub id: Option<String>,
    pub system_id: Option<String>,
    pub input: Option<Value>,
    /// Clock used by a root actor's system. Defaults to [`SystemClock`].
    pub clock: Option<Arc<dyn Clock>>,
    /// Sink for `log` actions. Defaults to [`TracingLogger`].
    pub logger: Option<Arc<dyn Logger>>,
    pub inspect: Option<Inspector>,
    pub(crate) parent: Option<String>,
    pub(crate) system: Option<ActorSystem>,
    pub(crate) src: Option<String>,
    pub(crate) sync_snapshot: bool,
}

impl ActorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_inspect(mut self, inspect: impl Fn(&InspectionEvent) + Send + Sync + 'static) -> Self {
        self.inspect = Some(Arc::new(inspect));
        self
    }

    /// Options for a child created by the actor at `parent`.
    pub(crate) fn child(
        parent: &ActorScope,
        id: impl Into<String>,
        src: Option<String>,
        sync_snapshot: bool,
    ) -> Self {
        Self {
            id: Some(id.into()),
            parent: Some(parent.session_id.clone()),
            system: Some(parent.system.clone()),
            src,
            sync_snapshot,
            ..Self::default()
        }
    }
}

/// Externally visible lifecycle of an actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActorStatus {
    NotStarted,
    Active,
    Done,
    Error,
    Stopped,
}

struct ActorCell<L: ActorLogic> {
    logic: L,
    id: String,
    session_id: String,
    system_id: Option<String>,
    src: Option<String>,
    parent: Option<String>,
    sync_snapshot: bool,
    input: Option<Value>,
    system: ActorSystem,
    scope: ActorScope,
    snapshot: Mutex<L::Snapshot>,
    mailbox: Mailbox<Event>,
    observers: Mutex<Vec<(u64, Arc<dyn Observer<L::Snapshot>>)>>,
    listeners: Mutex<Vec<(u64, String, EventHandler)>>,
    next_key: AtomicU64,
}

impl<L: ActorLogic> ActorCell<L> {
    fn start(&self) {
        {
            let mut status = self.scope.shared.status.lock();
            if *status != ProcessingStatus::NotStarted {
                return;
            }
            *status = ProcessingStatus::Running;
        }
        let init = Event::init(self.input.clone());
        self.system.inspect_event(InspectionEvent::Event {
            source: self.parent.clone(),
            target: self.session_id.clone(),
            event: init.clone(),
        });

        let snapshot = self.snapshot.lock().clone();
        match snapshot.status() {
            SnapshotStatus::Done => {
                self.update(snapshot, &init);
                return;
            }
            SnapshotStatus::Error => {
                let error = snapshot
                    .error()
                    .cloned()
                    .unwrap_or_else(|| ActorError::new("actor failed before start"));
                self.error(error);
                return;
            }
            _ => {}
        }

        if self.parent.is_none() {
            self.system.start();
        }
        self.logic.start(&snapshot, &self.scope);
        let snapshot = self.snapshot.lock().clone();
        self.update(snapshot, &init);
        if self.mailbox.start() {
            self.drain();
        }
    }

    fn deliver(&self, event: Event) {
        if self.scope.processing() == ProcessingStatus::Stopped {
            tracing::warn!(
                actor = %self.id,
                event = %event.event_type,
                "event sent to stopped actor was dropped"
            );
            return;
        }
        if self.mailbox.enqueue(event) {
            self.drain();
        }
    }

    fn drain(&self) {
        while let Some(event) = self.mailbox.next() {
            self.process(event);
        }
    }

    fn process(&self, event: Event) {
        let current = self.snapshot.lock().clone();
        let next = self.logic.transition(&current, &event, &self.scope);
        self.update(next, &event);
        if event.event_type == STOP_EVENT {
            self.stop_procedure();
            self.complete();
        }
    }

    fn update(&self, snapshot: L::Snapshot, event: &Event) {
        *self.snapshot.lock() = snapshot;

        let mut failure = None;
        while let Some(deferred) = self.scope.pop_deferred() {
            if let Err(error) = deferred() {
                self.scope.clear_deferred();
                failure = Some(error);
                break;
            }
        }
        let snapshot = {
            let mut current = self.snapshot.lock();
            if let Some(error) = failure {
                *current = current.clone().failed(error);
            }
            current.clone()
        };

        match snapshot.status() {
            SnapshotStatus::Active => {
                self.notify(&snapshot);
                self.sync_to_parent(&snapshot);
            }
            SnapshotStatus::Done => {
                self.notify(&snapshot);
                self.stop_procedure();
                self.complete();
                self.send_parent(Event::done_actor(&self.id, snapshot.output().cloned()));
            }
            SnapshotStatus::Error => {
                let error = snapshot
                    .error()
                    .cloned()
                    .unwrap_or_else(|| ActorError::new("unknown actor error"));
                self.error(error);
            }
            SnapshotStatus::Stopped => {}
        }

        self.system.inspect_event(InspectionEvent::Snapshot {
            session_id: self.session_id.clone(),
            event: event.clone(),
            status: snapshot.status(),
        });
    }

    fn observers(&self) -> Vec<Arc<dyn Observer<L::Snapshot>>> {
        self.observers
            .lock()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    fn notify(&self, snapshot: &L::Snapshot) {
        for observer in self.observers() {
            observer.next(snapshot);
        }
    }

    fn complete(&self) {
        let observers = std::mem::take(&mut *self.observers.lock());
        for (_, observer) in observers {
            observer.complete();
        }
    }

    fn error(&self, error: ActorError) {
        self.stop_procedure();
        self.report_error(&error);
        self.send_parent(Event::error_actor(&self.id, &error));
    }

    fn report_error(&self, error: &ActorError) {
        let observers = std::mem::take(&mut *self.observers.lock());
        let handled = observers.iter().any(|(_, observer)| observer.handles_error());
        if !handled && self.parent.is_none() {
            self.system.report_unhandled(&self.id, error.clone());
        }
        for (_, observer) in observers {
            observer.error(error);
        }
    }

    fn sync_to_parent(&self, snapshot: &L::Snapshot) {
        if !self.sync_snapshot || self.parent.is_none() {
            return;
        }
        match self.logic.persisted_snapshot(snapshot) {
            Ok(persisted) => self.send_parent(Event::snapshot(&self.id, persisted)),
            Err(err) => tracing::warn!(actor = %self.id, error = %err, "snapshot could not be synced"),
        }
    }

    fn send_parent(&self, event: Event) {
        let Some(parent) = self.parent.as_deref() else {
            return;
        };
        if let Some(parent) = self.system.get_session(parent) {
            self.system.relay(Some(&self.session_id), &parent, event);
        }
    }

    fn stop_procedure(&self) {
        {
            let mut status = self.scope.shared.status.lock();
            if *status != ProcessingStatus::Running {
                return;
            }
            *status = ProcessingStatus::Stopped;
        }
        self.mailbox.close();
        self.system.cancel_all(&self.session_id);
        self.system
            .unregister(&self.session_id, self.system_id.as_deref());
    }

    fn stop_internal(&self) {
        let status = self.scope.processing();
        match status {
            ProcessingStatus::Stopped => {}
            ProcessingStatus::NotStarted => {
                *self.scope.shared.status.lock() = ProcessingStatus::Stopped;
                self.mailbox.close();
                self.system.cancel_all(&self.session_id);
                self.system
                    .unregister(&self.session_id, self.system_id.as_deref());
            }
            ProcessingStatus::Running => {
                self.mailbox.clear();
                if self.mailbox.enqueue(Event::stop()) {
                    self.drain();
                }
            }
        }
    }

    fn status(&self) -> ActorStatus {
        let processing = self.scope.processing();
        if processing == ProcessingStatus::NotStarted {
            return ActorStatus::NotStarted;
        }
        match self.snapshot.lock().status() {
            SnapshotStatus::Active if processing == ProcessingStatus::Stopped => {
                ActorStatus::Stopped
            }
            SnapshotStatus::Active => ActorStatus::Active,
            SnapshotStatus::Done => ActorStatus::Done,
            SnapshotStatus::Error => ActorStatus::Error,
            SnapshotStatus::Stopped => ActorStatus::Stopped,
        }
    }

    fn emit(&self, event: &Event) {
        let handlers: Vec<EventHandler> = self
            .listeners
            .lock()
            .iter()
            .filter(|(_, event_type, _)| event_type == &event.event_type || event_type == WILDCARD)
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}

/// Operations every actor supports regardless of its logic.
pub(crate) trait AnyActor: Send + Sync {
    fn id(&self) -> &str;
    fn session_id(&self) -> &str;
    fn system_id(&self) -> Option<&str>;
    fn src(&self) -> Option<&str>;
    fn parent_session(&self) -> Option<&str>;
    fn sync_snapshot(&self) -> bool;
    fn system(&self) -> &ActorSystem;
    fn deliver(&self, event: Event);
    fn start(&self);
    fn stop_internal(&self);
    fn processing(&self) -> ProcessingStatus;
    fn status(&self) -> ActorStatus;
    fn snapshot_status(&self) -> SnapshotStatus;
    fn persisted(&self) -> Result<Value, CheckpointError>;
    fn emit(&self, event: &Event);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<L: ActorLogic> AnyActor for ActorCell<L> {
    fn id(&self) -> &str {
        &self.id
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn system_id(&self) -> Option<&str> {
        self.system_id.as_deref()
    }

    fn src(&self) -> Option<&str> {
        self.src.as_deref()
    }

    fn parent_session(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    fn sync_snapshot(&self) -> bool {
        self.sync_snapshot
    }

    fn system(&self) -> &ActorSystem {
        &self.system
    }

    fn deliver(&self, event: Event) {
        ActorCell::deliver(self, event)
    }

    fn start(&self) {
        ActorCell::start(self)
    }

    fn stop_internal(&self) {
        ActorCell::stop_internal(self)
    }

    fn processing(&self) -> ProcessingStatus {
        self.scope.processing()
    }

    fn status(&self) -> ActorStatus {
        ActorCell::status(self)
    }

    fn snapshot_status(&self) -> SnapshotStatus {
        self.snapshot.lock().status()
    }

    fn persisted(&self) -> Result<Value, CheckpointError> {
        let snapshot = self.snapshot.lock().clone();
        self.logic.persisted_snapshot(&snapshot)
    }

    fn emit(&self, event: &Event) {
        ActorCell::emit(self, event)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Type-erased, clonable handle to an actor.
#[derive(Clone)]
pub struct ActorRef(Arc<dyn AnyActor>);

impl ActorRef {
    pub fn id(&self) -> &str {
        self.0.id()
    }

    pub fn session_id(&self) -> &str {
        self.0.session_id()
    }

    pub fn system_id(&self) -> Option<&str> {
        self.0.system_id()
    }

    /// Registry key of the logic this actor was created from, if any.
    pub fn src(&self) -> Option<&str> {
        self.0.src()
    }

    pub fn status(&self) -> ActorStatus {
        self.0.status()
    }

    pub fn send(&self, event: impl Into<Event>) {
        self.0.system().relay(None, self, event.into());
    }

    /// Stop a root actor. Children are stopped by their parent.
    pub fn stop(&self) {
        if self.0.parent_session().is_some() {
            tracing::warn!(actor = %self.id(), "stop ignored on a child actor");
            return;
        }
        self.0.stop_internal();
    }

    pub fn persisted_snapshot(&self) -> Result<Value, CheckpointError> {
        self.0.persisted()
    }

    /// Recover the typed handle, if this actor runs logic `L`.
    pub fn downcast<L: ActorLogic>(&self) -> Option<Actor<L>> {
        Arc::clone(&self.0)
            .into_any()
            .downcast::<ActorCell<L>>()
            .ok()
            .map(|cell| Actor { cell })
    }

    pub fn downgrade(&self) -> WeakActorRef {
        WeakActorRef(Arc::downgrade(&self.0))
    }

    pub(crate) fn sync_snapshot(&self) -> bool {
        self.0.sync_snapshot()
    }

    pub(crate) fn deliver(&self, event: Event) {
        self.0.deliver(event)
    }

    pub(crate) fn start(&self) {
        self.0.start()
    }

    pub(crate) fn stop_child(&self) {
        self.0.stop_internal()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.0.processing() == ProcessingStatus::Running
    }

    /// Status of the latest snapshot, regardless of whether the actor started.
    pub(crate) fn snapshot_status(&self) -> SnapshotStatus {
        self.0.snapshot_status()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.0.processing() == ProcessingStatus::Stopped
    }

    pub(crate) fn emit(&self, event: &Event) {
        self.0.emit(event)
    }
}

impl PartialEq for ActorRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("id", &self.id())
            .field("session_id", &self.session_id())
            .finish()
    }
}

/// Non-owning [`ActorRef`].
#[derive(Clone)]
pub struct WeakActorRef(Weak<dyn AnyActor>);

impl WeakActorRef {
    pub fn upgrade(&self) -> Option<ActorRef> {
        self.0.upgrade().map(ActorRef)
    }
}

/// Typed handle to a running logic.
pub struct Actor<L: ActorLogic> {
    cell: Arc<ActorCell<L>>,
}

impl<L: ActorLogic> Clone for Actor<L> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<L: ActorLogic> Actor<L> {
    /// Create an actor. It does nothing until [`Actor::start`].
    pub fn new(logic: L, options: ActorOptions) -> Self {
        let scope = Self::scope_for(&options);
        let snapshot = logic.initial_snapshot(&scope, options.input.clone());
        Self::assemble(logic, options, scope, snapshot)
    }

    /// Create an actor from a persisted snapshot.
    ///
    /// Entry actions are not replayed; children recorded in the snapshot
    /// are recreated and started along with the actor.
    pub fn restore(logic: L, persisted: Value, options: ActorOptions) -> Result<Self, CheckpointError> {
        let scope = Self::scope_for(&options);
        let snapshot = logic.restore_snapshot(persisted, &scope)?;
        Ok(Self::assemble(logic, options, scope, snapshot))
    }

    fn scope_for(options: &ActorOptions) -> ActorScope {
        let system = match &options.system {
            Some(system) => system.clone(),
            None => {
                let clock = options
                    .clock
                    .clone()
                    .unwrap_or_else(|| Arc::new(SystemClock::new()));
                let logger = options
                    .logger
                    .clone()
                    .unwrap_or_else(|| Arc::new(TracingLogger));
                let system = ActorSystem::new(clock, logger);
                if let Some(inspect) = &options.inspect {
                    system.add_inspector(Arc::clone(inspect));
                }
                system
            }
        };
        let session_id = system.book_session();
        let id = options.id.clone().unwrap_or_else(|| session_id.clone());
        ActorScope::new(id, session_id, options.parent.clone(), system)
    }

    fn assemble(logic: L, options: ActorOptions, scope: ActorScope, snapshot: L::Snapshot) -> Self {
        let system = scope.system.clone();
        let cell = Arc::new(ActorCell {
            logic,
            id: scope.id.clone(),
            session_id: scope.session_id.clone(),
            system_id: options.system_id,
            src: options.src,
            parent: options.parent,
            sync_snapshot: options.sync_snapshot,
            input: options.input,
            system: system.clone(),
            scope: scope.clone(),
            snapshot: Mutex::new(snapshot),
            mailbox: Mailbox::new(),
            observers: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            next_key: AtomicU64::new(0),
        });
        let actor = Self { cell };
        let weak = actor.actor_ref().downgrade();
        scope.bind(weak.clone());
        system.register(&scope.session_id, weak.clone());
        if let Some(system_id) = &actor.cell.system_id {
            if let Err(err) = system.set_system_id(system_id, weak) {
                tracing::warn!(actor = %scope.id, error = %err, "system id not registered");
            }
        }
        system.inspect_event(InspectionEvent::Actor {
            session_id: scope.session_id.clone(),
            id: scope.id.clone(),
        });
        actor
    }

    pub fn id(&self) -> &str {
        &self.cell.id
    }

    pub fn session_id(&self) -> &str {
        &self.cell.session_id
    }

    pub fn system(&self) -> &ActorSystem {
        &self.cell.system
    }

    pub fn logic(&self) -> &L {
        &self.cell.logic
    }

    /// Start processing. Calling it again does nothing.
    pub fn start(&self) -> &Self {
        self.cell.start();
        self
    }

    /// Stop the actor and every child it owns.
    ///
    /// Only root actors can be stopped this way; children are stopped by
    /// their parent and calls on them are ignored.
    pub fn stop(&self) -> &Self {
        if self.cell.parent.is_some() {
            tracing::warn!(actor = %self.cell.id, "stop ignored on a child actor");
            return self;
        }
        self.cell.stop_internal();
        self
    }

    pub fn send(&self, event: impl Into<Event>) {
        self.actor_ref().send(event);
    }

    /// The latest committed snapshot.
    pub fn snapshot(&self) -> L::Snapshot {
        self.cell.snapshot.lock().clone()
    }

    pub fn status(&self) -> ActorStatus {
        self.cell.status()
    }

    pub fn persisted_snapshot(&self) -> Result<Value, CheckpointError> {
        AnyActor::persisted(&*self.cell)
    }

    pub fn actor_ref(&self) -> ActorRef {
        ActorRef(Arc::clone(&self.cell) as Arc<dyn AnyActor>)
    }

    /// Observe snapshots.
    ///
    /// An observer added after the actor stopped is told so immediately and
    /// not retained.
    pub fn subscribe(&self, observer: impl Observer<L::Snapshot> + 'static) -> Subscription {
        let observer: Arc<dyn Observer<L::Snapshot>> = Arc::new(observer);
        if self.cell.scope.processing() != ProcessingStatus::Stopped {
            let key = self.cell.next_key.fetch_add(1, Ordering::Relaxed);
            self.cell.observers.lock().push((key, observer));
            let weak = Arc::downgrade(&self.cell);
            return Subscription::new(move || {
                if let Some(cell) = weak.upgrade() {
                    cell.observers.lock().retain(|(id, _)| *id != key);
                }
            });
        }
        let snapshot = self.snapshot();
        match (snapshot.status(), snapshot.error()) {
            (SnapshotStatus::Error, Some(error)) => observer.error(error),
            _ => observer.complete(),
        }
        Subscription::empty()
    }

    /// Listen to events emitted by the actor. `"*"` receives all of them.
    pub fn on(
        &self,
        event_type: impl Into<String>,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Subscription {
        let key = self.cell.next_key.fetch_add(1, Ordering::Relaxed);
        self.cell
            .listeners
            .lock()
            .push((key, event_type.into(), Arc::new(handler)));
        let weak = Arc::downgrade(&self.cell);
        Subscription::new(move || {
            if let Some(cell) = weak.upgrade() {
                cell.listeners.lock().retain(|(id, _, _)| *id != key);
            }
        })
    }
}

impl<L: ActorLogic> fmt::Debug for Actor<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("id", &self.cell.id)
            .field("session_id", &self.cell.session_id)
            .field("status", &self.status())
            .finish()
    }
}
