//! The actor runtime.
//!
//! Actors wrap an [`ActorLogic`] with a mailbox, a lifecycle and observers.
//! Every actor belongs to an [`ActorSystem`] shared with its root, which
//! owns the registry, the delayed-event scheduler and inspection listeners.
//!
//! The runtime is the imperative shell around the pure machine core: logic
//! computes snapshots and queues effects, and the runtime commits snapshots,
//! runs queued effects in order and notifies observers.

mod clock;
mod error;
mod logger;
mod logic;
mod mailbox;
mod observer;
mod runtime;
mod scheduler;
mod signal;
mod system;
mod waiting;

pub use clock::{Clock, SimulatedClock, SystemClock, TimerCallback, TimerHandle};
pub use error::ActorError;
pub use logger::{Logger, TracingLogger};
pub use logic::{logic_ref, ActorLogic, ActorScope, ActorSnapshot, ErasedLogic, LogicRef};
pub use observer::{Observer, ObserverFns, Subscription};
pub use runtime::{Actor, ActorOptions, ActorRef, ActorStatus, WeakActorRef};
pub use signal::{AbortController, AbortSignal, CancellationSignal, ListenerId};
pub use system::{ActorSystem, InspectionEvent};
pub use waiting::{to_promise, wait_for, WaitError, WaitOptions};

pub(crate) use logic::ProcessingStatus;
