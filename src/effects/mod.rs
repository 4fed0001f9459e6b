//! The imperative shell around the pure statechart core.
//!
//! This module turns selected transitions into snapshots and effects:
//!
//! - **Actions**: data describing context updates, raised and sent events,
//!   timers, child actors and custom side effects
//! - **Engine**: microstep and macrostep execution with rollback on failure
//! - **Machine**: the [`ActorLogic`](crate::actor::ActorLogic) of statecharts,
//!   plus pure helpers for computing snapshots without an actor
//!
//! Context updates apply as the engine walks a microstep. Everything that
//! reaches outside the machine is queued on the actor scope and only runs
//! once the resulting snapshot is committed.

mod action;
mod engine;
mod error;
mod implementations;
mod machine;

pub use action::{Action, ActionArgs, DelayRef, EventSource, Mapper, SendTarget, SpawnDef};
pub use engine::Macrostep;
pub use error::MachineError;
pub use implementations::Implementations;
pub use machine::Machine;

pub(crate) use machine::ContextFactory;
