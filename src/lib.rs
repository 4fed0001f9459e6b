//! Statecraft: hierarchical state machines and actors
//!
//! Statecraft follows a "pure core, imperative shell" design. The statechart
//! core selects transitions and computes exit and entry sets with pure
//! functions over an immutable state tree, while the actor runtime commits
//! snapshots and runs the side effects those steps queue.
//!
//! # Core Concepts
//!
//! - **Machines**: statecharts with compound, parallel, final and history
//!   states, built with [`MachineBuilder`]
//! - **Actions**: context updates, raised and delayed events, child actors
//!   and custom effects, see [`Action`]
//! - **Actors**: running instances of any [`ActorLogic`](actor::ActorLogic),
//!   including promises, callbacks, streams and reducers from [`logic`]
//! - **Checkpoints**: persisted snapshots that restore without replaying
//!   entry actions
//!
//! # Example
//!
//! ```rust
//! use statecraft::{Action, Actor, ActorOptions, Event, MachineBuilder, StateConfig};
//!
//! let toggle = MachineBuilder::new("toggle")
//!     .context(0u32)
//!     .initial("inactive")
//!     .state("inactive", StateConfig::new().on("TOGGLE", "active"))
//!     .state(
//!         "active",
//!         StateConfig::new()
//!             .entry(Action::assign(|count: &u32, _: &Event| count + 1))
//!             .on("TOGGLE", "inactive"),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let actor = Actor::new(toggle, ActorOptions::default());
//! actor.start();
//! actor.send("TOGGLE");
//!
//! let snapshot = actor.snapshot();
//! assert!(snapshot.matches("active"));
//! assert_eq!(snapshot.context, 1);
//! ```

pub mod actor;
pub mod builder;
pub mod checkpoint;
pub mod core;
pub mod effects;
pub mod logic;

// Re-export commonly used types
pub use actor::{Actor, ActorError, ActorOptions, ActorRef, ActorStatus};
pub use builder::{BuildError, InvokeConfig, MachineBuilder, StateConfig, TransitionConfig};
pub use checkpoint::{Checkpoint, CheckpointError};
pub use core::{Event, Guard, MachineSnapshot, SnapshotStatus, StateValue};
pub use effects::{Action, Implementations, Machine, MachineError};
