//! Builder API for machine definitions.
//!
//! Machines are described with fluent, consuming builders:
//!
//! - [`MachineBuilder`] configures the root state, the initial context and
//!   named implementations
//! - [`StateConfig`] describes a state and its children
//! - [`TransitionConfig`] and [`InvokeConfig`] describe transitions and
//!   invoked actors
//!
//! `build()` validates the whole definition and reports every problem it
//! finds, not just the first.

pub mod error;
pub mod machine;
pub mod state;
pub mod transition;

pub use error::BuildError;
pub use machine::MachineBuilder;
pub use state::StateConfig;
pub use transition::{InvokeConfig, TransitionConfig};

use crate::core::Guard;

/// A transition to `target` taken only when `guard` passes.
///
/// # Example
///
/// ```
/// use statecraft::builder::{guarded, MachineBuilder, StateConfig};
/// use statecraft::core::Guard;
/// use statecraft::Event;
///
/// let machine = MachineBuilder::new("door")
///     .context(false)
///     .initial("closed")
///     .state(
///         "closed",
///         StateConfig::new().on("OPEN", guarded("open", Guard::new(|locked: &bool, _| !*locked))),
///     )
///     .state("open", StateConfig::new())
///     .build()
///     .unwrap();
///
/// let closed = machine.initial_snapshot_pure(None);
/// assert!(machine.next_snapshot(&closed, &Event::new("OPEN")).matches("open"));
/// ```
pub fn guarded<C: 'static>(target: impl Into<String>, guard: impl Into<Guard<C>>) -> TransitionConfig<C> {
    TransitionConfig::to(target).guard(guard)
}
