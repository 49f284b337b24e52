//! Supervised units of work
//!
//! Every runnable thing in the dispatcher (controller, per-script executor,
//! per-user action) implements [`Unit`] and runs under identical lifecycle
//! rules: `Idle -> Running -> Finalizing -> Done`, a finisher that always
//! runs, and a one-shot [`Accomplish`] signal set after it. A root unit owns
//! a [`Scope`]; children spawned from a running body join that scope, so
//! cancelling the root cancels all of them.

pub mod accomplish;
pub mod runner;
pub mod scope;

pub use accomplish::Accomplish;
pub use runner::{Exit, Unit, UnitContext, UnitHandle, UnitState};
pub use scope::{CrashPolicy, CrashReport, Scope};
