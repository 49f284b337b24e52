//! Live progress of a dispatch
//!
//! A [`TaskRecord`] owns its scripts and their users in flat tables. Every
//! mutation through a [`ScriptHandle`] or [`UserHandle`] enqueues a
//! [`ChangeRecord`]; the [`ChangeFeed`] returned alongside the record is the
//! single place those changes are drained.

pub mod changes;
pub mod render;
pub mod status;
pub mod tree;

pub use changes::{ChangeFeed, ChangeHook, ChangeKind, ChangeRecord};
pub use render::{ScriptSnapshot, TaskSnapshot, UserSnapshot};
pub use status::{LogRecord, Status, TaskMode};
pub use tree::{
    ScriptHandle, ScriptRecord, ScriptSeed, TaskRecord, TaskTarget, UserHandle, UserRecord,
    UserSeed,
};
