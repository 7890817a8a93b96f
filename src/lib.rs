//! selftool: on-demand tool synthesis.
//!
//! A request is analyzed and split into subtasks. Each subtask either reuses
//! a registered tool or gets a freshly generated one that must pass a static
//! safety policy and run cleanly in a sandbox before it is registered for
//! reuse.

pub mod config;
pub mod directory;
pub mod inference;
pub mod policy;
pub mod sandbox;
pub mod types;
pub mod workflow;
