//! Request orchestration: analysis, planning and the per-subtask
//! search / generate / check / execute / register loop.

pub mod analysis;
pub mod engine;
pub mod generator;
pub mod planner;
pub mod prompts;
pub mod routing;
pub mod state;

pub use engine::{WorkflowConfig, WorkflowEngine};
pub use state::{Step, WorkflowState};
