//! Skill execution pipeline and tool-call orchestration.
//!
//! [`execute_skill`] runs one invocation through the full gate pipeline;
//! [`run_tool_loop`] drives the model↔skills conversation for one user turn.
//! Neither surfaces skill failures as errors — every failure mode becomes a
//! diagnostic string the model can read and react to.

mod executor;
mod tool_loop;

pub use executor::{ExecutionEnv, ExecutionOutcome, SkillStatus, execute_skill};
pub use tool_loop::{LoopOptions, LoopStats, run_tool_loop};
