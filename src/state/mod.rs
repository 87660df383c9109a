//! State module for tracking run progress
//!
//! `PipelineState` is the state machine the orchestrator walks through for a
//! single run. Egress lifecycle state lives with the egress manager.

mod pipeline_state;

pub use pipeline_state::PipelineState;
