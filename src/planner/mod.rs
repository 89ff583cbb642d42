//! Planning and execution.
//!
//! This module compares the desired graph with stored state, produces a
//! plan, and executes that plan against a provider.

mod diff;
mod executor;
mod plan;
mod retry;

pub use diff::Differ;
pub use executor::{ExecutionReport, Executor, ExecutorOptions, NodeReport, NodeStatus};
pub use plan::{ActionType, Plan, PlanSummary, PlannedAction};
pub use retry::RetryPolicy;
