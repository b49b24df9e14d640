pub mod agent;
pub mod cli;
pub mod config;
pub mod durable;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod notify;
pub mod orchestrator;
pub mod persistence;
pub mod planner;
pub mod resolver;
pub mod retrieval;
pub mod tools;
pub mod types;

pub use error::{AgentError, ErrorKind, PlanError};
pub use orchestrator::{Orchestrator, RunOutput, RunRequest};
pub use planner::Plan;
