//! Error taxonomy for the agent pipeline.
//!
//! Three layers of failure exist and each has its own type:
//!
//! * [`PlanError`] is produced by the plan validator and always carries the raw
//!   model output that failed validation.
//! * [`ActionFailure`] is plain data recorded inside an execution record when a
//!   single proposed action fails. It never aborts a run.
//! * [`AgentError`] is what [`Orchestrator::run`](crate::orchestrator::Orchestrator::run)
//!   returns when the run as a whole cannot continue.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Named failure categories shared by every error layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    EmbeddingError,
    RetrievalError,
    PlanGenerationError,
    MalformedPlan,
    InvalidIntent,
    MissingField,
    InvalidToolFormat,
    UnknownTool,
    AnalysisError,
    InvalidToolArguments,
    InvalidEntityType,
    UnresolvedEntityReference,
    ToolExecutionError,
    NotificationUndeliverable,
    JournalError,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EmbeddingError => "EmbeddingError",
            ErrorKind::RetrievalError => "RetrievalError",
            ErrorKind::PlanGenerationError => "PlanGenerationError",
            ErrorKind::MalformedPlan => "MalformedPlan",
            ErrorKind::InvalidIntent => "InvalidIntent",
            ErrorKind::MissingField => "MissingField",
            ErrorKind::InvalidToolFormat => "InvalidToolFormat",
            ErrorKind::UnknownTool => "UnknownTool",
            ErrorKind::AnalysisError => "AnalysisError",
            ErrorKind::InvalidToolArguments => "InvalidToolArguments",
            ErrorKind::InvalidEntityType => "InvalidEntityType",
            ErrorKind::UnresolvedEntityReference => "UnresolvedEntityReference",
            ErrorKind::ToolExecutionError => "ToolExecutionError",
            ErrorKind::NotificationUndeliverable => "NotificationUndeliverable",
            ErrorKind::JournalError => "JournalError",
            ErrorKind::Cancelled => "Cancelled",
        }
    }

    /// Plan validation failures abort the run and must never be retried
    /// against the same model output.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorKind::MalformedPlan
                | ErrorKind::InvalidIntent
                | ErrorKind::MissingField
                | ErrorKind::InvalidToolFormat
                | ErrorKind::UnknownTool
        )
    }

    /// Failures where retrying the whole run later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::EmbeddingError
                | ErrorKind::RetrievalError
                | ErrorKind::PlanGenerationError
                | ErrorKind::JournalError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plan that failed validation.
///
/// The raw text is the plan's only audit trail, so it is kept whole and
/// printed in full by `Display`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}\n--- raw plan text ---\n{raw}")]
pub struct PlanError {
    pub kind: ErrorKind,
    pub detail: String,
    pub raw: String,
}

impl PlanError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            raw: raw.into(),
        }
    }
}

/// A recorded, non-fatal failure of one proposed action or tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl ActionFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Run-level failures returned by the orchestrator.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("context retrieval failed: {0}")]
    Retrieval(String),

    #[error("plan generation failed: {0}")]
    PlanGeneration(String),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("notification to consumer '{consumer_id}' undeliverable after {attempts} attempts")]
    NotificationUndeliverable { consumer_id: String, attempts: u32 },

    #[error("step journal error at '{step}': {message}")]
    Journal { step: String, message: String },

    #[error("run '{run_id}' cancelled before step '{step}'")]
    Cancelled { run_id: String, step: String },
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Embedding(_) => ErrorKind::EmbeddingError,
            AgentError::Retrieval(_) => ErrorKind::RetrievalError,
            AgentError::PlanGeneration(_) => ErrorKind::PlanGenerationError,
            AgentError::Plan(err) => err.kind,
            AgentError::NotificationUndeliverable { .. } => ErrorKind::NotificationUndeliverable,
            AgentError::Journal { .. } => ErrorKind::JournalError,
            AgentError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}
