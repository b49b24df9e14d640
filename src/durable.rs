//! Durable step execution.
//!
//! A run is a sequence of named steps. [`StepExecutor::run`] executes a step's
//! closure the first time the name is seen for a run and stores the serialized
//! result in a [`StepJournal`]; every later call with the same name returns the
//! stored result without calling the closure. Step names must be deterministic
//! (`analyze-action-3`, never random) so a resumed run lines up with its journal.
//!
//! A step whose closure fails is not stored and stays retryable. Retrying is up
//! to the caller; the executor never loops.

use crate::error::AgentError;
use crate::persistence::Persistence;
use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Storage for completed step results, keyed by `(run_id, step_name)`.
#[async_trait]
pub trait StepJournal: Send + Sync {
    async fn load(&self, run_id: &str, step_name: &str) -> Result<Option<String>>;

    /// Persist a result. If one is already stored for the key it is kept.
    async fn store(&self, run_id: &str, step_name: &str, result: &str) -> Result<()>;
}

/// Journal held in process memory. Survives retries of `Orchestrator::run`
/// within one process, not restarts.
#[derive(Debug, Default, Clone)]
pub struct MemoryJournal {
    entries: Arc<Mutex<HashMap<(String, String), String>>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Step names stored for a run, sorted.
    pub fn steps(&self, run_id: &str) -> Vec<String> {
        let mut steps: Vec<String> = self
            .entries
            .lock()
            .unwrap()
            .keys()
            .filter(|(run, _)| run == run_id)
            .map(|(_, step)| step.clone())
            .collect();
        steps.sort();
        steps
    }
}

#[async_trait]
impl StepJournal for MemoryJournal {
    async fn load(&self, run_id: &str, step_name: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .get(&(run_id.to_string(), step_name.to_string()))
            .cloned())
    }

    async fn store(&self, run_id: &str, step_name: &str, result: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry((run_id.to_string(), step_name.to_string()))
            .or_insert_with(|| result.to_string());
        Ok(())
    }
}

#[async_trait]
impl StepJournal for Persistence {
    async fn load(&self, run_id: &str, step_name: &str) -> Result<Option<String>> {
        let db = self.clone();
        let (run_id, step_name) = (run_id.to_string(), step_name.to_string());
        tokio::task::spawn_blocking(move || db.journal_get(&run_id, &step_name)).await?
    }

    async fn store(&self, run_id: &str, step_name: &str, result: &str) -> Result<()> {
        let db = self.clone();
        let (run_id, step_name, result) =
            (run_id.to_string(), step_name.to_string(), result.to_string());
        let inserted =
            tokio::task::spawn_blocking(move || db.journal_put(&run_id, &step_name, &result))
                .await??;
        if !inserted {
            tracing::debug!("journal already held a result; keeping the first");
        }
        Ok(())
    }
}

/// Memoizes named steps of a single run.
#[derive(Clone)]
pub struct StepExecutor {
    run_id: String,
    journal: Arc<dyn StepJournal>,
}

impl StepExecutor {
    pub fn new(run_id: impl Into<String>, journal: Arc<dyn StepJournal>) -> Self {
        Self {
            run_id: run_id.into(),
            journal,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run `step` at most once for this run; replay the stored result otherwise.
    pub async fn run<T, F, Fut>(&self, step_name: &str, step: F) -> Result<T, AgentError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let stored = self
            .journal
            .load(&self.run_id, step_name)
            .await
            .map_err(|e| self.journal_error(step_name, "load", e))?;

        if let Some(stored) = stored {
            tracing::debug!(run_id = %self.run_id, step = step_name, "replaying stored step result");
            return serde_json::from_str(&stored).map_err(|e| AgentError::Journal {
                step: step_name.to_string(),
                message: format!("stored result does not decode: {}", e),
            });
        }

        tracing::debug!(run_id = %self.run_id, step = step_name, "executing step");
        let value = step().await?;

        let encoded = serde_json::to_string(&value).map_err(|e| AgentError::Journal {
            step: step_name.to_string(),
            message: format!("result does not encode: {}", e),
        })?;
        self.journal
            .store(&self.run_id, step_name, &encoded)
            .await
            .map_err(|e| self.journal_error(step_name, "store", e))?;

        Ok(value)
    }

    fn journal_error(&self, step_name: &str, op: &str, err: anyhow::Error) -> AgentError {
        AgentError::Journal {
            step: step_name.to_string(),
            message: format!("{} failed: {:#}", op, err),
        }
    }
}
