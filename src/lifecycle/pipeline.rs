//! Stage orchestrator.
//!
//! Runs a fixed list of steps strictly in order. Each step receives the
//! previous step's output and a `StageSignal`; the next step starts only after
//! the signal has marked this stage finished on the board.
//!
//! # Design Decisions
//! - Fail fast: the first error aborts the remaining stages, no rollback
//! - A step may finish inline or hand its signal to a spawned task
//! - Dropping a signal without finishing fails the stage instead of hanging

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::lifecycle::stage::{StageBoard, StageError, StageEvent, StageSignal, StageStatus, INIT};
use crate::observability::metrics;

/// Pipeline failure: the first stage that failed and why.
#[derive(Debug, Error)]
#[error("stage {index} ({name}) failed: {source}")]
pub struct PipelineError {
    pub index: usize,
    pub name: String,
    #[source]
    pub source: StageError,
}

/// One initialization step.
#[async_trait]
pub trait Step<T: Send + 'static>: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> &str {
        INIT
    }

    /// Do the work, then complete `signal` (now or from a spawned task).
    /// Returning an error fails the stage.
    async fn run(&self, input: T, signal: StageSignal<T>) -> Result<(), StageError>;
}

/// Boxed future returned by closure steps.
pub type StepFuture = Pin<Box<dyn Future<Output = Result<(), StageError>> + Send>>;

/// A step built from an async closure.
pub struct FnStep<T> {
    name: String,
    category: String,
    func: Box<dyn Fn(T, StageSignal<T>) -> StepFuture + Send + Sync>,
}

impl<T: Send + 'static> FnStep<T> {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(T, StageSignal<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StageError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            category: INIT.to_string(),
            func: Box::new(move |input, signal| Box::pin(func(input, signal))),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
}

#[async_trait]
impl<T: Send + 'static> Step<T> for FnStep<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> &str {
        &self.category
    }

    async fn run(&self, input: T, signal: StageSignal<T>) -> Result<(), StageError> {
        (self.func)(input, signal).await
    }
}

/// Runs steps in order against a shared stage board.
pub struct Orchestrator<T> {
    steps: Vec<Box<dyn Step<T>>>,
    board: Arc<StageBoard>,
}

impl<T: Send + 'static> Orchestrator<T> {
    pub fn new(steps: Vec<Box<dyn Step<T>>>) -> Self {
        let board = Arc::new(StageBoard::new(
            steps
                .iter()
                .map(|step| (step.name().to_string(), step.category().to_string())),
        ));
        Self { steps, board }
    }

    pub fn board(&self) -> Arc<StageBoard> {
        self.board.clone()
    }

    /// Subscribe before `run` to observe every stage event.
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.board.subscribe()
    }

    /// Run every step in order, threading each output into the next step.
    pub async fn run(self, initial: T) -> Result<T, PipelineError> {
        let mut value = initial;

        for (index, step) in self.steps.iter().enumerate() {
            let started = Instant::now();
            let outcome = self.run_stage(index, step.as_ref(), value).await;
            match outcome {
                Ok(output) => {
                    metrics::record_stage(step.name(), "finished", started.elapsed());
                    value = output;
                }
                Err(source) => {
                    metrics::record_stage(step.name(), "failed", started.elapsed());
                    self.board.fail(index, &source);
                    tracing::error!(
                        stage = index,
                        name = step.name(),
                        error = %source,
                        "Stage failed"
                    );
                    return Err(PipelineError {
                        index,
                        name: step.name().to_string(),
                        source,
                    });
                }
            }
        }

        Ok(value)
    }

    async fn run_stage(&self, index: usize, step: &dyn Step<T>, input: T) -> Result<T, StageError> {
        self.board.start(index)?;

        let (signal, completion) = StageSignal::new(index, self.board.clone());
        step.run(input, signal).await?;

        let output = completion.await.map_err(|_| StageError::Abandoned(index))??;

        // Only this index's finish may release the next stage.
        match self.board.status(index) {
            Some(StageStatus::Finished) => Ok(output),
            Some(status) => Err(StageError::InvalidTransition {
                index,
                status,
                expected: StageStatus::Finished,
            }),
            None => Err(StageError::Unknown(index)),
        }
    }
}
