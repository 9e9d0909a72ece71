//! Boot stages, their status table, and the events they emit.
//!
//! # States
//! ```text
//! Pending → Running → Finished
//!                   ↘ Failed
//! ```
//!
//! # Design Decisions
//! - The full stage list is fixed when the board is built
//! - A stage may only start once its predecessor has finished
//! - Status changes and their events happen under one lock, so every
//!   subscriber sees events in the order the transitions happened

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};

/// Category label for the boot pipeline.
pub const INIT: &str = "INIT";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Finished,
    Failed,
}

/// Identity of a stage as carried by events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageInfo {
    pub index: usize,
    pub name: String,
    pub category: String,
}

/// One row of the status table.
#[derive(Debug, Clone, Serialize)]
pub struct Stage {
    #[serde(flatten)]
    pub info: StageInfo,
    pub status: StageStatus,
    #[serde(skip)]
    started_at: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StageEvent {
    Started { stage: StageInfo },
    Finished { stage: StageInfo, elapsed_ms: u64 },
    Failed { stage: StageInfo, error: String },
}

impl StageEvent {
    pub fn stage(&self) -> &StageInfo {
        match self {
            StageEvent::Started { stage }
            | StageEvent::Finished { stage, .. }
            | StageEvent::Failed { stage, .. } => stage,
        }
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("no stage with index {0}")]
    Unknown(usize),

    #[error("stage {index} cannot start before stage {previous} finishes")]
    OutOfOrder { index: usize, previous: usize },

    #[error("stage {index} is {status:?}, expected {expected:?}")]
    InvalidTransition {
        index: usize,
        status: StageStatus,
        expected: StageStatus,
    },

    #[error("stage {0} dropped its completion signal without finishing")]
    Abandoned(usize),

    #[error(transparent)]
    Failed(BoxError),
}

impl StageError {
    /// Wrap a step-specific error.
    pub fn failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StageError::Failed(Box::new(err))
    }

    /// The step-specific error, if this is one of type `E`.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            StageError::Failed(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// Status table and event dispatcher for an ordered set of stages.
#[derive(Debug)]
pub struct StageBoard {
    stages: Mutex<Vec<Stage>>,
    events: broadcast::Sender<StageEvent>,
}

impl StageBoard {
    /// Create a board with every stage pending. Indices follow list order.
    pub fn new<I, N, C>(stages: I) -> Self
    where
        I: IntoIterator<Item = (N, C)>,
        N: Into<String>,
        C: Into<String>,
    {
        let stages = stages
            .into_iter()
            .enumerate()
            .map(|(index, (name, category))| Stage {
                info: StageInfo {
                    index,
                    name: name.into(),
                    category: category.into(),
                },
                status: StageStatus::Pending,
                started_at: None,
            })
            .collect();
        let (events, _) = broadcast::channel(64);

        Self {
            stages: Mutex::new(stages),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Stage>> {
        self.stages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Stage> {
        self.lock().clone()
    }

    pub fn status(&self, index: usize) -> Option<StageStatus> {
        self.lock().get(index).map(|stage| stage.status)
    }

    pub fn info(&self, index: usize) -> Option<StageInfo> {
        self.lock().get(index).map(|stage| stage.info.clone())
    }

    /// Mark a stage running and emit `started`.
    pub fn start(&self, index: usize) -> Result<StageInfo, StageError> {
        let mut stages = self.lock();
        if index > 0 {
            let previous = stages
                .get(index - 1)
                .ok_or(StageError::Unknown(index))?;
            if previous.status != StageStatus::Finished {
                return Err(StageError::OutOfOrder {
                    index,
                    previous: index - 1,
                });
            }
        }
        let stage = stages.get_mut(index).ok_or(StageError::Unknown(index))?;
        expect_status(stage, StageStatus::Pending)?;

        stage.status = StageStatus::Running;
        stage.started_at = Some(Instant::now());
        let info = stage.info.clone();
        let _ = self.events.send(StageEvent::Started { stage: info.clone() });
        Ok(info)
    }

    /// Mark a running stage finished and emit `finished`.
    pub fn finish(&self, index: usize) -> Result<Duration, StageError> {
        let mut stages = self.lock();
        let stage = stages.get_mut(index).ok_or(StageError::Unknown(index))?;
        expect_status(stage, StageStatus::Running)?;

        stage.status = StageStatus::Finished;
        let elapsed = stage.started_at.map(|t| t.elapsed()).unwrap_or_default();
        let _ = self.events.send(StageEvent::Finished {
            stage: stage.info.clone(),
            elapsed_ms: elapsed.as_millis() as u64,
        });
        Ok(elapsed)
    }

    /// Mark a stage failed and emit `failed`. Finished stages stay finished.
    pub fn fail(&self, index: usize, error: &StageError) {
        let mut stages = self.lock();
        let Some(stage) = stages.get_mut(index) else {
            return;
        };
        if stage.status == StageStatus::Finished {
            return;
        }
        stage.status = StageStatus::Failed;
        let _ = self.events.send(StageEvent::Failed {
            stage: stage.info.clone(),
            error: error.to_string(),
        });
    }

    /// Resolve once the stage at `index` has finished.
    ///
    /// Events for other indices never release the wait. Fails if the stage
    /// fails or does not exist.
    pub async fn wait_finished(&self, index: usize) -> Result<(), StageError> {
        // Subscribe before reading the table so no transition is missed.
        let mut events = self.subscribe();
        match self.status(index) {
            None => return Err(StageError::Unknown(index)),
            Some(StageStatus::Finished) => return Ok(()),
            Some(StageStatus::Failed) => return Err(failed_elsewhere(index)),
            Some(_) => {}
        }

        loop {
            match events.recv().await {
                Ok(StageEvent::Finished { stage, .. }) if stage.index == index => return Ok(()),
                Ok(StageEvent::Failed { stage, .. }) if stage.index == index => {
                    return Err(failed_elsewhere(index))
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    match self.status(index) {
                        Some(StageStatus::Finished) => return Ok(()),
                        Some(StageStatus::Failed) => return Err(failed_elsewhere(index)),
                        _ => {}
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Err(StageError::Abandoned(index)),
            }
        }
    }
}

fn failed_elsewhere(index: usize) -> StageError {
    StageError::InvalidTransition {
        index,
        status: StageStatus::Failed,
        expected: StageStatus::Finished,
    }
}

fn expect_status(stage: &Stage, expected: StageStatus) -> Result<(), StageError> {
    if stage.status == expected {
        Ok(())
    } else {
        Err(StageError::InvalidTransition {
            index: stage.info.index,
            status: stage.status,
            expected,
        })
    }
}

/// Continuation handed to a running step.
///
/// Calling `finish` marks this stage finished on the board and hands the
/// step's output to the orchestrator. The signal is bound to one index, so
/// it can never release any other stage.
#[derive(Debug)]
pub struct StageSignal<T> {
    index: usize,
    board: Arc<StageBoard>,
    tx: oneshot::Sender<Result<T, StageError>>,
}

impl<T> StageSignal<T> {
    pub(crate) fn new(
        index: usize,
        board: Arc<StageBoard>,
    ) -> (Self, oneshot::Receiver<Result<T, StageError>>) {
        let (tx, rx) = oneshot::channel();
        (Self { index, board, tx }, rx)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Complete the stage with its output.
    pub fn finish(self, output: T) {
        let result = self.board.finish(self.index).map(|_| output);
        let _ = self.tx.send(result);
    }

    /// Complete the stage with an error.
    pub fn fail(self, error: impl Into<StageError>) {
        let _ = self.tx.send(Err(error.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> StageBoard {
        StageBoard::new([("preinit", INIT), ("construct", INIT), ("launch", INIT)])
    }

    #[test]
    fn test_stages_start_pending() {
        let board = board();
        assert_eq!(board.len(), 3);
        assert!(board
            .snapshot()
            .iter()
            .all(|stage| stage.status == StageStatus::Pending));
        assert_eq!(board.info(1).unwrap().name, "construct");
    }

    #[test]
    fn test_out_of_order_start_rejected() {
        let board = board();
        let err = board.start(1).unwrap_err();
        assert!(matches!(err, StageError::OutOfOrder { index: 1, previous: 0 }));

        board.start(0).unwrap();
        assert!(matches!(board.start(1), Err(StageError::OutOfOrder { .. })));

        board.finish(0).unwrap();
        board.start(1).unwrap();
        assert_eq!(board.status(1), Some(StageStatus::Running));
    }

    #[test]
    fn test_finish_requires_running() {
        let board = board();
        assert!(matches!(
            board.finish(0),
            Err(StageError::InvalidTransition {
                index: 0,
                status: StageStatus::Pending,
                ..
            })
        ));
        assert!(matches!(board.finish(7), Err(StageError::Unknown(7))));
    }

    #[test]
    fn test_events_in_emission_order() {
        let board = board();
        let mut rx = board.subscribe();

        board.start(0).unwrap();
        board.finish(0).unwrap();
        board.start(1).unwrap();
        board.fail(1, &StageError::Abandoned(1));

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], StageEvent::Started { stage } if stage.index == 0));
        assert!(matches!(&events[1], StageEvent::Finished { stage, .. } if stage.index == 0));
        assert!(matches!(&events[2], StageEvent::Started { stage } if stage.index == 1));
        assert!(matches!(&events[3], StageEvent::Failed { stage, .. } if stage.index == 1));
        assert_eq!(events[2].stage().category, INIT);
    }

    #[tokio::test]
    async fn test_wait_finished_ignores_other_indices() {
        let board = Arc::new(board());
        let waiter = {
            let board = board.clone();
            tokio::spawn(async move { board.wait_finished(1).await })
        };
        tokio::task::yield_now().await;

        board.start(0).unwrap();
        board.finish(0).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "stage 0 must not release stage 1");

        board.start(1).unwrap();
        board.finish(1).unwrap();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wait_finished_reports_failure() {
        let board = board();
        board.start(0).unwrap();
        board.fail(0, &StageError::Abandoned(0));
        assert!(board.wait_finished(0).await.is_err());
        assert!(matches!(board.wait_finished(9).await, Err(StageError::Unknown(9))));
    }

    #[test]
    fn test_signal_finish_updates_board() {
        let board = Arc::new(board());
        board.start(0).unwrap();

        let (signal, mut rx) = StageSignal::new(0, board.clone());
        signal.finish("done");

        assert_eq!(rx.try_recv().unwrap().unwrap(), "done");
        assert_eq!(board.status(0), Some(StageStatus::Finished));
    }
}
