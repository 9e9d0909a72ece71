//! Boot pipeline.
//!
//! # Stages
//! 0. `preinit`: exit hook, log directory, access log
//! 1. `http::construct`: router, middleware, static root
//! 2. `http::launch`: bind the panel address and start serving
//!
//! After the last stage the supervised server is started, unless this is a
//! first run (no config file yet).
//!
//! # Design Decisions
//! - Fail fast: any stage error is fatal, nothing is rolled back
//! - Listener binds last (traffic only once everything else is ready)
//! - A supervisor start failure after boot is logged, not fatal

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::http::{build_router, serve, AccessLog};
use crate::lifecycle::exit_hook::ExitGuard;
use crate::lifecycle::pipeline::{Orchestrator, PipelineError, Step};
use crate::lifecycle::stage::{StageBoard, StageError, StageEvent, StageSignal};
use crate::lifecycle::PanelContext;
use crate::supervisor::credentials::mask_api_key;
use crate::supervisor::Supervisor;

/// Errors raised by the boot stages.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cannot create log directory {}: {source}", path.display())]
    LogDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot open access log in {}: {source}", path.display())]
    AccessLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot bind panel address {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("boot stage ran without {0} from an earlier stage")]
    MissingOutput(&'static str),
}

impl From<StartupError> for StageError {
    fn from(err: StartupError) -> Self {
        StageError::failed(err)
    }
}

/// State threaded through the boot stages.
pub struct BootState {
    ctx: PanelContext,
    exit_guard: Option<ExitGuard>,
    access_log: Option<Arc<AccessLog>>,
    router: Option<Router>,
    serving: Option<Serving>,
}

struct Serving {
    local_addr: SocketAddr,
    task: JoinHandle<io::Result<()>>,
}

impl BootState {
    fn new(ctx: PanelContext) -> Self {
        Self {
            ctx,
            exit_guard: None,
            access_log: None,
            router: None,
            serving: None,
        }
    }
}

/// Stage 0.
pub struct PreInit;

#[async_trait]
impl Step<BootState> for PreInit {
    fn name(&self) -> &str {
        "preinit"
    }

    async fn run(&self, mut state: BootState, signal: StageSignal<BootState>) -> Result<(), StageError> {
        state.exit_guard = Some(ExitGuard::install(state.ctx.supervisor.clone()));

        let dir = state.ctx.config.panel.log_directory.clone();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StartupError::LogDirectory {
                path: dir.clone(),
                source,
            })?;

        let access_log = AccessLog::open(&dir)
            .await
            .map_err(|source| StartupError::AccessLog {
                path: dir.clone(),
                source,
            })?;
        tracing::info!(path = %access_log.path().display(), "Access log opened");
        state.access_log = Some(Arc::new(access_log));

        signal.finish(state);
        Ok(())
    }
}

/// Stage 1.
pub struct ConstructHttp;

#[async_trait]
impl Step<BootState> for ConstructHttp {
    fn name(&self) -> &str {
        "http::construct"
    }

    async fn run(&self, mut state: BootState, signal: StageSignal<BootState>) -> Result<(), StageError> {
        let access_log = state
            .access_log
            .clone()
            .ok_or(StartupError::MissingOutput("access log"))?;
        state.router = Some(build_router(&state.ctx, access_log));
        signal.finish(state);
        Ok(())
    }
}

/// Stage 2.
pub struct LaunchHttp;

#[async_trait]
impl Step<BootState> for LaunchHttp {
    fn name(&self) -> &str {
        "http::launch"
    }

    async fn run(&self, mut state: BootState, signal: StageSignal<BootState>) -> Result<(), StageError> {
        let router = state
            .router
            .take()
            .ok_or(StartupError::MissingOutput("router"))?;

        let address = state.ctx.config.panel_address();
        let bind_error = |source: io::Error| StartupError::Bind {
            address: address.clone(),
            source,
        };
        let listener = TcpListener::bind(&address).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let shutdown = state.ctx.shutdown.subscribe();
        let task = tokio::spawn(serve(listener, router, shutdown));
        state.serving = Some(Serving { local_addr, task });

        signal.finish(state);
        Ok(())
    }
}

/// The three boot stages, not yet run.
pub fn boot_pipeline() -> Orchestrator<BootState> {
    let steps: Vec<Box<dyn Step<BootState>>> = vec![
        Box::new(PreInit),
        Box::new(ConstructHttp),
        Box::new(LaunchHttp),
    ];
    Orchestrator::new(steps)
}

/// Run the boot pipeline, then hand off to the supervisor.
pub async fn boot(ctx: PanelContext) -> Result<Panel, PipelineError> {
    launch(boot_pipeline(), ctx).await
}

/// Run `pipeline` against `ctx`. Callers that want to inspect the stage board
/// afterwards build the pipeline with `boot_pipeline` first.
pub async fn launch(pipeline: Orchestrator<BootState>, ctx: PanelContext) -> Result<Panel, PipelineError> {
    let stages = pipeline.board();
    tokio::spawn(log_stage_events(pipeline.subscribe()));

    let mut state = pipeline.run(BootState::new(ctx.clone())).await?;

    let (Some(serving), Some(exit_guard), Some(access_log)) = (
        state.serving.take(),
        state.exit_guard.take(),
        state.access_log.take(),
    ) else {
        let last = stages.len().saturating_sub(1);
        return Err(PipelineError {
            index: last,
            name: stages.info(last).map(|info| info.name).unwrap_or_default(),
            source: StartupError::MissingOutput("listener").into(),
        });
    };

    tracing::info!(
        url = %format!("http://{}", serving.local_addr),
        api_key = %mask_api_key(&ctx.supervisor.api_key()),
        first_run = ctx.config.first_run,
        "Panel ready"
    );

    hand_off(&ctx).await;

    Ok(Panel {
        ctx,
        stages,
        local_addr: serving.local_addr,
        server_task: Some(serving.task),
        _exit_guard: exit_guard,
        _access_log: access_log,
    })
}

async fn hand_off(ctx: &PanelContext) {
    if ctx.config.first_run {
        tracing::info!("First run: waiting for setup, game server not started");
        return;
    }

    ctx.supervisor.set_port(ctx.config.server.port);
    if let Err(e) = ctx.supervisor.start_server().await {
        tracing::error!(error = %e, "Failed to start game server after boot");
    }
}

async fn log_stage_events(mut events: broadcast::Receiver<StageEvent>) {
    loop {
        match events.recv().await {
            Ok(StageEvent::Started { stage }) => {
                tracing::info!(stage = stage.index, name = %stage.name, category = %stage.category, "Stage started");
            }
            Ok(StageEvent::Finished { stage, elapsed_ms }) => {
                tracing::info!(stage = stage.index, name = %stage.name, elapsed_ms, "Stage finished");
            }
            // Already logged by the orchestrator.
            Ok(StageEvent::Failed { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Stage event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// A booted panel: serving HTTP, game server handed off.
///
/// Dropping it without `shutdown` aborts the HTTP server and kills the game
/// server through the exit hook.
pub struct Panel {
    ctx: PanelContext,
    stages: Arc<StageBoard>,
    local_addr: SocketAddr,
    server_task: Option<JoinHandle<io::Result<()>>>,
    _exit_guard: ExitGuard,
    _access_log: Arc<AccessLog>,
}

impl Panel {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> &PanelContext {
        &self.ctx
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.ctx.supervisor
    }

    pub fn stages(&self) -> Arc<StageBoard> {
        self.stages.clone()
    }

    /// Stop accepting, drain HTTP, stop the game server.
    pub async fn shutdown(mut self) -> io::Result<()> {
        tracing::info!("Shutting down panel");
        self.ctx.shutdown.trigger();

        let served = match self.server_task.take() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) => Err(io::Error::other(e)),
            },
            None => Ok(()),
        };

        if let Err(e) = self.ctx.supervisor.stop_server().await {
            tracing::error!(error = %e, "Failed to stop game server");
        }

        tracing::info!("Shutdown complete");
        served
    }
}

impl Drop for Panel {
    fn drop(&mut self) {
        if let Some(task) = self.server_task.take() {
            tracing::warn!("Panel dropped without shutdown; aborting HTTP server");
            self.ctx.shutdown.trigger();
            task.abort();
        }
    }
}
