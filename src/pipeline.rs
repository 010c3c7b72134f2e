use crate::aggregate::{output_path_for, ResultAggregator, Summary};
use crate::candidate::{Candidate, TrialOutcome};
use crate::configuration::Settings;
use crate::error::{PipelineError, SourceError, TrialError};
use crate::prober::Prober;
use crate::probers;
use crate::report::Reporter;
use crate::source::ConfigSource;
use crate::supervisor::{EngineSpec, PortSlot, Supervisor};
use crate::workspace::Workspace;
use log::{debug, error, info, warn};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub engine: EngineSpec,
    pub target: String,
    pub probe_timeout: Duration,
    pub workspace_base: PathBuf,
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            engine: settings.engine.spec(),
            target: settings.probe.target.clone(),
            probe_timeout: settings.probe.timeout(),
            workspace_base: settings.workspace.base_dir.clone(),
        }
    }
}

/// Why a run ended before the input was exhausted.
#[derive(Debug)]
pub enum Halt {
    ReadError(SourceError),
    Interrupted,
}

#[derive(Debug)]
pub struct RunReport {
    pub summary: Summary,
    pub halted: Option<Halt>,
}

pub struct Pipeline {
    supervisor: Supervisor,
    prober: Box<dyn Prober>,
    slot: PortSlot,
    target: String,
    probe_timeout: Duration,
    workspace_base: PathBuf,
    stop: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(options: PipelineOptions, prober: Box<dyn Prober>) -> Self {
        Self {
            slot: PortSlot::new(options.engine.socks_addr),
            supervisor: Supervisor::new(options.engine),
            prober,
            target: options.target,
            probe_timeout: options.probe_timeout,
            workspace_base: options.workspace_base,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            PipelineOptions::from_settings(settings),
            probers::from_settings(&settings.probe),
        )
    }

    /// Setting the returned flag stops the run after the current trial.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Working candidates go to `working_<name>` beside `input`.
    pub async fn run(&mut self, input: &Path, reporter: &mut dyn Reporter) -> Result<RunReport, PipelineError> {
        let workspace = self.create_workspace()?;
        let source = ConfigSource::open(input)?;
        info!("reading candidates from {}", input.display());
        self.drive(workspace, source, &output_path_for(input), reporter).await
    }

    /// Same as [`Pipeline::run`] for candidates coming from any reader.
    pub async fn run_from_reader<R: BufRead>(
        &mut self,
        reader: R,
        output: &Path,
        reporter: &mut dyn Reporter,
    ) -> Result<RunReport, PipelineError> {
        let workspace = self.create_workspace()?;
        self.drive(workspace, ConfigSource::from_reader(reader), output, reporter).await
    }

    fn create_workspace(&self) -> Result<Workspace, PipelineError> {
        Workspace::create(&self.workspace_base).map_err(|source| PipelineError::WorkspaceCreate {
            base: self.workspace_base.clone(),
            source,
        })
    }

    async fn drive<R: BufRead>(
        &mut self,
        workspace: Workspace,
        mut source: ConfigSource<R>,
        output: &Path,
        reporter: &mut dyn Reporter,
    ) -> Result<RunReport, PipelineError> {
        let mut aggregator = ResultAggregator::create(output)?;

        info!(
            "testing with {} via {} (prober {}, target {})",
            self.supervisor.spec().program,
            self.slot.addr(),
            self.prober.name(),
            self.target
        );
        reporter.started();

        let mut halted = None;
        for item in source.by_ref() {
            let candidate = match item {
                Ok(candidate) => candidate,
                Err(e) => {
                    error!("stopping early: {}", e);
                    halted = Some(Halt::ReadError(e));
                    break;
                }
            };

            reporter.testing(&candidate);
            let outcome = self.run_trial(&workspace, candidate).await;
            reporter.finished(&outcome);
            aggregator.record(&outcome)?;

            if self.stop.load(Ordering::SeqCst) {
                info!("interrupted, stopping after line {}", outcome.candidate.line);
                halted = Some(Halt::Interrupted);
                break;
            }
        }

        let summary = aggregator.finish(source.lines_read())?;
        reporter.summary(&summary);

        if let Err(e) = workspace.close() {
            warn!("failed to remove workspace: {}", e);
        }
        Ok(RunReport { summary, halted })
    }

    /// Never fails; per-trial errors become a `Failed` outcome.
    pub async fn run_trial(&mut self, workspace: &Workspace, candidate: Candidate) -> TrialOutcome {
        let started = Instant::now();
        let result = self.try_trial(workspace, &candidate).await;
        debug!("line {} trial took {:?}", candidate.line, started.elapsed());
        match result {
            Ok(latency_ms) => {
                info!("line {} working, {} ms", candidate.line, latency_ms);
                TrialOutcome::working(candidate, latency_ms)
            }
            Err(e) => {
                info!("line {} failed: {}", candidate.line, e);
                TrialOutcome::failed(candidate, e.to_string())
            }
        }
    }

    async fn try_trial(&mut self, workspace: &Workspace, candidate: &Candidate) -> Result<u64, TrialError> {
        let config = workspace.materialize(candidate).map_err(TrialError::Materialize)?;
        let process = self.supervisor.start(config.path(), self.slot.lease()).await?;

        let probed = self
            .prober
            .probe(process.socks_addr(), &self.target, self.probe_timeout)
            .await;
        process.stop().await;

        if let Err(e) = config.release() {
            warn!("failed to remove config for line {}: {}", candidate.line, e);
        }
        Ok(probed?)
    }
}
