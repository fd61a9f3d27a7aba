use crate::command::Command;
use crate::error::{ConfigError, ExecutionError, PipelineError};
use crate::executor::{ExecutionContext, Executor, ProcessExecutor};
use crate::finder::resolve_program;
use crate::marker::{DirMarkerStore, MarkerStore};
use crate::output::{Output, StdErrOutput};
use std::time::Instant;
use strum_macros::{Display, EnumString};
use tracing::{info, warn};

/// How much progress the pipeline echoes. Has no effect on execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

/// What a marker has to match for its step to count as done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MarkerPolicy {
    /// Presence of the named marker is enough.
    #[default]
    Name,
    /// The marker must also record the current invocation's fingerprint.
    Fingerprint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum StepState {
    Done,
    Pending,
    /// A marker exists but was written for a different invocation.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Skipped,
    Succeeded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStatus {
    pub marker_id: String,
    pub state: StepState,
    pub invocation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub outcomes: Vec<(String, StepOutcome)>,
}

impl RunReport {
    pub fn executed(&self) -> usize {
        self.count(StepOutcome::Succeeded)
    }

    pub fn skipped(&self) -> usize {
        self.count(StepOutcome::Skipped)
    }

    fn count(&self, outcome: StepOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }
}

/// Ordered, strictly sequential executor of [`Command`]s.
///
/// Each command's marker is checked before it runs: a present marker means
/// the command already succeeded in an earlier run and it is skipped. A
/// marker is written only after its command exits successfully, and the
/// first failure stops the run, so re-running resumes at the failed step.
pub struct Pipeline {
    steps: Vec<Command>,
    verbosity: Verbosity,
    policy: MarkerPolicy,
    markers: Box<dyn MarkerStore>,
    executor: Box<dyn Executor>,
    progress: Box<dyn Output>,
}

impl Pipeline {
    /// Markers go to the driver's current directory, progress to stderr.
    /// The marker directory does not follow
    /// [`ExecutionContext::working_dir`]; pass a store with
    /// [`Pipeline::with_marker_store`] to keep markers next to the outputs.
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            steps: Vec::new(),
            verbosity,
            policy: MarkerPolicy::default(),
            markers: Box::new(DirMarkerStore::new(".")),
            executor: Box::new(ProcessExecutor::new()),
            progress: Box::new(StdErrOutput::new()),
        }
    }

    pub fn with_marker_store(mut self, markers: impl MarkerStore + 'static) -> Self {
        self.markers = Box::new(markers);
        self
    }

    pub fn with_executor(mut self, executor: impl Executor + 'static) -> Self {
        self.executor = Box::new(executor);
        self
    }

    pub fn with_progress(mut self, progress: impl Output + 'static) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn with_policy(mut self, policy: MarkerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn append(&mut self, command: Command) {
        self.steps.push(command);
    }

    pub fn steps(&self) -> &[Command] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn run(&mut self) -> Result<RunReport, PipelineError> {
        self.run_in(&ExecutionContext::default())
    }

    /// Runs every step with `ctx`. Markers are read from and written to the
    /// configured store, which is independent of `ctx.working_dir`.
    pub fn run_in(&mut self, ctx: &ExecutionContext) -> Result<RunReport, PipelineError> {
        let Self {
            steps,
            verbosity,
            policy,
            markers,
            executor,
            progress,
        } = self;
        let mut say = |level: Verbosity, text: String| {
            if *verbosity >= level {
                progress.print(&text);
            }
        };

        let total = steps.len();
        let mut report = RunReport::default();

        for (index, command) in steps.iter().enumerate() {
            let id = command.marker_id();
            let tag = format!("[{}/{total}] {id}", index + 1);

            match marker_state(&**markers, *policy, command)? {
                StepState::Done => {
                    info!(marker = id, "skipping completed step");
                    say(Verbosity::Normal, format!("{tag}: already done, skipping"));
                    report.outcomes.push((id.to_string(), StepOutcome::Skipped));
                    continue;
                }
                StepState::Stale => {
                    warn!(marker = id, "marker was written for a different invocation");
                    say(Verbosity::Normal, format!("{tag}: invocation changed, re-running"));
                }
                StepState::Pending => {}
            }

            say(Verbosity::Normal, format!("{tag}: running"));
            say(Verbosity::Verbose, format!("{tag}: $ {}", command.invocation()));
            info!(marker = id, invocation = %command.invocation(), "running step");

            let started = Instant::now();
            executor
                .execute(command.invocation(), ctx)
                .map_err(|failed| ExecutionError {
                    step: index + 1,
                    marker_id: id.to_string(),
                    invocation: command.invocation().to_string(),
                    failure: failed.failure,
                    stderr_tail: failed.stderr_tail,
                })?;

            markers.create(id, &command.fingerprint())?;
            say(
                Verbosity::Verbose,
                format!("{tag}: finished in {:.1?}", started.elapsed()),
            );
            report.outcomes.push((id.to_string(), StepOutcome::Succeeded));
        }

        Ok(report)
    }

    /// Marker state of every step, without running anything.
    pub fn status(&self) -> Result<Vec<StepStatus>, PipelineError> {
        self.steps
            .iter()
            .map(|command| {
                Ok(StepStatus {
                    marker_id: command.marker_id().to_string(),
                    state: marker_state(&*self.markers, self.policy, command)?,
                    invocation: command.invocation().to_string(),
                })
            })
            .collect()
    }

    /// Fails on the first directly spawned program that cannot be found.
    /// Shell text is not inspected.
    pub fn check_programs(&self, ctx: &ExecutionContext) -> Result<(), ConfigError> {
        for command in &self.steps {
            for program in command.invocation().programs() {
                if resolve_program(program, ctx.working_dir.as_deref()).is_none() {
                    return Err(ConfigError::MissingProgram {
                        program: program.to_string(),
                        marker_id: command.marker_id().to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn marker_state(
    markers: &dyn MarkerStore,
    policy: MarkerPolicy,
    command: &Command,
) -> Result<StepState, PipelineError> {
    let id = command.marker_id();
    let state = match policy {
        MarkerPolicy::Name if markers.exists(id)? => StepState::Done,
        MarkerPolicy::Name => StepState::Pending,
        // Contents that do not parse as a fingerprint simply fail to match.
        MarkerPolicy::Fingerprint => match markers.read(id)? {
            None => StepState::Pending,
            Some(stored) if stored == command.fingerprint() => StepState::Done,
            Some(_) => StepState::Stale,
        },
    };
    Ok(state)
}
