//! Resumable, strictly sequential pipelines of external commands.
//!
//! Every [`Command`] carries a marker id. After a command succeeds its marker
//! is written, and on the next run commands whose marker exists are skipped,
//! so a pipeline that failed half way resumes at the failed step.

pub mod command {
    #[allow(clippy::module_inception)]
    mod command;
    pub use command::*;
}

pub mod error {
    #[allow(clippy::module_inception)]
    mod error;
    pub use error::*;
}

pub mod executor {
    #[allow(clippy::module_inception)]
    mod executor;
    pub use executor::*;
}

pub mod finder {
    #[allow(clippy::module_inception)]
    mod finder;
    pub use finder::*;
}

pub mod marker {
    #[allow(clippy::module_inception)]
    mod marker;
    pub use marker::*;
}

pub mod output {
    #[allow(clippy::module_inception)]
    mod output;
    pub use output::*;
}

pub mod pipeline {
    #[allow(clippy::module_inception)]
    mod pipeline;
    pub use pipeline::*;
}

pub mod plan {
    #[allow(clippy::module_inception)]
    mod plan;
    pub use plan::*;
}

pub use command::{Argv, Command, Invocation};
pub use error::{ConfigError, ExecutionError, Failure, MarkerError, PipelineError};
pub use executor::{ExecutionContext, Executor, ProcessExecutor, Sink};
pub use marker::{DirMarkerStore, MarkerStore};
pub use pipeline::{
    MarkerPolicy, Pipeline, RunReport, StepOutcome, StepState, StepStatus, Verbosity,
};
