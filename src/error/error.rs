use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("empty invocation")]
    EmptyInvocation,
    #[error("pipe stage {index} is empty")]
    EmptyPipeStage { index: usize },
    #[error("invalid marker id {0:?}")]
    InvalidMarkerId(String),
    #[error("line {line}: {message}")]
    Plan { line: usize, message: String },
    #[error("invalid step {spec:?}: {message}")]
    Step { spec: String, message: String },
    #[error("{program}: command not found (step {marker_id})")]
    MissingProgram { program: String, marker_id: String },
}

/// How an invocation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    Exited(i32),
    Signaled(i32),
    Spawn { program: String, message: String },
}

impl Failure {
    /// Exit code the driver should terminate with.
    pub fn exit_code(&self) -> i32 {
        match self {
            Failure::Exited(code) if (1..=255).contains(code) => *code,
            Failure::Signaled(signal) => 128 + signal,
            _ => 1,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Exited(code) => write!(f, "exit status {code}"),
            Failure::Signaled(signal) => write!(f, "killed by signal {signal}"),
            Failure::Spawn { program, message } => write!(f, "{program}: {message}"),
        }
    }
}

#[derive(Debug, Error)]
#[error("step {step} ({marker_id}) failed with {failure}: {invocation}")]
pub struct ExecutionError {
    pub step: usize,
    pub marker_id: String,
    pub invocation: String,
    pub failure: Failure,
    pub stderr_tail: Vec<String>,
}

#[derive(Debug, Error)]
pub enum MarkerError {
    #[error("cannot read marker {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("cannot write marker {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Marker(#[from] MarkerError),
}

impl PipelineError {
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Execution(e) => e.failure.exit_code(),
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_passthrough() {
        assert_eq!(Failure::Exited(3).exit_code(), 3);
        assert_eq!(Failure::Exited(0).exit_code(), 1);
        assert_eq!(Failure::Exited(300).exit_code(), 1);
        assert_eq!(Failure::Signaled(9).exit_code(), 137);
    }

    #[test]
    fn test_execution_error_message() {
        let err = ExecutionError {
            step: 1,
            marker_id: "m2".into(),
            invocation: "false".into(),
            failure: Failure::Exited(1),
            stderr_tail: Vec::new(),
        };
        assert_eq!(err.to_string(), "step 1 (m2) failed with exit status 1: false");
    }
}
