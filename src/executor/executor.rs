use crate::command::{Argv, Invocation};
use crate::error::Failure;
use os_pipe::{PipeReader, PipeWriter, pipe};
use std::collections::{BTreeMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command as CmdCommand, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Lines of stderr kept for diagnostics when an invocation fails.
pub const STDERR_TAIL_LINES: usize = 20;

/// Where a child's output stream goes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Sink {
    #[default]
    Inherit,
    Null,
    File { path: PathBuf, append: bool },
}

impl Sink {
    fn open_file(path: &Path, append: bool) -> io::Result<File> {
        if append {
            OpenOptions::new().create(true).append(true).open(path)
        } else {
            File::create(path)
        }
    }

    fn stdio(&self) -> io::Result<Stdio> {
        Ok(match self {
            Sink::Inherit => Stdio::inherit(),
            Sink::Null => Stdio::null(),
            Sink::File { path, append } => Stdio::from(Self::open_file(path, *append)?),
        })
    }

    fn writer(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(match self {
            Sink::Inherit => Box::new(io::stderr()),
            Sink::Null => Box::new(io::sink()),
            Sink::File { path, append } => Box::new(Self::open_file(path, *append)?),
        })
    }

    fn describe(&self) -> String {
        match self {
            Sink::File { path, .. } => path.display().to_string(),
            other => format!("{other:?}"),
        }
    }
}

/// Process state an invocation runs with. Nothing here touches the
/// driver's own working directory or environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub env_remove: Vec<String>,
    pub shell: String,
    pub stdout: Sink,
    pub stderr: Sink,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            working_dir: None,
            env: BTreeMap::new(),
            env_remove: Vec::new(),
            shell: "bash".to_string(),
            stdout: Sink::Inherit,
            stderr: Sink::Inherit,
        }
    }
}

impl ExecutionContext {
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn without_env(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_stdout(mut self, sink: Sink) -> Self {
        self.stdout = sink;
        self
    }

    pub fn with_stderr(mut self, sink: Sink) -> Self {
        self.stderr = sink;
        self
    }
}

/// A failed invocation plus whatever it wrote to stderr last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failed {
    pub failure: Failure,
    pub stderr_tail: Vec<String>,
}

impl From<Failure> for Failed {
    fn from(failure: Failure) -> Self {
        Self {
            failure,
            stderr_tail: Vec::new(),
        }
    }
}

/// Runs one invocation to completion.
pub trait Executor {
    fn execute(&self, invocation: &Invocation, ctx: &ExecutionContext) -> Result<(), Failed>;
}

/// Spawns real processes. Pipes and shell text both get pipefail semantics.
#[derive(Debug, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for ProcessExecutor {
    fn execute(&self, invocation: &Invocation, ctx: &ExecutionContext) -> Result<(), Failed> {
        let sink_failure = |e: io::Error| Failure::Spawn {
            program: ctx.stderr.describe(),
            message: e.to_string(),
        };
        let dest = ctx.stderr.writer().map_err(sink_failure)?;
        let (reader, writer) = pipe().map_err(sink_failure)?;
        let tee = StderrTee::start(reader, dest);

        let result = match invocation {
            Invocation::Argv(argv) => run_stages(std::slice::from_ref(argv), ctx, writer),
            Invocation::Pipe(stages) => run_stages(stages, ctx, writer),
            Invocation::Shell(text) => {
                let argv = Argv::new(ctx.shell.as_str(), ["-o", "pipefail", "-c", text.as_str()]);
                run_stages(std::slice::from_ref(&argv), ctx, writer)
            }
        };

        let stderr_tail = tee.finish();
        result.map_err(|failure| Failed {
            failure,
            stderr_tail,
        })
    }
}

fn build(stage: &Argv, ctx: &ExecutionContext) -> CmdCommand {
    let mut cmd = CmdCommand::new(stage.program());
    cmd.args(stage.args());
    if let Some(dir) = &ctx.working_dir {
        cmd.current_dir(dir);
    }
    for key in &ctx.env_remove {
        cmd.env_remove(key);
    }
    cmd.envs(&ctx.env);
    cmd
}

/// Spawns every stage, wiring stdout of one into stdin of the next, then
/// waits for all of them.
fn run_stages(stages: &[Argv], ctx: &ExecutionContext, stderr: PipeWriter) -> Result<(), Failure> {
    let mut children: Vec<(String, Child)> = Vec::new();
    let mut upstream: Option<PipeReader> = None;
    let last = stages.len().saturating_sub(1);

    for (i, stage) in stages.iter().enumerate() {
        match spawn_stage(stage, ctx, upstream.take(), i == last, &stderr) {
            Ok((child, next)) => {
                debug!(program = stage.program(), pid = child.id(), "spawned");
                children.push((stage.program().to_string(), child));
                upstream = next;
            }
            Err(e) => {
                drop(stderr);
                let _ = wait_all(children);
                return Err(Failure::Spawn {
                    program: stage.program().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    // Our copy must close so the tee sees EOF once the children exit.
    drop(stderr);
    wait_all(children)
}

fn spawn_stage(
    stage: &Argv,
    ctx: &ExecutionContext,
    input: Option<PipeReader>,
    is_last: bool,
    stderr: &PipeWriter,
) -> io::Result<(Child, Option<PipeReader>)> {
    let mut cmd = build(stage, ctx);

    if let Some(reader) = input {
        cmd.stdin(reader);
    }

    let next = if is_last {
        cmd.stdout(ctx.stdout.stdio()?);
        None
    } else {
        let (reader, writer) = pipe()?;
        cmd.stdout(writer);
        Some(reader)
    };

    cmd.stderr(stderr.try_clone()?);
    let child = cmd.spawn()?;
    Ok((child, next))
}

/// Waits for every child; the rightmost failing stage decides the result.
fn wait_all(children: Vec<(String, Child)>) -> Result<(), Failure> {
    let mut failure = None;
    for (program, mut child) in children {
        match child.wait() {
            Ok(status) if status.success() => {}
            Ok(status) => failure = Some(status_failure(status)),
            Err(e) => {
                failure = Some(Failure::Spawn {
                    program,
                    message: e.to_string(),
                })
            }
        }
    }
    failure.map_or(Ok(()), Err)
}

fn status_failure(status: ExitStatus) -> Failure {
    if let Some(code) = status.code() {
        return Failure::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Failure::Signaled(signal);
        }
    }
    Failure::Exited(-1)
}

/// Forwards a child's stderr to its sink while keeping the last lines.
///
/// A step is over when its processes exit, even if a background child still
/// holds the pipe open. The reader thread is then left to forward the rest
/// on its own and the tail is whatever arrived within [`STDERR_DRAIN`].
struct StderrTee {
    tail: Arc<Mutex<VecDeque<String>>>,
    drained: Receiver<()>,
}

/// How long a finished step waits for its stderr pipe to reach EOF.
const STDERR_DRAIN: Duration = Duration::from_millis(200);

impl StderrTee {
    fn start(reader: PipeReader, mut dest: Box<dyn Write + Send>) -> Self {
        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let (done, drained) = mpsc::channel();
        let shared = Arc::clone(&tail);
        thread::spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut line = Vec::new();
            let mut forwarding = true;
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if forwarding
                            && let Err(e) = dest.write_all(&line).and_then(|()| dest.flush())
                        {
                            warn!(error = %e, "cannot forward stderr, dropping the rest");
                            forwarding = false;
                        }
                        let text = String::from_utf8_lossy(&line).trim_end().to_string();
                        if let Ok(mut tail) = shared.lock() {
                            if tail.len() == STDERR_TAIL_LINES {
                                tail.pop_front();
                            }
                            tail.push_back(text);
                        }
                    }
                }
            }
            let _ = done.send(());
        });
        Self { tail, drained }
    }

    fn finish(self) -> Vec<String> {
        if self.drained.recv_timeout(STDERR_DRAIN).is_err() {
            debug!("stderr still open after the step exited");
        }
        self.tail
            .lock()
            .map(|tail| tail.iter().cloned().collect())
            .unwrap_or_default()
    }
}
