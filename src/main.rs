use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use stepmark::output::{FileOutput, Output, StdErrOutput};
use stepmark::plan::{parse_plan, parse_step};
use stepmark::{
    Command, DirMarkerStore, ExecutionContext, MarkerPolicy, Pipeline, PipelineError, Sink,
    Verbosity,
};
use tracing::{Level, warn};

/// Run external commands in order, skipping the ones that already succeeded.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// More output; repeat for debug logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run every step whose marker is missing
    Run(RunArgs),
    /// Show which steps are done, pending or stale
    Status(StepArgs),
    /// Check that every directly spawned program can be found
    Check(StepArgs),
}

#[derive(Args, Debug)]
struct StepArgs {
    /// Plan file, one `MARKER: COMMAND` per line
    #[arg(long, value_parser = parse_path)]
    plan: Option<PathBuf>,

    /// A step in plan syntax: `MARKER: program args` or `MARKER:$ shell text`
    #[arg(short, long = "step", value_name = "STEP")]
    steps: Vec<String>,

    /// Directory the steps run in [default: current directory]
    #[arg(short = 'C', long, value_parser = parse_path)]
    workdir: Option<PathBuf>,

    /// Where markers are kept [default: the working directory]
    #[arg(short, long, value_parser = parse_path)]
    marker_dir: Option<PathBuf>,

    /// Treat markers written for a different command line as stale
    #[arg(long)]
    fingerprint: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    steps: StepArgs,

    /// Extra environment for every step
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    env: Vec<(String, String)>,

    /// Shell used for `MARKER:$` steps
    #[arg(long, default_value = "bash")]
    shell: String,

    /// Append the steps' stdout to this file
    #[arg(long, value_parser = parse_path)]
    stdout: Option<PathBuf>,

    /// Append the steps' stderr to this file
    #[arg(long, value_parser = parse_path)]
    stderr: Option<PathBuf>,

    /// Progress level: quiet, normal or verbose [default: from -v/-q]
    #[arg(long)]
    progress: Option<Verbosity>,

    /// Also append progress lines to this file
    #[arg(long, value_parser = parse_path)]
    progress_log: Option<PathBuf>,

    /// Check programs before running anything
    #[arg(long)]
    preflight: bool,
}

fn parse_path(path: &str) -> Result<PathBuf, String> {
    let home = dirs::home_dir();
    Ok(match (path, home) {
        ("~", Some(home)) => home,
        (p, Some(home)) if p.starts_with("~/") => home.join(&p[2..]),
        (p, _) => PathBuf::from(p),
    })
}

fn parse_env(pair: &str) -> Result<(String, String), String> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {pair:?}")),
    }
}

fn init_logging(cli: &Cli) {
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => Level::WARN,
        (false, 1) => Level::INFO,
        (false, 2) => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_commands(args: &StepArgs) -> Result<Vec<Command>> {
    let mut commands = Vec::new();
    if let Some(path) = &args.plan {
        let text = fs::read_to_string(path)
            .with_context(|| format!("{}: cannot read plan", path.display()))?;
        commands.extend(parse_plan(&text).with_context(|| path.display().to_string())?);
    }
    for spec in &args.steps {
        commands.push(parse_step(spec)?);
    }
    if commands.is_empty() {
        warn!("no steps given; nothing to do");
    }
    Ok(commands)
}

fn build_pipeline(args: &StepArgs, verbosity: Verbosity) -> Result<Pipeline> {
    let marker_dir = args
        .marker_dir
        .clone()
        .or_else(|| args.workdir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let policy = if args.fingerprint {
        MarkerPolicy::Fingerprint
    } else {
        MarkerPolicy::Name
    };

    let mut pipeline = Pipeline::new(verbosity)
        .with_marker_store(DirMarkerStore::new(marker_dir))
        .with_policy(policy);
    for command in load_commands(args)? {
        pipeline.append(command);
    }
    Ok(pipeline)
}

fn context(args: &StepArgs) -> ExecutionContext {
    let mut ctx = ExecutionContext::default();
    ctx.working_dir = args.workdir.clone();
    ctx
}

fn run(args: RunArgs, verbosity: Verbosity) -> Result<()> {
    let verbosity = args.progress.unwrap_or(verbosity);
    let mut pipeline = build_pipeline(&args.steps, verbosity)?;
    if let Some(path) = &args.progress_log {
        pipeline = pipeline.with_progress(Tee {
            file: FileOutput::new(path, true)?,
            stderr: StdErrOutput::new(),
        });
    }

    let mut ctx = context(&args.steps).with_shell(args.shell);
    for (key, value) in args.env {
        ctx = ctx.with_env(key, value);
    }
    if let Some(path) = args.stdout {
        ctx = ctx.with_stdout(Sink::File { path, append: true });
    }
    if let Some(path) = args.stderr {
        ctx = ctx.with_stderr(Sink::File { path, append: true });
    }

    if args.preflight {
        pipeline.check_programs(&ctx).map_err(PipelineError::from)?;
    }

    let report = pipeline.run_in(&ctx)?;
    if verbosity > Verbosity::Quiet {
        eprintln!(
            "{} steps: {} run, {} already done",
            report.outcomes.len(),
            report.executed(),
            report.skipped()
        );
    }
    Ok(())
}

fn status(args: StepArgs) -> Result<()> {
    let pipeline = build_pipeline(&args, Verbosity::Quiet)?;
    for step in pipeline.status()? {
        println!("{:<8} {:<20} {}", step.state, step.marker_id, step.invocation);
    }
    Ok(())
}

fn check(args: StepArgs) -> Result<()> {
    let pipeline = build_pipeline(&args, Verbosity::Quiet)?;
    pipeline
        .check_programs(&context(&args))
        .map_err(PipelineError::from)?;
    println!("all programs found");
    Ok(())
}

/// Progress to stderr and to a log file.
struct Tee {
    file: FileOutput,
    stderr: StdErrOutput,
}

impl Output for Tee {
    fn print(&mut self, text: &str) {
        self.file.print(text);
        self.stderr.print(text);
    }
}

fn report(err: &anyhow::Error) -> ExitCode {
    eprintln!("stepmark: {err:#}");
    let Some(err) = err.downcast_ref::<PipelineError>() else {
        return ExitCode::FAILURE;
    };
    if let PipelineError::Execution(e) = err {
        for line in &e.stderr_tail {
            eprintln!("  | {line}");
        }
        eprintln!("completed steps keep their markers; rerun to resume at {}", e.marker_id);
    }
    ExitCode::from(err.exit_code() as u8)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let verbosity = match (cli.quiet, cli.verbose) {
        (true, _) => Verbosity::Quiet,
        (false, 0) => Verbosity::Normal,
        _ => Verbosity::Verbose,
    };

    let result = match cli.command {
        Cmd::Run(args) => run(args, verbosity),
        Cmd::Status(args) => status(args),
        Cmd::Check(args) => check(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err),
    }
}
