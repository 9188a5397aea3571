use std::env;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::os::unix::io::{FromRawFd, OwnedFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use libc::{c_int, pid_t};
use log::{debug, warn};

use crate::relay::ActivePipeline;
use crate::sig::signal_group;

/// One `|`-delimited segment naming an external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub command_name: String,
    pub arguments: Vec<String>,
}

impl StageSpec {
    pub fn new<S: Into<String>>(command_name: S, arguments: Vec<String>) -> StageSpec {
        StageSpec {
            command_name: command_name.into(),
            arguments,
        }
    }
}

impl fmt::Display for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command_name)?;
        for argument in &self.arguments {
            write!(f, " {}", argument)?;
        }
        Ok(())
    }
}

/// What the first stage of a pipeline reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineInput {
    /// The shell's own standard input.
    Inherit,
    /// The current working directory, written by a shell-internal producer.
    WorkingDirectory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRequest {
    input: PipelineInput,
    stages: Vec<StageSpec>,
}

impl PipelineRequest {
    /// Returns `None` for an empty stage list.
    pub fn new(input: PipelineInput, stages: Vec<StageSpec>) -> Option<PipelineRequest> {
        if stages.is_empty() {
            None
        } else {
            Some(PipelineRequest { input, stages })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    NormalExit(i32),
    SignaledExit(c_int),
    LaunchFailure(String),
    /// The stage started but its status could not be collected.
    StatusUnavailable(String),
}

impl ExitOutcome {
    fn from_status(status: ExitStatus) -> ExitOutcome {
        match status.code() {
            Some(code) => ExitOutcome::NormalExit(code),
            None => ExitOutcome::SignaledExit(status.signal().unwrap_or_default()),
        }
    }

    /// The user-facing message for this outcome, if any.
    pub fn diagnostic(&self, spec: &StageSpec) -> Option<String> {
        match self {
            ExitOutcome::NormalExit(0) | ExitOutcome::SignaledExit(_) => None,
            ExitOutcome::NormalExit(code) => {
                Some(format!("Command exited with non-zero status: {}", code))
            }
            ExitOutcome::LaunchFailure(_) => {
                Some(format!("Command not found: {}", spec.command_name))
            }
            ExitOutcome::StatusUnavailable(reason) => Some(format!(
                "Could not collect exit status of {}: {}",
                spec.command_name, reason
            )),
        }
    }
}

/// A unidirectional OS pipe. Both ends are close-on-exec, so a child only
/// ever holds the end it was handed as one of its standard streams.
#[derive(Debug)]
pub struct PipeConnection {
    pub reader: OwnedFd,
    pub writer: OwnedFd,
}

impl PipeConnection {
    pub fn open() -> io::Result<PipeConnection> {
        let mut filedes: [c_int; 2] = [-1, -1];

        match unsafe { libc::pipe2(filedes.as_mut_ptr(), libc::O_CLOEXEC) } {
            -1 => Err(io::Error::last_os_error()),
            _ => Ok(unsafe {
                PipeConnection {
                    reader: OwnedFd::from_raw_fd(filedes[0]),
                    writer: OwnedFd::from_raw_fd(filedes[1]),
                }
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Shell,
    Pipe,
}

#[derive(Debug)]
enum Process {
    Running(Child),
    Failed(io::Error),
}

/// A started stage, owned by the executor until its status is collected.
#[derive(Debug)]
struct Stage {
    spec: StageSpec,
    process: Process,
    input: Endpoint,
    output: Endpoint,
}

impl Stage {
    fn wait(self) -> (StageSpec, ExitOutcome) {
        let outcome = match self.process {
            Process::Running(mut child) => match child.wait() {
                Ok(status) => ExitOutcome::from_status(status),
                Err(err) => {
                    warn!("waiting for {} failed: {}", self.spec.command_name, err);
                    ExitOutcome::StatusUnavailable(err.to_string())
                }
            },
            Process::Failed(err) => ExitOutcome::LaunchFailure(err.to_string()),
        };

        if let ExitOutcome::SignaledExit(signal) = outcome {
            debug!("{} terminated by signal {}", self.spec.command_name, signal);
        }

        (self.spec, outcome)
    }
}

/// Writes the current working directory into `writer` and closes it.
fn spawn_working_directory_writer(writer: OwnedFd) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("pwd-writer".into())
        .spawn(move || {
            let mut pipe = File::from(writer);
            let result = env::current_dir().and_then(|dir| writeln!(pipe, "{}", dir.display()));

            match result {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("pwd reader went away early");
                }
                Err(err) => eprintln!("pwd: {}", err),
            }
        })
}

/// Spawns one stage. The `Command`, and with it the parent's copies of the
/// stage's pipe ends, is dropped before returning.
fn spawn_stage(
    spec: &StageSpec,
    stdin: Stdio,
    stdout: Stdio,
    group: Option<pid_t>,
) -> io::Result<Child> {
    Command::new(&spec.command_name)
        .args(&spec.arguments)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::inherit())
        // not the terminal's foreground group: a stage reading the tty gets SIGTTIN
        .process_group(group.unwrap_or(0))
        .spawn()
}

/// Repeats a signal the relay forwarded while stages were still being
/// spawned, so stages started after it are reached as well.
fn resend_missed_signal(active: &ActivePipeline, pgid: pid_t) {
    if let Some(signal) = active.take_forwarded() {
        debug!("re-sending {:?} to process group {}", signal, pgid);
        if let Err(err) = signal_group(pgid, signal) {
            debug!("could not signal process group {}: {}", pgid, err);
        }
    }
}

/// Starts every stage of `request`, waits for all of them in pipeline
/// order and returns each stage's outcome.
///
/// The process group of the started stages is published through `active`
/// while they run, and cleared before returning.
pub fn execute(request: &PipelineRequest, active: &ActivePipeline) -> Vec<(StageSpec, ExitOutcome)> {
    let mut stages: Vec<Stage> = Vec::with_capacity(request.stages.len());
    let mut group: Option<pid_t> = None;
    let mut writer_task = None;

    let (mut upstream, mut input) = match request.input {
        PipelineInput::Inherit => (None, Endpoint::Shell),
        PipelineInput::WorkingDirectory => {
            match PipeConnection::open().and_then(|conn| {
                let handle = spawn_working_directory_writer(conn.writer)?;
                Ok((conn.reader, handle))
            }) {
                Ok((reader, handle)) => {
                    writer_task = Some(handle);
                    (Some(Stdio::from(reader)), Endpoint::Pipe)
                }
                Err(err) => {
                    eprintln!("pwd: {}", err);
                    (Some(Stdio::null()), Endpoint::Pipe)
                }
            }
        }
    };

    // keep our own buffered output ahead of whatever the children print
    let _ = io::stdout().flush();

    let last = request.stages.len() - 1;
    for (index, spec) in request.stages.iter().enumerate() {
        let stdin = upstream.take().unwrap_or_else(Stdio::inherit);

        let (stdout, output) = if index == last {
            (Ok(Stdio::inherit()), Endpoint::Shell)
        } else {
            match PipeConnection::open() {
                Ok(conn) => {
                    upstream = Some(Stdio::from(conn.reader));
                    (Ok(Stdio::from(conn.writer)), Endpoint::Pipe)
                }
                Err(err) => {
                    upstream = Some(Stdio::null());
                    (Err(err), Endpoint::Pipe)
                }
            }
        };

        let process = match stdout.and_then(|stdout| spawn_stage(spec, stdin, stdout, group)) {
            Ok(child) => {
                let pid = child.id() as pid_t;
                if group.is_none() {
                    group = Some(pid);
                    active.publish(pid);
                }
                debug!("started `{}` as pid {} in group {:?}", spec, pid, group);
                Process::Running(child)
            }
            Err(err) => {
                debug!("could not start `{}`: {}", spec, err);
                Process::Failed(err)
            }
        };

        stages.push(Stage {
            spec: spec.clone(),
            process,
            input,
            output,
        });
        input = output;
    }

    if let Some(pgid) = group {
        resend_missed_signal(active, pgid);
    }

    let outcomes = stages
        .into_iter()
        .map(|stage| {
            debug!(
                "waiting for {} ({:?} -> {:?})",
                stage.spec.command_name, stage.input, stage.output
            );
            stage.wait()
        })
        .collect();

    if let Some(handle) = writer_task {
        if handle.join().is_err() {
            warn!("pwd writer panicked");
        }
    }

    active.clear();
    outcomes
}

/// Writes the diagnostics for `outcomes`, in pipeline order.
pub fn report<W: Write>(outcomes: &[(StageSpec, ExitOutcome)], out: &mut W) -> io::Result<()> {
    for (spec, outcome) in outcomes {
        if let Some(message) = outcome.diagnostic(spec) {
            writeln!(out, "{}", message)?;
        }
    }

    Ok(())
}
