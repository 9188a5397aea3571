use std::env;
use std::io::{self, Write};

use log::{debug, warn};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use thiserror::Error;

use crate::config::Config;
use crate::execution::{execute, report};
use crate::interpreter::{interpret, Job, Line};
use crate::relay::ActivePipeline;
use crate::sig::SigError;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("line editor: {0}")]
    Readline(#[from] ReadlineError),
    #[error("signal setup: {0}")]
    Signal(#[from] SigError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Whether the prompt loop goes on after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Consecutive read failures after which the input is considered gone.
const MAX_READ_FAILURES: usize = 3;

pub struct Shell {
    config: Config,
    editor: DefaultEditor,
    active: ActivePipeline,
    interactive: bool,
}

impl Shell {
    pub fn new(config: Config, active: ActivePipeline) -> Result<Shell, ShellError> {
        Ok(Shell {
            config,
            editor: DefaultEditor::new()?,
            active,
            interactive: unsafe { libc::isatty(libc::STDIN_FILENO) } == 1,
        })
    }

    /// The line editor only draws the prompt on a terminal.
    fn prompt_without_terminal(&self) -> io::Result<()> {
        if !self.interactive {
            let mut out = io::stdout();
            write!(out, "{}", self.config.prompt)?;
            out.flush()?;
        }
        Ok(())
    }

    pub fn print_banner(&self) -> io::Result<()> {
        if self.config.banner {
            let mut out = io::stdout();
            writeln!(out, "Simple Shell")?;
            writeln!(out, "------------------")?;
        }
        Ok(())
    }

    /// Runs the prompt loop until `exit` or the end of input.
    pub fn run(&mut self) -> Result<(), ShellError> {
        let mut failures = 0;

        loop {
            self.prompt_without_terminal()?;
            let line = match self.editor.readline(&self.config.prompt) {
                Ok(line) => {
                    failures = 0;
                    line
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => {
                    debug!("end of input");
                    return Ok(());
                }
                // the bad line is consumed, so the next read starts clean
                Err(ReadlineError::Io(err)) if err.kind() == io::ErrorKind::InvalidData => {
                    eprintln!("Error reading input: {}", err);
                    continue;
                }
                Err(err) => {
                    eprintln!("Error reading input: {}", err);
                    failures += 1;
                    if failures >= MAX_READ_FAILURES {
                        warn!("giving up after {} failed reads", failures);
                        return Ok(());
                    }
                    continue;
                }
            };

            if self.config.history && !line.trim().is_empty() {
                if let Err(err) = self.editor.add_history_entry(line.as_str()) {
                    warn!("could not record history: {}", err);
                }
            }

            match evaluate(&line, &self.active, &mut io::stdout(), &mut io::stderr()) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => return Ok(()),
                Err(err) => warn!("could not write shell output: {}", err),
            }
        }
    }
}

/// Interprets and runs one line of input.
///
/// `out` receives what the shell prints itself, `err` its diagnostics.
/// Pipeline stages write straight to the process' own standard streams.
pub fn evaluate<O, E>(
    raw_line: &str,
    active: &ActivePipeline,
    out: &mut O,
    err: &mut E,
) -> io::Result<Flow>
where
    O: Write,
    E: Write,
{
    let (change_dir, job) = match interpret(raw_line) {
        Ok(Line::Empty) => return Ok(Flow::Continue),
        Ok(Line::Exit) => return Ok(Flow::Exit),
        Ok(Line::Commands { change_dir, job }) => (change_dir, job),
        Err(syntax) => {
            writeln!(err, "{}", syntax)?;
            return Ok(Flow::Continue);
        }
    };

    if let Some(change_dir) = change_dir {
        if let Err(failure) = change_dir.apply() {
            writeln!(err, "{}", failure)?;
        }
    }

    match job {
        Job::Nothing => {}
        Job::PrintWorkingDirectory => match env::current_dir() {
            Ok(dir) => writeln!(out, "{}", dir.display())?,
            Err(failure) => writeln!(err, "pwd: {}", failure)?,
        },
        Job::Pipeline(request) => {
            out.flush()?;
            err.flush()?;
            let outcomes = execute(&request, active);
            report(&outcomes, err)?;
        }
    }

    Ok(Flow::Continue)
}
