use std::env;
use std::ffi::{CStr, OsStr};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use log::debug;
use thiserror::Error;

use crate::execution::{PipelineInput, PipelineRequest, StageSpec};
use crate::parser::{self, Segment};

#[derive(Debug, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("syntax error: `{0}` must be the first command of a line")]
    MisplacedBuiltin(&'static str),
    #[error("syntax error: `pwd` can only start a pipeline")]
    MisplacedPwd,
    #[error("syntax error: unexpected input `{0}`")]
    Unparsed(String),
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("cd: cannot determine the home directory")]
    NoHome,
    #[error("cd: {}: {source}", .path.display())]
    Change { path: PathBuf, source: io::Error },
}

/// A `cd` request; no target means the user's home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDirectory {
    target: Option<PathBuf>,
}

impl ChangeDirectory {
    pub fn new(target: Option<&str>) -> ChangeDirectory {
        ChangeDirectory {
            target: target.map(PathBuf::from),
        }
    }

    /// Changes the working directory of the shell, returning the new one.
    pub fn apply(&self) -> Result<PathBuf, DirectoryError> {
        let path = match &self.target {
            Some(target) => target.clone(),
            None => home_dir().ok_or(DirectoryError::NoHome)?,
        };

        debug!("changing directory to {}", path.display());
        env::set_current_dir(&path).map_err(|source| DirectoryError::Change {
            path: path.clone(),
            source,
        })?;

        env::current_dir().map_err(|source| DirectoryError::Change { path, source })
    }
}

/// What remains of a line after its built-ins are recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Nothing,
    PrintWorkingDirectory,
    Pipeline(PipelineRequest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Empty,
    Exit,
    Commands {
        change_dir: Option<ChangeDirectory>,
        job: Job,
    },
}

/// Classifies one line of input. Nothing is executed here; a line with a
/// misplaced built-in is rejected as a whole.
pub fn interpret(raw_line: &str) -> Result<Line, SyntaxError> {
    let line = raw_line.trim();
    if line.is_empty() {
        return Ok(Line::Empty);
    }

    let (rest, segments) =
        parser::parse(line).map_err(|err| SyntaxError::Unparsed(err.to_string()))?;
    if !rest.is_empty() {
        return Err(SyntaxError::Unparsed(rest.to_owned()));
    }

    let (change_dir, rest) = match segments.as_slice() {
        [] => return Ok(Line::Empty),
        [Segment::Exit, ..] => return Ok(Line::Exit),
        [Segment::ChangeDirectory(target), rest @ ..] => {
            (Some(ChangeDirectory::new(*target)), rest)
        }
        rest => (None, rest),
    };

    let (input, rest) = match rest {
        [Segment::Pwd, rest @ ..] => (PipelineInput::WorkingDirectory, rest),
        rest => (PipelineInput::Inherit, rest),
    };

    let mut stages = Vec::with_capacity(rest.len());
    for segment in rest {
        match segment {
            Segment::External { name, parameters } => stages.push(StageSpec::new(
                *name,
                parameters.iter().map(|p| p.to_string()).collect(),
            )),
            Segment::Exit => return Err(SyntaxError::MisplacedBuiltin("exit")),
            Segment::ChangeDirectory(_) => return Err(SyntaxError::MisplacedBuiltin("cd")),
            Segment::Pwd => return Err(SyntaxError::MisplacedPwd),
        }
    }

    let job = match PipelineRequest::new(input, stages) {
        Some(request) => Job::Pipeline(request),
        None if input == PipelineInput::WorkingDirectory => Job::PrintWorkingDirectory,
        None => Job::Nothing,
    };

    Ok(Line::Commands { change_dir, job })
}

/// `$HOME`, or the home directory from the password database.
pub fn home_dir() -> Option<PathBuf> {
    match env::var_os("HOME") {
        Some(home) if !home.is_empty() => Some(PathBuf::from(home)),
        _ => {
            let passwd = unsafe { libc::getpwuid(libc::getuid()) };
            if passwd.is_null() || unsafe { (*passwd).pw_dir.is_null() } {
                return None;
            }

            let dir = unsafe { CStr::from_ptr((*passwd).pw_dir) };
            Some(PathBuf::from(OsStr::from_bytes(dir.to_bytes())))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::path::PathBuf;

    use super::{interpret, ChangeDirectory, DirectoryError, Job, Line, SyntaxError};
    use crate::execution::{PipelineInput, PipelineRequest, StageSpec};
    use crate::test_support::{lock_process, scratch_dir};

    fn spec(name: &str, arguments: &[&str]) -> StageSpec {
        StageSpec::new(name, arguments.iter().map(|a| a.to_string()).collect())
    }

    fn pipeline(input: PipelineInput, stages: Vec<StageSpec>) -> Job {
        Job::Pipeline(PipelineRequest::new(input, stages).unwrap())
    }

    #[test]
    fn test_blank_lines_are_empty() {
        assert_eq!(interpret(""), Ok(Line::Empty));
        assert_eq!(interpret("   \t "), Ok(Line::Empty));
        assert_eq!(interpret(" | | "), Ok(Line::Empty));
    }

    #[test]
    fn test_external_pipeline() {
        assert_eq!(
            interpret("ls -la | grep src\n"),
            Ok(Line::Commands {
                change_dir: None,
                job: pipeline(
                    PipelineInput::Inherit,
                    vec![spec("ls", &["-la"]), spec("grep", &["src"])]
                ),
            })
        );
    }

    #[test]
    fn test_exit_ignores_the_rest_of_the_line() {
        assert_eq!(interpret("exit"), Ok(Line::Exit));
        assert_eq!(interpret("exit 3 | pwd | cd / | exit"), Ok(Line::Exit));
        assert_eq!(interpret(" | exit | echo x"), Ok(Line::Exit));
    }

    #[test]
    fn test_lone_pwd_prints_directly() {
        assert_eq!(
            interpret("pwd"),
            Ok(Line::Commands {
                change_dir: None,
                job: Job::PrintWorkingDirectory,
            })
        );
    }

    #[test]
    fn test_pwd_feeds_a_pipeline() {
        assert_eq!(
            interpret("pwd | wc -c"),
            Ok(Line::Commands {
                change_dir: None,
                job: pipeline(PipelineInput::WorkingDirectory, vec![spec("wc", &["-c"])]),
            })
        );
    }

    #[test]
    fn test_cd_runs_before_the_rest_of_the_line() {
        assert_eq!(
            interpret("cd /tmp"),
            Ok(Line::Commands {
                change_dir: Some(ChangeDirectory::new(Some("/tmp"))),
                job: Job::Nothing,
            })
        );
        assert_eq!(
            interpret("cd | pwd | cat"),
            Ok(Line::Commands {
                change_dir: Some(ChangeDirectory::new(None)),
                job: pipeline(PipelineInput::WorkingDirectory, vec![spec("cat", &[])]),
            })
        );
    }

    #[test]
    fn test_misplaced_builtins_are_rejected() {
        assert_eq!(
            interpret("echo a | exit"),
            Err(SyntaxError::MisplacedBuiltin("exit"))
        );
        assert_eq!(
            interpret("ls | cd /tmp"),
            Err(SyntaxError::MisplacedBuiltin("cd"))
        );
        assert_eq!(
            interpret("cd /tmp | cd /"),
            Err(SyntaxError::MisplacedBuiltin("cd"))
        );
        assert_eq!(interpret("echo a | pwd"), Err(SyntaxError::MisplacedPwd));
        assert_eq!(interpret("pwd | pwd"), Err(SyntaxError::MisplacedPwd));
    }

    #[test]
    fn test_change_directory() {
        let _guard = lock_process();
        let previous = env::current_dir().unwrap();
        let target = scratch_dir("cd-target").canonicalize().unwrap();

        let changed = ChangeDirectory::new(target.to_str()).apply().unwrap();
        assert_eq!(changed, target);
        assert_eq!(env::current_dir().unwrap(), target);

        env::set_current_dir(previous).unwrap();
    }

    #[test]
    fn test_change_directory_to_home() {
        let _guard = lock_process();
        let previous = env::current_dir().unwrap();
        let expected = match super::home_dir().map(|home| home.canonicalize()) {
            Some(Ok(home)) => home,
            _ => return,
        };

        assert_eq!(ChangeDirectory::new(None).apply().unwrap(), expected);

        env::set_current_dir(previous).unwrap();
    }

    #[test]
    fn test_change_directory_failure_keeps_cwd() {
        let _guard = lock_process();
        let previous = env::current_dir().unwrap();

        let missing = PathBuf::from("/pipesh/does/not/exist");
        match ChangeDirectory::new(missing.to_str()).apply() {
            Err(DirectoryError::Change { path, .. }) => assert_eq!(path, missing),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(env::current_dir().unwrap(), previous);
    }

    #[test]
    fn test_directory_error_message() {
        let err = ChangeDirectory::new(Some("/pipesh/missing"))
            .apply()
            .unwrap_err();
        assert!(err.to_string().starts_with("cd: /pipesh/missing: "));
    }
}
