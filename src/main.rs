pub mod config;
pub mod execution;
pub mod interpreter;
pub mod parser;
pub mod relay;
pub mod shell;
pub mod sig;

use std::error::Error;
use std::io;

use log::debug;

use crate::config::{Config, LOG_VAR};
use crate::relay::{ActivePipeline, SignalRelay};
use crate::shell::{Shell, ShellError};
use crate::sig::{route_signals, signal_queue, Signal};

fn start(config: Config) -> Result<(), ShellError> {
    let (sender, queue) = signal_queue()?;
    route_signals(&sender, &[Signal::Interrupt, Signal::Terminate])?;

    let active = ActivePipeline::new();
    let relay = SignalRelay::spawn(
        queue,
        sender,
        active.view(),
        config.prompt.clone(),
        io::stdout(),
    )?;

    let result = Shell::new(config, active).and_then(|mut shell| {
        shell.print_banner()?;
        shell.run()
    });

    debug!("shutting down");
    relay.shutdown();
    result
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or(LOG_VAR, "warn")).init();

    start(Config::from_env())?;

    Ok(())
}

#[cfg(test)]
mod test_support {
    use std::env;
    use std::fs;
    use std::path::PathBuf;
    use std::process;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    use lazy_static::lazy_static;

    lazy_static! {
        static ref PROCESS_LOCK: Mutex<()> = Mutex::new(());
    }

    /// Serialises tests that touch process-wide state: the working
    /// directory and signal dispositions.
    pub(crate) fn lock_process() -> MutexGuard<'static, ()> {
        PROCESS_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A fresh directory under the system temp dir, unique per test process.
    pub(crate) fn scratch_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("pipesh-{}-{}", process::id(), name));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }
}
