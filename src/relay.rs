use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use libc::pid_t;
use log::{debug, warn};

use crate::sig::{signal_group, Signal, SignalQueue, SignalSender, WAKE};

/// A cooperative cancellation flag shared between the shell and its relay.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// The process group of the pipeline currently running, if any.
///
/// Only the foreground loop holds this owning handle and may publish or
/// clear the group. Everybody else gets an [`ActiveView`].
#[derive(Debug, Default)]
pub struct ActivePipeline {
    group: Arc<AtomicI32>,
    forwarded: Arc<AtomicI32>,
}

impl ActivePipeline {
    pub fn new() -> ActivePipeline {
        ActivePipeline::default()
    }

    pub fn publish(&self, pgid: pid_t) {
        self.forwarded.store(0, Ordering::SeqCst);
        self.group.store(pgid, Ordering::SeqCst);
    }

    /// The last signal forwarded to the published group, consumed on read.
    pub fn take_forwarded(&self) -> Option<Signal> {
        Signal::from_raw(self.forwarded.swap(0, Ordering::SeqCst))
    }

    pub fn clear(&self) {
        self.group.store(0, Ordering::SeqCst);
    }

    pub fn view(&self) -> ActiveView {
        ActiveView {
            group: Arc::clone(&self.group),
            forwarded: Arc::clone(&self.forwarded),
        }
    }
}

/// Read-only access to an [`ActivePipeline`]'s process group.
#[derive(Debug, Clone)]
pub struct ActiveView {
    group: Arc<AtomicI32>,
    forwarded: Arc<AtomicI32>,
}

impl ActiveView {
    pub fn process_group(&self) -> Option<pid_t> {
        match self.group.load(Ordering::SeqCst) {
            0 => None,
            pgid => Some(pgid),
        }
    }

    pub(crate) fn note_forwarded(&self, signal: Signal) {
        self.forwarded.store(signal.as_raw(), Ordering::SeqCst);
    }
}

/// Forwards signal notifications to the running pipeline's process group.
pub struct SignalRelay {
    token: CancellationToken,
    waker: SignalSender,
    handle: JoinHandle<()>,
}

impl SignalRelay {
    pub fn spawn<W>(
        mut queue: SignalQueue,
        waker: SignalSender,
        active: ActiveView,
        prompt: String,
        mut out: W,
    ) -> io::Result<SignalRelay>
    where
        W: Write + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = thread::Builder::new()
            .name("signal-relay".into())
            .spawn(move || loop {
                let byte = match queue.recv() {
                    Ok(Some(byte)) => byte,
                    Ok(None) => break,
                    Err(err) => {
                        warn!("signal queue failed: {}", err);
                        break;
                    }
                };

                if cancelled.is_cancelled() {
                    break;
                }
                if byte == WAKE {
                    continue;
                }

                match Signal::from_raw(byte.into()) {
                    Some(signal) => relay(signal, &active, &prompt, &mut out),
                    None => debug!("ignoring unexpected signal {}", byte),
                }
            })?;

        Ok(SignalRelay {
            token,
            waker,
            handle,
        })
    }

    /// Stops the relay and waits for its thread to finish.
    pub fn shutdown(self) {
        self.token.cancel();
        if let Err(err) = self.waker.wake() {
            warn!("could not wake signal relay: {}", err);
            return;
        }
        if self.handle.join().is_err() {
            warn!("signal relay panicked");
        }
    }
}

fn relay<W: Write>(signal: Signal, active: &ActiveView, prompt: &str, out: &mut W) {
    let pgid = match active.process_group() {
        Some(pgid) => pgid,
        None => {
            debug!("{:?} received with no active pipeline", signal);
            return;
        }
    };

    debug!("forwarding {:?} to process group {}", signal, pgid);
    if let Err(err) = signal_group(pgid, signal) {
        // the group may have finished between publication and delivery
        debug!("could not signal process group {}: {}", pgid, err);
    }
    active.note_forwarded(signal);

    let _ = write!(out, "\nReceived interrupt signal (Ctrl+C)\n{}", prompt);
    let _ = out.flush();
}
