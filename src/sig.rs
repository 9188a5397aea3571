// https://github.com/vorner/signal-hook/blob/master/signal-hook-registry/src/lib.rs

use std::fs::File;
use std::io::{self, Read, Write};
use std::mem::MaybeUninit;
use std::os::unix::io::{AsRawFd, IntoRawFd};
use std::ptr::null_mut;
use std::sync::atomic::{AtomicI32, Ordering};

use libc::{c_int, c_void, sighandler_t, siginfo_t, sigset_t};
use log::debug;
use thiserror::Error;

use crate::execution::PipeConnection;

/// Write end of the notification queue used from signal context, -1 until routed.
static NOTIFY_FD: AtomicI32 = AtomicI32::new(-1);

/// Byte that wakes the queue reader without carrying a signal.
pub(crate) const WAKE: u8 = 0;

#[derive(Debug, PartialEq, Error)]
pub enum SigError {
    #[error("{}", io::Error::from_raw_os_error(*.0))]
    Syscall(c_int),
    #[error("signals are already routed to a notification queue")]
    AlreadyRouted,
}

impl From<io::Error> for SigError {
    fn from(err: io::Error) -> Self {
        SigError::Syscall(err.raw_os_error().unwrap_or(libc::EIO))
    }
}

fn last_error() -> SigError {
    io::Error::last_os_error().into()
}

/// The signals the shell consumes and relays to a running pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl Signal {
    pub fn as_raw(self) -> c_int {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Terminate => libc::SIGTERM,
        }
    }

    pub fn from_raw(signum: c_int) -> Option<Signal> {
        match signum {
            libc::SIGINT => Some(Signal::Interrupt),
            libc::SIGTERM => Some(Signal::Terminate),
            _ => None,
        }
    }
}

/// Producer side of the signal notification queue.
///
/// Each notification is a single byte holding the signal number. The
/// underlying pipe is non-blocking on this side, so a full queue drops
/// notifications instead of stalling a signal handler.
#[derive(Debug)]
pub struct SignalSender {
    writer: File,
}

impl SignalSender {
    pub fn send(&self, signal: Signal) -> io::Result<()> {
        self.push(signal.as_raw() as u8)
    }

    /// Unblocks the consumer so it can observe cancellation.
    pub fn wake(&self) -> io::Result<()> {
        self.push(WAKE)
    }

    fn push(&self, byte: u8) -> io::Result<()> {
        match (&self.writer).write(&[byte]) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                debug!("signal queue full, dropping notification {}", byte);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub fn try_clone(&self) -> io::Result<SignalSender> {
        Ok(SignalSender {
            writer: self.writer.try_clone()?,
        })
    }
}

/// Consumer side of the signal notification queue.
#[derive(Debug)]
pub struct SignalQueue {
    reader: File,
}

impl SignalQueue {
    /// Blocks until the next notification byte arrives.
    ///
    /// Returns `None` once every sender is gone.
    pub fn recv(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }
}

/// Creates a notification queue not yet connected to any signal.
pub fn signal_queue() -> io::Result<(SignalSender, SignalQueue)> {
    let PipeConnection { reader, writer } = PipeConnection::open()?;

    let flags = unsafe { libc::fcntl(writer.as_raw_fd(), libc::F_GETFL) };
    if flags == -1
        || unsafe { libc::fcntl(writer.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1
    {
        return Err(io::Error::last_os_error());
    }

    Ok((
        SignalSender {
            writer: File::from(writer),
        },
        SignalQueue {
            reader: File::from(reader),
        },
    ))
}

pub(crate) extern "C" fn notify_handler(sig: c_int, _info: *mut siginfo_t, _gdata: *mut c_void) {
    let fd = NOTIFY_FD.load(Ordering::Relaxed);
    if fd == -1 {
        return;
    }

    let errno = unsafe { *libc::__errno_location() };
    let byte = sig as u8;
    unsafe { libc::write(fd, &byte as *const u8 as *const c_void, 1) };
    unsafe { *libc::__errno_location() = errno };
}

/// Routes every given signal into the queue fed by `sender`.
///
/// Only one queue per process can receive signals. The routed descriptor
/// is a duplicate of the sender's, kept open for the rest of the process.
pub fn route_signals(sender: &SignalSender, signals: &[Signal]) -> Result<(), SigError> {
    let fd = sender.try_clone()?.writer.into_raw_fd();
    if NOTIFY_FD
        .compare_exchange(-1, fd, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        unsafe { libc::close(fd) };
        return Err(SigError::AlreadyRouted);
    }

    for signal in signals {
        install_sighandler(signal.as_raw(), notify_handler)?;
        debug!("routing {:?} to the signal queue", signal);
    }

    Ok(())
}

pub(crate) fn install_sighandler(
    signum: c_int,
    handler: extern "C" fn(c_int, *mut siginfo_t, *mut c_void),
) -> Result<(), SigError> {
    let mut sa: libc::sigaction = unsafe { MaybeUninit::zeroed().assume_init() };
    sa.sa_flags = libc::SA_RESTART | libc::SA_SIGINFO;
    sa.sa_sigaction = handler as sighandler_t;

    let mask = &mut sa.sa_mask as *mut sigset_t;
    if unsafe { libc::sigemptyset(mask) } == -1 {
        return Err(last_error());
    }

    match unsafe { libc::sigaction(signum, &sa, null_mut()) } {
        -1 => Err(last_error()),
        _ => Ok(()),
    }
}

/// Sends `signal` to every member of process group `pgid`.
pub fn signal_group(pgid: libc::pid_t, signal: Signal) -> io::Result<()> {
    match unsafe { libc::killpg(pgid, signal.as_raw()) } {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}
