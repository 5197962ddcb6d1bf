//! Process-wide stop request that can wake a blocked poll.
//!
//! A [`Shutdown`] pairs a flag with a self-pipe. The read end sits in every
//! poll snapshot; [`Shutdown::trigger`] and the installed signal handler write
//! a byte to the other end, so a loop parked in `poll(2)` wakes up and sees the
//! request. The flag only ever moves from "running" to "stop requested".

use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// Write end of the pipe the signal handler pokes. -1 until installed.
static SIGNAL_WAKE_FD: AtomicI32 = AtomicI32::new(-1);
/// Set by the signal handler; only read by handles that installed it.
static SIGNAL_RECEIVED: AtomicBool = AtomicBool::new(false);

#[derive(Debug)]
struct Inner {
    requested: AtomicBool,
    signals: AtomicBool,
    wake_rx: UnixStream,
    wake_tx: UnixStream,
}

/// Cloneable handle to the stop request.
#[derive(Debug, Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> io::Result<Self> {
        let (wake_rx, wake_tx) = UnixStream::pair()?;
        wake_rx.set_nonblocking(true)?;
        wake_tx.set_nonblocking(true)?;
        Ok(Self {
            inner: Arc::new(Inner {
                requested: AtomicBool::new(false),
                signals: AtomicBool::new(false),
                wake_rx,
                wake_tx,
            }),
        })
    }

    /// Requests a stop and wakes the loop. Repeated calls are no-ops.
    pub fn trigger(&self) {
        if !self.inner.requested.swap(true, Ordering::AcqRel) {
            // A full pipe already holds a pending wake-up.
            let _ = (&self.inner.wake_tx).write(&[1]);
        }
    }

    /// True once a stop was triggered, a wake byte was acknowledged, or an
    /// installed SIGINT/SIGTERM handler fired.
    #[inline]
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
            || (self.inner.signals.load(Ordering::Relaxed)
                && SIGNAL_RECEIVED.load(Ordering::Acquire))
    }

    /// Descriptor the event loop polls for wake-ups.
    #[inline]
    pub fn wake_fd(&self) -> RawFd {
        self.inner.wake_rx.as_raw_fd()
    }

    /// Consumes pending wake-up bytes. Every byte on the pipe is a stop
    /// request, whether it came from [`Shutdown::trigger`] or a signal.
    pub fn acknowledge(&self) {
        let mut buf = [0u8; 64];
        let mut woke = false;
        loop {
            match (&self.inner.wake_rx).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => woke = true,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        if woke {
            self.inner.requested.store(true, Ordering::Release);
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(target_vendor = "apple")]
unsafe fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__error() }
}

extern "C" fn on_signal(_sig: libc::c_int) {
    SIGNAL_RECEIVED.store(true, Ordering::Release);

    let fd = SIGNAL_WAKE_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = 1u8;
        // SAFETY: write(2) is async-signal-safe and the descriptor outlives
        // the handler installation. errno is restored so the interrupted
        // code never sees the handler's EAGAIN.
        unsafe {
            let errno = errno_location();
            let saved = *errno;
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
            *errno = saved;
        }
    }
}

/// Routes SIGINT and SIGTERM to `shutdown`.
///
/// The handler is installed without `SA_RESTART` so a blocked `poll(2)`
/// returns `EINTR` as well as finding the pipe readable. `shutdown` must be
/// kept alive for as long as the handlers stay installed.
pub fn install_signal_handlers(shutdown: &Shutdown) -> io::Result<()> {
    SIGNAL_WAKE_FD.store(shutdown.inner.wake_tx.as_raw_fd(), Ordering::Relaxed);
    shutdown.inner.signals.store(true, Ordering::Relaxed);

    for sig in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: the sigaction struct is fully initialised before use and the
        // handler only touches async-signal-safe state.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(sig, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(())
}
