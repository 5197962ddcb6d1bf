//! Readiness polling over an explicit descriptor list.
//!
//! A [`Snapshot`] is rebuilt from the interest sets before every wait and
//! handed to `poll(2)`. Unlike `select(2)` there is no `FD_SETSIZE` ceiling and
//! no highest-descriptor argument: the kernel is given exactly the entries it
//! has to watch.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// One descriptor reported ready by the last [`Snapshot::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
}

/// The set of descriptors handed to one `poll(2)` call and its results.
#[derive(Debug, Default)]
pub struct Snapshot {
    entries: Vec<libc::pollfd>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Adds `fd` with read interest, plus write interest when `writable`.
    pub fn watch(&mut self, fd: RawFd, writable: bool) {
        let mut events = libc::POLLIN;
        if writable {
            events |= libc::POLLOUT;
        }
        self.entries.push(libc::pollfd {
            fd,
            events,
            revents: 0,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Blocks until at least one watched descriptor is ready.
    ///
    /// `None` waits indefinitely. Returns the number of ready descriptors;
    /// a signal arriving during the wait surfaces as
    /// [`io::ErrorKind::Interrupted`].
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        };

        // SAFETY: `entries` is a live, correctly sized buffer of pollfd for
        // the duration of the call.
        let rc = unsafe {
            libc::poll(
                self.entries.as_mut_ptr(),
                self.entries.len() as libc::nfds_t,
                timeout_ms,
            )
        };

        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(rc as usize)
    }

    /// Descriptors with pending events, in the order they were watched.
    ///
    /// Hang-up, error and invalid-descriptor conditions are reported as
    /// readable so the following read observes end-of-stream or the error.
    pub fn ready(&self) -> impl Iterator<Item = Ready> + '_ {
        self.entries.iter().filter(|e| e.revents != 0).map(|e| Ready {
            fd: e.fd,
            readable: e.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL)
                != 0,
            writable: e.revents & libc::POLLOUT != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn idle_socket_times_out_with_nothing_ready() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut snap = Snapshot::new();
        snap.watch(a.as_raw_fd(), false);

        let n = snap.poll(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(n, 0);
        assert_eq!(snap.ready().count(), 0);
    }

    #[test]
    fn pending_input_is_reported_readable() {
        let (a, mut b) = UnixStream::pair().unwrap();
        b.write_all(b"x").unwrap();

        let mut snap = Snapshot::new();
        snap.watch(a.as_raw_fd(), false);
        assert_eq!(snap.poll(Some(Duration::from_secs(1))).unwrap(), 1);

        let ready: Vec<_> = snap.ready().collect();
        assert_eq!(
            ready,
            vec![Ready {
                fd: a.as_raw_fd(),
                readable: true,
                writable: false,
            }]
        );
    }

    #[test]
    fn write_interest_reports_writable() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut snap = Snapshot::new();
        snap.watch(a.as_raw_fd(), true);
        snap.poll(Some(Duration::from_secs(1))).unwrap();

        let ready: Vec<_> = snap.ready().collect();
        assert_eq!(ready.len(), 1);
        assert!(ready[0].writable);
        assert!(!ready[0].readable);
    }

    #[test]
    fn peer_hangup_is_reported_readable() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);

        let mut snap = Snapshot::new();
        snap.watch(a.as_raw_fd(), false);
        snap.poll(Some(Duration::from_secs(1))).unwrap();
        assert!(snap.ready().next().unwrap().readable);
    }
}
