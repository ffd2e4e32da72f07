use std::io;
use std::os::raw::c_int;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// One-slot wakeup channel that can be posted to from a signal handler.
///
/// Backed by a non-blocking self-pipe: posting is a single `write(2)` of one
/// byte, and a wait drains everything that is pending, so any number of posts
/// before a wait collapse into a single wakeup.
#[derive(Debug)]
pub struct SignalHandoff {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl SignalHandoff {
    /// Create the underlying pipe
    pub fn new() -> io::Result<Self> {
        let mut fds: [c_int; 2] = [-1; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }

        // Owning the fds first means they get closed if configuring them fails
        let handoff = Self {
            read_fd: fds[0],
            write_fd: fds[1],
        };
        for fd in fds {
            configure_fd(fd)?;
        }
        Ok(handoff)
    }

    /// Post a notification. Async-signal-safe.
    pub fn notify(&self) -> io::Result<()> {
        post(self.write_fd).map_err(io::Error::from_raw_os_error)
    }

    /// Block until a notification is pending, then consume it.
    pub fn wait(&self) -> io::Result<()> {
        self.wait_for(-1).map(|_| ())
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Returns `false` if nothing was posted in time.
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        let millis = c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX);
        self.wait_for(millis)
    }

    pub(crate) fn notify_fd(&self) -> RawFd {
        self.write_fd
    }

    fn wait_for(&self, timeout_ms: c_int) -> io::Result<bool> {
        loop {
            let mut pfd = libc::pollfd {
                fd: self.read_fd,
                events: libc::POLLIN,
                revents: 0,
            };
            let res = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if res < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if res == 0 {
                return Ok(false);
            }
            if self.drain()? {
                return Ok(true);
            }
            // Readable but empty: another consumer got there first
        }
    }

    /// Read until the pipe is empty. Returns whether anything was pending.
    fn drain(&self) -> io::Result<bool> {
        let mut buf = [0u8; 64];
        let mut pending = false;
        loop {
            let n = unsafe { libc::read(self.read_fd, buf.as_mut_ptr().cast(), buf.len()) };
            if n > 0 {
                pending = true;
                continue;
            }
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "notification pipe closed",
                ));
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => return Ok(pending),
                io::ErrorKind::Interrupted => continue,
                _ => return Err(err),
            }
        }
    }
}

impl Drop for SignalHandoff {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

/// Write a single wakeup byte to `fd`, returning the raw errno on failure.
///
/// Only touches `write(2)` and errno so it can run inside a signal handler.
/// A full pipe already holds a pending wakeup and counts as success.
pub(crate) fn post(fd: RawFd) -> Result<(), c_int> {
    let byte = 0u8;
    loop {
        let n = unsafe { libc::write(fd, (&byte as *const u8).cast(), 1) };
        if n == 1 {
            return Ok(());
        }
        match io::Error::last_os_error().raw_os_error().unwrap_or(0) {
            libc::EINTR => continue,
            e if e == libc::EAGAIN || e == libc::EWOULDBLOCK => return Ok(()),
            e => return Err(e),
        }
    }
}

fn configure_fd(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd_flags = libc::fcntl(fd, libc::F_GETFD);
        if fd_flags < 0 || libc::fcntl(fd, libc::F_SETFD, fd_flags | libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_notify_then_wait() {
        let handoff = SignalHandoff::new().unwrap();
        handoff.notify().unwrap();
        assert!(handoff.wait_timeout(Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn test_redundant_notifications_coalesce() {
        let handoff = SignalHandoff::new().unwrap();
        handoff.notify().unwrap();
        handoff.notify().unwrap();

        handoff.wait().unwrap();

        // Both posts were consumed by the single wait above
        assert!(!handoff.wait_timeout(Duration::from_millis(50)).unwrap());
    }

    #[test]
    fn test_wait_times_out_without_notification() {
        let handoff = SignalHandoff::new().unwrap();
        let start = Instant::now();
        assert!(!handoff.wait_timeout(Duration::from_millis(50)).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_wakes_waiter_on_another_thread() {
        let handoff = Arc::new(SignalHandoff::new().unwrap());

        let waiter = {
            let handoff = handoff.clone();
            thread::spawn(move || handoff.wait())
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        handoff.notify().unwrap();
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn test_saturated_pipe_still_succeeds() {
        let handoff = SignalHandoff::new().unwrap();
        // Far more than a pipe buffer holds
        for _ in 0..200_000 {
            handoff.notify().unwrap();
        }
        handoff.wait().unwrap();
        assert!(!handoff.wait_timeout(Duration::from_millis(10)).unwrap());
    }

    #[test]
    fn test_post_to_closed_fd_reports_errno() {
        assert_eq!(post(-1), Err(libc::EBADF));
    }
}
