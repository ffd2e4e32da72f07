use std::io;
use std::mem;
use std::os::raw::c_int;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use super::handoff::{post, SignalHandoff};
use super::SignalError;

/// Signals that request a clean shutdown
pub const SHUTDOWN_SIGNALS: &[c_int] = &[libc::SIGINT, libc::SIGTERM, libc::SIGHUP, libc::SIGQUIT];

// Write end of the installed handoff pipe, -1 when no guard is alive.
static NOTIFY_FD: AtomicI32 = AtomicI32::new(-1);
static SHUTDOWN_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Claim the right to start shutdown. Only the first caller gets `true`.
///
/// The signal handler claims it before posting, so does anything else that
/// wants to wake the main thread; later signals are then ignored.
pub fn claim_shutdown() -> bool {
    SHUTDOWN_CLAIMED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

/// Installed signal handlers. Dropping the guard restores the previous ones.
pub struct SignalGuard {
    saved: Vec<(c_int, libc::sigaction)>,
    _handoff: Arc<SignalHandoff>,
}

impl SignalGuard {
    /// Route `signals` to `handoff`. Only one guard may be alive at a time.
    pub fn install(handoff: Arc<SignalHandoff>, signals: &[c_int]) -> Result<Self, SignalError> {
        NOTIFY_FD
            .compare_exchange(-1, handoff.notify_fd(), Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SignalError::AlreadyInstalled)?;
        SHUTDOWN_CLAIMED.store(false, Ordering::Release);

        let mut guard = Self {
            saved: Vec::with_capacity(signals.len()),
            _handoff: handoff,
        };

        for &signal in signals {
            let previous = unsafe {
                let mut action: libc::sigaction = mem::zeroed();
                action.sa_sigaction = on_signal as extern "C" fn(c_int) as libc::sighandler_t;
                action.sa_flags = libc::SA_RESTART;
                libc::sigemptyset(&mut action.sa_mask);

                let mut previous: libc::sigaction = mem::zeroed();
                if libc::sigaction(signal, &action, &mut previous) != 0 {
                    // `guard` drops on return and puts back what was already replaced
                    return Err(SignalError::Install {
                        signal,
                        source: io::Error::last_os_error(),
                    });
                }
                previous
            };
            guard.saved.push((signal, previous));
        }

        tracing::debug!("Installed handlers for {} signal(s)", guard.saved.len());
        Ok(guard)
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        for (signal, previous) in self.saved.drain(..).rev() {
            if unsafe { libc::sigaction(signal, &previous, ptr::null_mut()) } != 0 {
                tracing::warn!(
                    "Failed to restore handler for signal {}: {}",
                    signal,
                    io::Error::last_os_error()
                );
            }
        }
        NOTIFY_FD.store(-1, Ordering::Release);
    }
}

extern "C" fn on_signal(signal: c_int) {
    let _errno = ErrnoGuard::save();
    if !claim_shutdown() {
        return;
    }

    let mut msg = StackMsg::new();
    msg.push(b" --- Got signal: ");
    msg.push_int(signal);
    msg.push(b", exiting ---\n");
    write_stderr(msg.as_bytes());

    let fd = NOTIFY_FD.load(Ordering::Acquire);
    if fd >= 0 {
        if let Err(errno) = post(fd) {
            let mut msg = StackMsg::new();
            msg.push(b"Failed to wake main thread, write returned errno ");
            msg.push_int(errno);
            msg.push(b"\n");
            write_stderr(msg.as_bytes());
        }
    }
}

fn write_stderr(bytes: &[u8]) {
    unsafe {
        libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len());
    }
}

/// Fixed-capacity message buffer, since the handler can't allocate.
struct StackMsg {
    buf: [u8; 96],
    len: usize,
}

impl StackMsg {
    fn new() -> Self {
        Self { buf: [0; 96], len: 0 }
    }

    fn push(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(self.buf.len() - self.len);
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
    }

    fn push_int(&mut self, value: c_int) {
        if value < 0 {
            self.push(b"-");
        }
        let mut digits = [0u8; 10];
        let mut rest = value.unsigned_abs();
        let mut i = digits.len();
        loop {
            i -= 1;
            digits[i] = b'0' + (rest % 10) as u8;
            rest /= 10;
            if rest == 0 {
                break;
            }
        }
        self.push(&digits[i..]);
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// Preserves errno across the handler body.
struct ErrnoGuard(c_int);

impl ErrnoGuard {
    fn save() -> Self {
        Self(io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        unsafe {
            *libc::__errno_location() = self.0;
        }
        #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
        unsafe {
            *libc::__error() = self.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_stack_msg_formatting() {
        let mut msg = StackMsg::new();
        msg.push(b"signal ");
        msg.push_int(15);
        msg.push(b" ");
        msg.push_int(0);
        msg.push(b" ");
        msg.push_int(-7);
        assert_eq!(msg.as_bytes(), b"signal 15 0 -7");
    }

    #[test]
    fn test_stack_msg_truncates() {
        let mut msg = StackMsg::new();
        for _ in 0..20 {
            msg.push(b"0123456789");
        }
        assert_eq!(msg.as_bytes().len(), 96);
    }

    fn current_handler(signal: c_int) -> libc::sighandler_t {
        unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            libc::sigaction(signal, ptr::null(), &mut action);
            action.sa_sigaction
        }
    }

    // Everything touching the process-wide handler state lives in one test
    #[test]
    fn test_install_raise_and_restore() {
        let signal = libc::SIGUSR2;
        let original = current_handler(signal);

        let handoff = Arc::new(SignalHandoff::new().unwrap());
        let guard = SignalGuard::install(handoff.clone(), &[signal]).unwrap();
        assert_ne!(current_handler(signal), original);

        assert!(matches!(
            SignalGuard::install(handoff.clone(), &[signal]),
            Err(SignalError::AlreadyInstalled)
        ));

        unsafe { libc::raise(signal) };
        assert!(handoff.wait_timeout(Duration::from_secs(1)).unwrap());

        // Only the first signal posts
        unsafe { libc::raise(signal) };
        assert!(!handoff.wait_timeout(Duration::from_millis(50)).unwrap());
        assert!(!claim_shutdown());

        drop(guard);
        assert_eq!(current_handler(signal), original);

        // A fresh guard re-arms the latch
        let guard = SignalGuard::install(handoff.clone(), &[]).unwrap();
        assert!(claim_shutdown());
        drop(guard);
    }
}
