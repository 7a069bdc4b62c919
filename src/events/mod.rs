//! Edge notification: native character device or sysfs polling

pub mod edge;
pub mod native;
pub mod source;
pub mod sysfs;

#[cfg(test)]
pub mod simulated;

pub use edge::{CallbackId, CancelToken, Edge, EdgeCallback, EdgeEvent, EdgeMask, WaitResult};
pub use source::{EdgeLine, EdgeProvider, InterruptSource};

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Wait for `events` on a descriptor; false on timeout or signal
pub(crate) fn poll_fd(fd: RawFd, events: libc::c_short, timeout: Duration) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

    // SAFETY: one valid pollfd for the duration of the call.
    let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(rc > 0 && pollfd.revents & events != 0)
}
