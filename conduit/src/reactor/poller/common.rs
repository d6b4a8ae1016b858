use std::os::fd::RawFd;

/// Readiness interest registered for a descriptor.
///
/// Connections only ever use [`Interest::READ`] or
/// [`Interest::READ_WRITE`]; write interest is armed while there is
/// something to flush or a connect to complete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    pub(crate) const READ: Interest = Interest {
        read: true,
        write: false,
    };

    pub(crate) const READ_WRITE: Interest = Interest {
        read: true,
        write: true,
    };
}

/// Wake-up handle backed by a non-blocking `eventfd`.
///
/// Shared between the poller and any thread that needs to interrupt a
/// blocking wait (resolver workers, shutdown requests).
pub(crate) struct Waker(pub(crate) RawFd);

unsafe impl Send for Waker {}
unsafe impl Sync for Waker {}

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}
