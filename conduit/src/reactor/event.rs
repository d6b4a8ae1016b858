/// An I/O event reported by the poller.
///
/// An `Event` represents readiness information for a registered file
/// descriptor. Error and hang-up conditions are folded into `readable`, so
/// the next read surfaces them.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Event {
    /// Token the descriptor was registered with.
    pub(crate) token: u64,

    /// Indicates that the file descriptor is readable.
    pub(crate) readable: bool,

    /// Indicates that the file descriptor is writable.
    pub(crate) writable: bool,
}
