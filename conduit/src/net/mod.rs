//! TCP networking primitives.
//!
//! Thin owned wrappers around non-blocking socket descriptors. They close
//! their descriptor on drop and expose `std::io::Read`/`Write` so the
//! proxy's buffers can drive them directly.
//!
//! Neither type registers itself anywhere: the reactor decides what to
//! watch and when.
pub(crate) mod tcp;

pub(crate) use tcp::listener::TcpListener;
pub(crate) use tcp::stream::TcpStream;
