//! Socket plumbing for the RTSP control and media planes.
//!
//! - [`tcp`] — non-blocking connect to the RTSP server, so the session
//!   state machine can wait for writability through the host poll loop
//!   instead of blocking.
//! - [`udp`] — the adjacent RTP/RTCP port pair (even RTP, odd RTCP) that
//!   SAT>IP servers expect a unicast client to advertise.
//! - [`framer`] — demultiplexes the inbound TCP byte stream into RTSP text
//!   responses and `$`-prefixed interleaved media frames.

pub mod framer;
pub mod tcp;
pub mod udp;

use std::os::fd::{AsFd, AsRawFd};

/// Size the kernel receive buffer of a media-carrying socket.
///
/// Tries the privileged `SO_RCVBUFFORCE` first (lets root exceed
/// `rmem_max`), then the plain `SO_RCVBUF`. Failures are logged and
/// otherwise ignored; an undersized buffer degrades, it does not break.
pub fn set_receive_buffer<S: AsFd>(socket: &S, bytes: usize) {
    let size = bytes as libc::c_int;
    let res = unsafe {
        libc::setsockopt(
            socket.as_fd().as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVBUFFORCE,
            &size as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if res != 0 {
        tracing::debug!(bytes, "SO_RCVBUFFORCE not permitted");
    }

    let sock = socket2::SockRef::from(socket);
    if let Err(e) = sock.set_recv_buffer_size(bytes) {
        tracing::warn!(bytes, error = %e, "unable to set receive buffer size");
    }
    if let Ok(actual) = sock.recv_buffer_size() {
        tracing::debug!(requested = bytes, actual, "receive buffer sized");
    }
}
