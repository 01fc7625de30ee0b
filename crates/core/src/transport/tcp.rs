use std::net::{TcpStream, ToSocketAddrs};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Result, SatipError};

/// Start a non-blocking TCP connect to the RTSP server.
///
/// The returned stream is usually still connecting; the caller watches it
/// for `POLLOUT` through the host poll loop and checks `take_error` once
/// writable. Name resolution walks all addresses and keeps the first
/// socket that either connects immediately (loopback) or reports
/// `EINPROGRESS`.
pub fn connect_nonblocking(host: &str, port: u16) -> Result<TcpStream> {
    let mut last_error: Option<std::io::Error> = None;

    for addr in (host, port).to_socket_addrs()? {
        let socket = match Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        {
            Ok(socket) => socket,
            Err(e) => {
                last_error = Some(e);
                continue;
            }
        };
        if let Err(e) = socket.set_nonblocking(true) {
            last_error = Some(e);
            continue;
        }
        match socket.connect(&addr.into()) {
            Ok(()) => return Ok(socket.into()),
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {
                tracing::debug!(%addr, "connection in progress");
                return Ok(socket.into());
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "connect failed, trying next address");
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .map(SatipError::Io)
        .unwrap_or_else(|| SatipError::Io(std::io::ErrorKind::AddrNotAvailable.into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn connects_to_local_listener() {
        use std::os::fd::AsRawFd;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = connect_nonblocking("127.0.0.1", port).unwrap();
        let (accepted, _) = listener.accept().unwrap();

        let mut fds = [libc::pollfd {
            fd: stream.as_raw_fd(),
            events: libc::POLLOUT,
            revents: 0,
        }];
        let n = unsafe { libc::poll(fds.as_mut_ptr(), 1, 2000) };
        assert_eq!(n, 1, "socket never became writable");
        assert!(stream.take_error().unwrap().is_none());

        // The stream must be non-blocking: a read with no data errors
        // with WouldBlock instead of hanging.
        let mut probe = [0u8; 1];
        let err = (&stream).read(&mut probe).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
        drop(accepted);
    }

    #[test]
    fn unresolvable_host_is_an_error() {
        assert!(connect_nonblocking("host.invalid.", 554).is_err());
    }
}
