use std::net::UdpSocket;

use crate::error::{Result, SatipError};

/// Bounded number of probe rounds before giving up on a port pair.
const MAX_PAIR_ATTEMPTS: usize = 10;

/// An adjacent RTP/RTCP UDP socket pair (RFC 3550 §11: even RTP port,
/// RTCP on the next odd port).
///
/// The pair is found by probing: bind an OS-assigned port, round up to
/// even if necessary, then claim the odd neighbor. If the neighbor is
/// already taken both sockets are dropped and the probe repeats. Both
/// sockets are non-blocking, ready for the receive loop's `poll`.
#[derive(Debug)]
pub struct UdpPair {
    pub rtp: UdpSocket,
    pub rtcp: UdpSocket,
    rtp_port: u16,
}

impl UdpPair {
    pub fn bind(buffer_bytes: usize) -> Result<Self> {
        for attempt in 0..MAX_PAIR_ATTEMPTS {
            let probe = UdpSocket::bind(("0.0.0.0", 0))?;
            let probed = probe.local_addr()?.port();

            let (rtp, rtp_port) = if probed % 2 == 0 {
                (probe, probed)
            } else {
                drop(probe);
                let even = match probed.checked_add(1) {
                    Some(p) => p,
                    None => continue,
                };
                match UdpSocket::bind(("0.0.0.0", even)) {
                    Ok(socket) => (socket, even),
                    Err(_) => {
                        tracing::debug!(attempt, port = even, "even port busy, retrying");
                        continue;
                    }
                }
            };

            let rtcp = match UdpSocket::bind(("0.0.0.0", rtp_port + 1)) {
                Ok(socket) => socket,
                Err(_) => {
                    tracing::debug!(attempt, port = rtp_port + 1, "RTCP neighbor busy, retrying");
                    continue;
                }
            };

            rtp.set_nonblocking(true)?;
            rtcp.set_nonblocking(true)?;
            if buffer_bytes > 0 {
                super::set_receive_buffer(&rtp, buffer_bytes);
            }

            tracing::debug!(rtp_port, rtcp_port = rtp_port + 1, "RTP endpoint bound");
            return Ok(Self { rtp, rtcp, rtp_port });
        }

        Err(SatipError::PortPairExhausted)
    }

    /// Local RTP port, advertised as `client_port` in SETUP.
    pub fn rtp_port(&self) -> u16 {
        self.rtp_port
    }
}
