//! RTP/RTCP reception in both transport modes.
//!
//! In UDP-data mode the receiver owns an adjacent socket pair and a
//! dedicated worker thread that blocks in `poll(2)` over both sockets,
//! feeding every datagram through a [`Depacketizer`]. In TCP-data mode
//! there is no thread: the session extracts `$`-framed blocks from the
//! control connection and pushes them in via
//! [`RtpReceiver::accept_interleaved`] on the control thread.
//!
//! Stop signaling uses a one-slot command channel rather than a shared
//! flag; the worker polls with a short timeout so it notices the command
//! and exits, after which [`RtpReceiver::shutdown`] joins it and drops
//! the sockets.

use std::net::UdpSocket;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, SyncSender, TryRecvError, sync_channel};
use std::thread::JoinHandle;

use crate::error::{Result, SatipError};
use crate::transport::framer::INTERLEAVED_HEADER_LEN;
use crate::transport::udp::UdpPair;

use super::rtcp;
use super::rtp::RtpPacket;
use super::{SignalMonitor, TsSink};

/// Worker poll granularity; bounds how long a stop command can linger.
const RECEIVE_POLL_MS: libc::c_int = 200;

/// Interleaved channel numbers (RFC 2326 §10.12, as used by SAT>IP).
const CHANNEL_RTP: u8 = 0;
const CHANNEL_RTCP: u8 = 1;

enum Command {
    Stop,
}

/// Stateful consumer of raw RTP and RTCP packets.
///
/// Tracks the last RTP sequence number to report discontinuities (they
/// are logged, not healed: the TS consumer deals with loss) and fans the
/// two packet kinds out to the sink and the signal monitor.
pub struct Depacketizer {
    sink: Arc<dyn TsSink>,
    monitor: Arc<SignalMonitor>,
    last_sequence: Option<u16>,
}

impl Depacketizer {
    pub fn new(sink: Arc<dyn TsSink>, monitor: Arc<SignalMonitor>) -> Self {
        Self {
            sink,
            monitor,
            last_sequence: None,
        }
    }

    pub fn handle_rtp(&mut self, datagram: &[u8]) {
        let Some(packet) = RtpPacket::parse(datagram) else {
            tracing::debug!(len = datagram.len(), "dropping non-RTP datagram");
            return;
        };

        if let Some(previous) = self.last_sequence {
            let expected = previous.wrapping_add(1);
            if packet.sequence != expected {
                tracing::warn!(
                    expected,
                    received = packet.sequence,
                    "RTP sequence discontinuity"
                );
            }
        }
        self.last_sequence = Some(packet.sequence);

        if packet.payload.is_empty() {
            return;
        }
        if let Err(e) = self.sink.write_ts(packet.payload) {
            tracing::warn!(error = %e, "TS sink write failed");
        }
    }

    pub fn handle_rtcp(&self, packet: &[u8]) {
        match rtcp::parse_compound(packet) {
            Some(status) => {
                tracing::trace!(
                    has_lock = status.has_lock,
                    strength = status.signal_strength,
                    quality = status.signal_quality,
                    "tuner status"
                );
                self.monitor.publish(status);
            }
            None => tracing::trace!("RTCP packet without tuner status"),
        }
    }

    fn reset(&mut self) {
        self.last_sequence = None;
    }
}

struct Worker {
    handle: JoinHandle<()>,
    commands: SyncSender<Command>,
}

/// Media receiver owned by the RTSP session.
///
/// Lifecycle in UDP mode: [`open`](Self::open) before the first SETUP so
/// the bound port can be advertised, [`start`](Self::start) when the
/// session starts establishing, [`shutdown`](Self::shutdown) on every
/// session reset. TCP mode skips all of that and only uses
/// [`accept_interleaved`](Self::accept_interleaved).
pub struct RtpReceiver {
    sink: Arc<dyn TsSink>,
    monitor: Arc<SignalMonitor>,
    endpoint: Option<UdpPair>,
    worker: Option<Worker>,
    inline: Depacketizer,
}

impl RtpReceiver {
    pub fn new(sink: Arc<dyn TsSink>, monitor: Arc<SignalMonitor>) -> Self {
        let inline = Depacketizer::new(sink.clone(), monitor.clone());
        Self {
            sink,
            monitor,
            endpoint: None,
            worker: None,
            inline,
        }
    }

    /// Bind the RTP/RTCP socket pair. Idempotent; returns the RTP port.
    pub fn open(&mut self, buffer_mb: usize) -> Result<u16> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.rtp_port());
        }
        let endpoint = UdpPair::bind(buffer_mb * 1024 * 1024)?;
        let port = endpoint.rtp_port();
        self.endpoint = Some(endpoint);
        Ok(port)
    }

    /// RTP port to advertise as `client_port`, if the pair is bound.
    pub fn rtp_port(&self) -> Option<u16> {
        self.endpoint.as_ref().map(UdpPair::rtp_port)
    }

    /// Spawn the receive thread over the bound socket pair.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let endpoint = self.endpoint.as_ref().ok_or(SatipError::NotConnected)?;
        let rtp = endpoint.rtp.try_clone()?;
        let rtcp = endpoint.rtcp.try_clone()?;
        let depacketizer = Depacketizer::new(self.sink.clone(), self.monitor.clone());

        let (commands, inbox) = sync_channel(1);
        let handle = std::thread::Builder::new()
            .name("satip-rtp".into())
            .spawn(move || receive_loop(rtp, rtcp, depacketizer, inbox))
            .map_err(SatipError::Io)?;

        self.worker = Some(Worker { handle, commands });
        Ok(())
    }

    /// Deliver one `$`-framed block extracted from the control stream,
    /// including its 4-byte header.
    pub fn accept_interleaved(&mut self, frame: &[u8]) {
        if frame.len() < INTERLEAVED_HEADER_LEN {
            return;
        }
        let payload = &frame[INTERLEAVED_HEADER_LEN..];
        match frame[1] {
            CHANNEL_RTP => self.inline.handle_rtp(payload),
            CHANNEL_RTCP => self.inline.handle_rtcp(payload),
            channel => tracing::debug!(channel, "unknown interleaved channel"),
        }
    }

    /// Stop the worker thread (joining it) and close the socket pair.
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.commands.try_send(Command::Stop);
            if worker.handle.join().is_err() {
                tracing::error!("RTP receive thread panicked");
            }
        }
        self.endpoint = None;
        self.inline.reset();
    }
}

impl Drop for RtpReceiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn receive_loop(
    rtp: UdpSocket,
    rtcp: UdpSocket,
    mut depacketizer: Depacketizer,
    inbox: Receiver<Command>,
) {
    tracing::debug!("RTP receive loop started");
    let mut buf = [0u8; 4096];

    loop {
        match inbox.try_recv() {
            Ok(Command::Stop) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        let mut fds = [
            libc::pollfd {
                fd: rtp.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: rtcp.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, RECEIVE_POLL_MS) };
        if ready < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            tracing::error!(error = %err, "poll failed in receive loop");
            break;
        }
        if ready == 0 {
            continue;
        }

        if fds[0].revents & libc::POLLIN != 0 {
            drain(&rtp, &mut buf, |datagram| depacketizer.handle_rtp(datagram));
        }
        if fds[1].revents & libc::POLLIN != 0 {
            drain(&rtcp, &mut buf, |datagram| depacketizer.handle_rtcp(datagram));
        }
    }

    tracing::debug!("RTP receive loop exited");
}

/// Read datagrams until the non-blocking socket is dry.
fn drain(socket: &UdpSocket, buf: &mut [u8], mut each: impl FnMut(&[u8])) {
    loop {
        match socket.recv(buf) {
            Ok(n) => each(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(error = %e, "datagram receive failed");
                break;
            }
        }
    }
}
