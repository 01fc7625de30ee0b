//! RTSP session state machine (RFC 2326 §3, SAT>IP control plane).
//!
//! The session is a client-side state object driving one SAT>IP tuner
//! binding. It owns the TCP control socket, the CSeq counter, the session
//! and stream ids handed out by the first SETUP, the receive buffer the
//! framer works on, and the watchdog/keep-alive timers. It never blocks:
//! the host event loop asks for a poll descriptor and timeout, calls
//! `poll(2)`, and hands results back.
//!
//! ## Session lifecycle
//!
//! ```text
//! ConfigWaiting        -- channel becomes valid --> ServerConnecting
//! ServerConnecting     -- POLLOUT              --> SessionEstablishing
//! SessionEstablishing  -- SETUP response OK    --> SessionPlaying
//! SessionPlaying       -- PLAY response OK     --> SessionTransmitting
//! SessionTransmitting  -- channel/PID change   --> SessionPlaying
//! SessionTransmitting  -- channel invalid      --> SessionTeardowning
//! SessionTeardowning   -- TEARDOWN response OK --> ConfigWaiting
//! any                  -- watchdog, POLLHUP, send error, non-200
//!                                              --> ConfigWaiting
//! ```
//!
//! Exactly one request is in flight at a time. While a response is
//! awaited the keep-alive timer is held off; once the session sits stable
//! in `SessionTransmitting`, OPTIONS refreshes fire shortly before the
//! server-advertised timeout.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ChannelStatus, PidStatus, TunerConfig};
use crate::error::{Result, SatipError};
use crate::media::receiver::RtpReceiver;
use crate::media::{SignalMonitor, TsSink, TunerStatus};
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::timer::{TimerId, TimerWheel};
use crate::transport::framer::{self, FramedMessage, RxBuffer};
use crate::transport::{self, tcp};

/// Default session timeout in seconds (RFC 2326 §12.37), until the SETUP
/// response advertises one.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// Keep-alive fires this many seconds before the session timeout.
const KEEP_ALIVE_MARGIN_SECS: u64 = 5;

/// Watchdog on the non-blocking connect.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Watchdog on every outstanding request.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(6);

/// Watchdog re-armed on interleaved media; fires when the stream stalls.
const TCP_STALL_TIMEOUT: Duration = Duration::from_secs(4);

/// Receive buffer capacity: responses only (UDP data mode).
const UDP_RX_CAPACITY: usize = 2 * 1024;

/// Receive buffer capacity: must hold at least one interleaved frame plus
/// a full response (TCP data mode).
const TCP_RX_CAPACITY: usize = 256 * 1024;

/// RTSP session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtspState {
    /// No valid channel configured; nothing to do.
    ConfigWaiting,
    /// Non-blocking connect in progress, waiting for writability.
    ServerConnecting,
    /// SETUP sent, waiting for its response.
    SessionEstablishing,
    /// PLAY sent, waiting for its response.
    SessionPlaying,
    /// Media flowing; watching for config changes and keep-alive.
    SessionTransmitting,
    /// TEARDOWN sent, waiting for its response.
    SessionTeardowning,
}

/// The request whose response is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Options,
    Setup,
    Play,
    Teardown,
    Describe,
}

impl RequestKind {
    fn method(self) -> &'static str {
        match self {
            Self::Options => "OPTIONS",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Teardown => "TEARDOWN",
            Self::Describe => "DESCRIBE",
        }
    }
}

/// Timer tokens dispatched by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Watchdog: reset the session.
    ResetConnect,
    /// Send an OPTIONS refresh.
    KeepAlive,
    /// Send a DESCRIBE for stream info.
    StreamInfo,
}

/// Client-side RTSP session for one SAT>IP tuner binding.
pub struct RtspSession {
    host: String,
    port: u16,
    config: Arc<dyn TunerConfig>,
    tcp_data: bool,

    stream: Option<TcpStream>,
    state: RtspState,
    cseq: u32,
    session_id: String,
    stream_id: i32,
    timeout_s: u64,

    rx: RxBuffer,
    overrun: bool,
    wait_response: bool,
    last_request: Option<RequestKind>,
    channel_changed: bool,

    receiver: RtpReceiver,
    monitor: Arc<SignalMonitor>,

    timers: TimerWheel<TimerEvent>,
    reset_timer: TimerId,
    keep_alive_timer: TimerId,
    stream_info_timer: TimerId,
}

impl RtspSession {
    /// Create a session bound to one server and one TS sink.
    ///
    /// The transport mode and receive-buffer size are fixed here from the
    /// configuration; everything else is (re)initialized by the first
    /// reset.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        config: Arc<dyn TunerConfig>,
        sink: Arc<dyn TsSink>,
    ) -> Self {
        let host = host.into();
        let tcp_data = config.is_tcp_data();
        let capacity = if tcp_data { TCP_RX_CAPACITY } else { UDP_RX_CAPACITY };
        tracing::debug!(%host, port, tcp_data, "RTSP session created");

        let monitor = Arc::new(SignalMonitor::new());
        let receiver = RtpReceiver::new(sink, monitor.clone());

        let mut timers = TimerWheel::new();
        let reset_timer = timers.create(TimerEvent::ResetConnect, "reset connect");
        let keep_alive_timer = timers.create(TimerEvent::KeepAlive, "keep alive");
        let stream_info_timer = timers.create(TimerEvent::StreamInfo, "stream info");

        Self {
            host,
            port,
            config,
            tcp_data,
            stream: None,
            state: RtspState::ConfigWaiting,
            cseq: 1,
            session_id: String::new(),
            stream_id: -1,
            timeout_s: DEFAULT_SESSION_TIMEOUT_SECS,
            rx: RxBuffer::with_capacity(capacity),
            overrun: false,
            wait_response: false,
            last_request: None,
            channel_changed: false,
            receiver,
            monitor,
            timers,
            reset_timer,
            keep_alive_timer,
            stream_info_timer,
        }
    }

    pub fn state(&self) -> RtspState {
        self.state
    }

    /// Session token from the last SETUP; empty before then.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// `com.ses.streamID` from the last SETUP; -1 before then.
    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    /// Last tuner telemetry parsed from RTCP.
    pub fn signal_status(&self) -> TunerStatus {
        self.monitor.status()
    }

    /// Shared monitor handle, for frontends polling signal state.
    pub fn signal_monitor(&self) -> Arc<SignalMonitor> {
        self.monitor.clone()
    }

    /// Control socket and event mask for the host poll set.
    ///
    /// The descriptor is -1 outside of connected states; `poll(2)`
    /// ignores negative descriptors, so the host may pass it through
    /// unconditionally.
    pub fn poll_descriptor(&self) -> (RawFd, libc::c_short) {
        let fd = self.stream.as_ref().map(|s| s.as_raw_fd()).unwrap_or(-1);
        let events = match self.state {
            RtspState::ConfigWaiting => {
                if self.tcp_data {
                    libc::POLLIN | libc::POLLHUP
                } else {
                    0
                }
            }
            RtspState::ServerConnecting => libc::POLLOUT | libc::POLLHUP,
            RtspState::SessionEstablishing
            | RtspState::SessionPlaying
            | RtspState::SessionTeardowning => libc::POLLIN | libc::POLLHUP,
            RtspState::SessionTransmitting => {
                if self.tcp_data || self.wait_response {
                    libc::POLLIN | libc::POLLHUP
                } else {
                    0
                }
            }
        };
        (fd, events)
    }

    /// Upper bound for the host poll timeout, in milliseconds.
    pub fn poll_timeout_ms(&self) -> i32 {
        self.timers.next_deadline_ms()
    }

    /// Advance the state machine with the poll results for the control
    /// socket (0 if it was not in the poll set).
    pub fn handle_events(&mut self, revents: libc::c_short) {
        if revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0 {
            tracing::warn!(revents, "control socket error, resetting session");
            self.reset_session();
        } else {
            match self.state {
                RtspState::ServerConnecting if revents & libc::POLLOUT != 0 => {
                    self.finish_connect();
                }
                RtspState::SessionEstablishing
                | RtspState::SessionPlaying
                | RtspState::SessionTransmitting
                | RtspState::SessionTeardowning
                    if revents & libc::POLLIN != 0 =>
                {
                    self.handle_readable();
                }
                _ => {}
            }
        }
        self.drive();
    }

    /// Fire due timers, then advance the state machine.
    pub fn tick_timers(&mut self) {
        for event in self.timers.fire_due() {
            self.dispatch_timer(event);
        }
        self.drive();
    }

    fn dispatch_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::ResetConnect => {
                tracing::warn!(state = ?self.state, "session watchdog expired");
                self.reset_session();
            }
            TimerEvent::KeepAlive => {
                let _ = self.send_request(RequestKind::Options);
            }
            TimerEvent::StreamInfo => {
                let _ = self.send_request(RequestKind::Describe);
            }
        }
    }

    /// One pass over the state table: initiate connects, (re)send
    /// requests, arm the keep-alive. Called after every event or timer
    /// delivery; cheap when there is nothing to do.
    fn drive(&mut self) {
        match self.state {
            RtspState::ConfigWaiting => {
                if self.config.channel_status() == ChannelStatus::Changed {
                    if let Err(e) = self.connect() {
                        tracing::warn!(error = %e, "connect to server failed");
                        self.reset_session();
                    }
                }
            }
            RtspState::ServerConnecting => {}
            RtspState::SessionEstablishing => {
                let _ = self.send_request(RequestKind::Setup);
            }
            RtspState::SessionPlaying => {
                let _ = self.send_request(RequestKind::Play);
            }
            RtspState::SessionTransmitting => {
                let channel = self.config.channel_status();
                let pids = self.config.pid_status();
                if channel == ChannelStatus::Changed || pids == PidStatus::Changed {
                    tracing::debug!(?channel, ?pids, "configuration changed, re-tuning");
                    if matches!(self.send_request(RequestKind::Play), Ok(true)) {
                        self.state = RtspState::SessionPlaying;
                    }
                } else if channel == ChannelStatus::Invalid {
                    tracing::debug!("channel dropped, tearing down");
                    if matches!(self.send_request(RequestKind::Teardown), Ok(true)) {
                        self.state = RtspState::SessionTeardowning;
                    }
                } else if !self.wait_response && !self.timers.is_active(self.keep_alive_timer) {
                    self.start_keep_alive();
                }
            }
            RtspState::SessionTeardowning => {}
        }
    }

    fn connect(&mut self) -> Result<()> {
        if !self.tcp_data {
            let rtp_port = self.receiver.open(self.config.rtp_buffer_mb())?;
            tracing::debug!(rtp_port, "RTP endpoint ready");
        }

        let stream = tcp::connect_nonblocking(&self.host, self.port)?;
        if self.tcp_data {
            transport::set_receive_buffer(&stream, self.config.rtp_buffer_mb() * 1024 * 1024);
        }

        tracing::info!(host = %self.host, port = self.port, "connecting to SAT>IP server");
        self.stream = Some(stream);
        self.state = RtspState::ServerConnecting;
        self.timers.start(self.reset_timer, CONNECT_TIMEOUT, true);
        Ok(())
    }

    /// POLLOUT on a connecting socket: either the connect completed or it
    /// failed and the error is pending on the socket.
    fn finish_connect(&mut self) {
        let pending = self
            .stream
            .as_ref()
            .and_then(|s| s.take_error().ok().flatten());
        if let Some(e) = pending {
            tracing::warn!(error = %e, "connect to server failed");
            self.reset_session();
            return;
        }

        tracing::debug!("control connection established");
        self.timers.stop(self.reset_timer);
        self.state = RtspState::SessionEstablishing;

        if !self.tcp_data {
            if let Err(e) = self.receiver.start() {
                tracing::error!(error = %e, "unable to start RTP receive thread");
                self.reset_session();
            }
        }
    }

    /// Read from the control socket and process every complete message.
    fn handle_readable(&mut self) {
        if self.rx.is_full() {
            if !self.overrun {
                tracing::warn!(capacity = self.rx.capacity(), "receive buffer overrun");
                self.overrun = true;
            }
        } else {
            if self.overrun {
                tracing::debug!("recovered from receive buffer overrun");
                self.overrun = false;
            }
            let Some(stream) = self.stream.as_mut() else {
                return;
            };
            match stream.read(self.rx.spare()) {
                Ok(0) => {
                    tracing::debug!("server closed the control connection");
                    self.reset_session();
                    return;
                }
                Ok(n) => self.rx.advance(n),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!(error = %e, "control socket read failed");
                    self.reset_session();
                    return;
                }
            }
        }

        self.process_rx();
    }

    fn process_rx(&mut self) {
        let mut media_frames = 0usize;

        while let Some(message) = framer::next_message(&mut self.rx) {
            match message {
                FramedMessage::Response(text) => self.process_response(&text),
                FramedMessage::Interleaved(frame) => {
                    if self.channel_changed {
                        // Media that raced the response to a re-tune
                        // belongs to the previous channel.
                        tracing::trace!("discarding media from previous channel");
                    } else {
                        media_frames += 1;
                        self.receiver.accept_interleaved(&frame);
                    }
                }
            }
        }

        if media_frames > 0 && self.stream.is_some() {
            // Interleaved media doubles as a liveness signal; reset when
            // the stream stalls for a full watchdog cycle.
            self.timers.start(self.reset_timer, TCP_STALL_TIMEOUT, true);
        }
    }

    fn process_response(&mut self, raw: &str) {
        tracing::trace!(response = raw, "RTSP response received");

        let response = match RtspResponse::parse(raw) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "malformed RTSP response");
                self.reset_session();
                return;
            }
        };

        if response.status != 200 {
            let error = SatipError::Status(response.status);
            tracing::warn!(%error, reason = %response.reason, "RTSP request rejected");
            self.reset_session();
            return;
        }

        let Some(request) = self.last_request else {
            tracing::debug!("response with no outstanding request, skipped");
            return;
        };

        let outcome = match request {
            RequestKind::Setup => self.complete_setup(&response),
            RequestKind::Play => {
                self.flush_stale_media();
                Ok(())
            }
            RequestKind::Options | RequestKind::Teardown | RequestKind::Describe => Ok(()),
        };

        match outcome {
            Ok(()) => {
                tracing::debug!(method = request.method(), "request completed");
                self.timers.stop(self.reset_timer);
                self.wait_response = false;
                self.last_request = None;
                self.advance_after_response();
            }
            Err(e) => {
                tracing::warn!(method = request.method(), error = %e, "unusable response");
                self.reset_session();
            }
        }
    }

    /// State transition driven by a completed response, per the table in
    /// the module docs.
    fn advance_after_response(&mut self) {
        match self.state {
            RtspState::SessionEstablishing => self.state = RtspState::SessionPlaying,
            RtspState::SessionPlaying => self.state = RtspState::SessionTransmitting,
            RtspState::SessionTeardowning => self.reset_session(),
            _ => {}
        }
    }

    fn complete_setup(&mut self, response: &RtspResponse) -> Result<()> {
        let id = response
            .session_id()
            .ok_or(SatipError::MissingHeader("Session"))?;
        self.session_id = id.to_string();

        if let Some(timeout) = response.session_timeout() {
            self.timeout_s = timeout;
        }

        self.stream_id = response
            .stream_id()
            .ok_or(SatipError::MissingHeader("com.ses.streamID"))?;

        tracing::info!(
            session_id = %self.session_id,
            stream_id = self.stream_id,
            timeout_s = self.timeout_s,
            "session established"
        );

        self.flush_stale_media();
        Ok(())
    }

    /// After a channel change is acknowledged, whatever the receive
    /// buffer still holds was tuned before the change.
    fn flush_stale_media(&mut self) {
        if self.channel_changed {
            self.rx.clear();
            self.channel_changed = false;
        }
    }

    /// Build and send one request. Returns `Ok(true)` when it went out,
    /// `Ok(false)` when skipped because a response is still outstanding.
    /// Send and precondition failures reset the session before returning.
    fn send_request(&mut self, kind: RequestKind) -> Result<bool> {
        if self.wait_response {
            return Ok(false);
        }

        self.timers.stop(self.keep_alive_timer);

        let text = match self.build_request(kind) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(method = kind.method(), error = %e, "cannot build request");
                self.reset_session();
                return Err(e);
            }
        };

        tracing::debug!(method = kind.method(), request = %text, "sending request");

        match self.send_bytes(text.as_bytes()) {
            Ok(()) => {
                self.wait_response = true;
                self.last_request = Some(kind);
                self.timers.start(self.reset_timer, RESPONSE_TIMEOUT, true);
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(method = kind.method(), error = %e, "request send failed");
                self.reset_session();
                Err(e)
            }
        }
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(SatipError::NotConnected)?;
        match stream.write(bytes) {
            Ok(n) if n == bytes.len() => Ok(()),
            Ok(n) => {
                // A short write leaves a torn request on the wire; there
                // is no way to continue the exchange.
                Err(SatipError::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    format!("short send: {n} of {} bytes", bytes.len()),
                )))
            }
            Err(e) => Err(SatipError::Io(e)),
        }
    }

    fn build_request(&mut self, kind: RequestKind) -> Result<String> {
        let base = format!("rtsp://{}:{}/", self.host, self.port);

        let request = match kind {
            RequestKind::Setup => {
                let cseq = self.next_cseq();
                let (query, channel_changed) = self.config.setup_data();
                self.channel_changed = channel_changed;

                let mut uri = base;
                if self.stream_id != -1 {
                    uri.push_str(&format!("stream={}", self.stream_id));
                }
                uri.push_str(&query);

                let transport = if self.tcp_data {
                    "RTP/AVP/TCP;interleaved=0-1".to_string()
                } else {
                    let rtp_port = self.receiver.rtp_port().ok_or(SatipError::NotConnected)?;
                    format!("RTP/AVP;unicast;client_port={}-{}", rtp_port, rtp_port + 1)
                };

                let mut request = RtspRequest::new("SETUP", uri).add_header("CSeq", &cseq);
                if !self.session_id.is_empty() {
                    request = request.add_header("Session", &self.session_id);
                }
                request.add_header("Transport", &transport)
            }
            RequestKind::Play => {
                self.require_established()?;
                let cseq = self.next_cseq();
                let (query, channel_changed) = self.config.play_data();
                self.channel_changed = channel_changed;

                let uri = format!("{base}stream={}{query}", self.stream_id);
                RtspRequest::new("PLAY", uri)
                    .add_header("CSeq", &cseq)
                    .add_header("Session", &self.session_id)
            }
            RequestKind::Options => {
                self.require_established()?;
                let cseq = self.next_cseq();
                RtspRequest::new("OPTIONS", base)
                    .add_header("CSeq", &cseq)
                    .add_header("Session", &self.session_id)
            }
            RequestKind::Teardown => {
                self.require_established()?;
                let cseq = self.next_cseq();
                let uri = format!("{base}stream={}", self.stream_id);
                RtspRequest::new("TEARDOWN", uri)
                    .add_header("CSeq", &cseq)
                    .add_header("Session", &self.session_id)
            }
            RequestKind::Describe => {
                let cseq = self.next_cseq();
                let mut uri = base;
                if self.stream_id != -1 {
                    uri.push_str(&format!("stream={}", self.stream_id));
                }
                let mut request = RtspRequest::new("DESCRIBE", uri).add_header("CSeq", &cseq);
                if !self.session_id.is_empty() {
                    request = request.add_header("Session", &self.session_id);
                }
                request.add_header("Accept", "application/sdp")
            }
        };

        Ok(request.serialize())
    }

    fn next_cseq(&mut self) -> String {
        let cseq = self.cseq;
        self.cseq += 1;
        cseq.to_string()
    }

    /// PLAY, OPTIONS and TEARDOWN need the ids from the SETUP response.
    fn require_established(&self) -> Result<()> {
        if self.stream_id == -1 || self.session_id.is_empty() {
            return Err(SatipError::SessionNotReady);
        }
        Ok(())
    }

    fn start_keep_alive(&mut self) {
        let delay = self.timeout_s.saturating_sub(KEEP_ALIVE_MARGIN_SECS).max(1);
        tracing::debug!(delay_s = delay, "keep-alive armed");
        self.timers
            .start(self.keep_alive_timer, Duration::from_secs(delay), true);
    }

    /// Full reset: drop the control connection, forget all session state,
    /// stop the receiver, return to `ConfigWaiting`.
    ///
    /// The session resumes on its own the next time the configuration
    /// presents a changed, valid channel.
    fn reset_session(&mut self) {
        tracing::debug!(state = ?self.state, "resetting RTSP session");

        self.state = RtspState::ConfigWaiting;
        self.cseq = 1;
        self.session_id.clear();
        self.stream_id = -1;
        self.timeout_s = DEFAULT_SESSION_TIMEOUT_SECS;
        self.rx.clear();
        self.overrun = false;
        self.wait_response = false;
        self.last_request = None;
        self.channel_changed = false;
        self.stream = None;

        self.timers.stop(self.reset_timer);
        self.timers.stop(self.keep_alive_timer);
        self.timers.stop(self.stream_info_timer);

        // Joins the receive thread before the sockets go away.
        self.receiver.shutdown();
    }
}
