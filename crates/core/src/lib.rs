//! # satip — SAT>IP client library
//!
//! A Rust library implementing the client side of SAT>IP: an RTSP control
//! plane over TCP paired with an RTP/RTCP media plane, used to tune a
//! remote DVB satellite receiver and stream its transport-stream output
//! to a local consumer (typically a virtual tuner device).
//!
//! ## Protocol references
//!
//! | Spec | Topic | How this crate uses it |
//! |------|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Request building, response parsing, session lifecycle, interleaved framing |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP/RTCP | Fixed-header parsing, sequence tracking, compound packet walking |
//! | SAT>IP 1.2.2 | DVB over IP | URL query syntax, `com.ses.streamID`, `SES1` tuner telemetry |
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  Host event loop (owns poll set)              │
//! ├───────────────────────────────────────────────┤
//! │  RtspSession   — state machine, control socket│
//! │  TimerWheel    — watchdog and keep-alive      │
//! ├───────────────────────────────────────────────┤
//! │  Protocol      — request builder, resp parser │
//! │  Framer        — RTSP text / $-frame demux    │
//! ├───────────────────────────────────────────────┤
//! │  RtpReceiver   — UDP pair + thread, or inline │
//! │  TsSink        — payload consumer (vtuner)    │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! The session never blocks and never owns a poll loop. The host asks it
//! for `(fd, events)` and a timeout, calls `poll(2)`, and hands results
//! back:
//!
//! ```no_run
//! use std::sync::Arc;
//! use satip::{RtspSession, TuningStore};
//!
//! struct Discard;
//! impl satip::TsSink for Discard {
//!     fn write_ts(&self, _payload: &[u8]) -> std::io::Result<()> { Ok(()) }
//! }
//!
//! let config = Arc::new(TuningStore::new(false, 4));
//! let mut session = RtspSession::new("192.168.1.20", 554, config, Arc::new(Discard));
//!
//! loop {
//!     let (fd, events) = session.poll_descriptor();
//!     let mut fds = [libc::pollfd { fd, events, revents: 0 }];
//!     let ready = unsafe { libc::poll(fds.as_mut_ptr(), 1, session.poll_timeout_ms()) };
//!     if ready > 0 && fds[0].revents != 0 {
//!         session.handle_events(fds[0].revents);
//!     } else {
//!         session.tick_timers();
//!     }
//! }
//! ```
//!
//! ## Crate layout
//!
//! - [`session`] — [`RtspSession`] state machine and poll surface.
//! - [`config`] — [`TunerConfig`] adapter trait and the [`TuningStore`].
//! - [`protocol`] — RTSP request building and response parsing.
//! - [`transport`] — non-blocking connect, UDP port pair, interleaved framer.
//! - [`media`] — RTP/RTCP parsing, receive thread, [`TsSink`], [`SignalMonitor`].
//! - [`timer`] — [`timer::TimerWheel`], monotonic one-shot/repeating timers.
//! - [`error`] — [`SatipError`] enum and [`Result`] alias.

pub mod config;
pub mod error;
pub mod media;
pub mod protocol;
pub mod session;
pub mod timer;
pub mod transport;

pub use config::{ChannelStatus, PidStatus, TunerConfig, TuningParams, TuningStore};
pub use error::{Result, SatipError};
pub use media::{SignalMonitor, TsSink, TunerStatus};
pub use session::{RequestKind, RtspSession, RtspState};
