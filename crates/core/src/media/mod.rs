//! Media reception: RTP depacketizing, RTCP tuner telemetry, delivery.
//!
//! The SAT>IP media plane carries an MPEG transport stream in RTP
//! (RFC 3550) and tuner telemetry in RTCP APP packets named `SES1`.
//! This module strips the RTP framing and hands the raw TS payload to a
//! [`TsSink`], and publishes the parsed signal status through a
//! [`SignalMonitor`] so the control side can read a consistent
//! lock/strength/quality triple at any time.
//!
//! | Concern | Module |
//! |---------|--------|
//! | RTP fixed-header parsing | [`rtp`] |
//! | RTCP compound walk and `SES1` APP payload | [`rtcp`] |
//! | UDP receive thread / interleaved entry point | [`receiver`] |

pub mod receiver;
pub mod rtcp;
pub mod rtp;

use parking_lot::RwLock;

pub use rtcp::TunerStatus;

/// Consumer of reassembled transport-stream payload.
///
/// In production this is the virtual tuner device writer; in tests, a
/// collecting buffer. Implementations are expected to retry short writes
/// internally and may block briefly.
pub trait TsSink: Send + Sync {
    fn write_ts(&self, payload: &[u8]) -> std::io::Result<()>;
}

/// Shared view of the last received tuner telemetry.
///
/// Written by the receive context, read by the control context and
/// whatever frontend wants signal bars. The triple is published under one
/// short lock so readers never observe a torn update.
#[derive(Debug, Default)]
pub struct SignalMonitor {
    status: RwLock<TunerStatus>,
}

impl SignalMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> TunerStatus {
        *self.status.read()
    }

    pub fn publish(&self, status: TunerStatus) {
        *self.status.write() = status;
    }
}
