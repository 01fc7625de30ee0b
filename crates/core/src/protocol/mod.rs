//! RTSP protocol implementation (RFC 2326, client side).
//!
//! This module handles the text-based RTSP signaling protocol as a SAT>IP
//! client speaks it: building requests and parsing responses.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! SETUP rtsp://server/?src=1&freq=11538&pol=v&msys=dvbs&sr=22000&pids=0,100 RTSP/1.0\r\n
//! CSeq: 1\r\n
//! Transport: RTP/AVP;unicast;client_port=46938-46939\r\n
//! User-Agent: satip-client-rs\r\n
//! \r\n
//! ```
//!
//! SAT>IP puts the entire tuning request into the URL query and adds one
//! private response header, `com.ses.streamID`, naming the server-side
//! stream a session is bound to.
//!
//! ## Requests this client sends
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | SETUP | §10.4 | Tune and negotiate transport |
//! | PLAY | §10.5 | Start (or re-tune) media delivery |
//! | OPTIONS | §10.1 | Session keep-alive |
//! | TEARDOWN | §10.7 | Destroy the session |
//! | DESCRIBE | §10.2 | Retrieve stream/session info as SDP |

pub mod request;
pub mod response;

pub use request::RtspRequest;
pub use response::RtspResponse;
