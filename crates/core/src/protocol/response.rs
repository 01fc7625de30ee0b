use crate::error::{ParseErrorKind, SatipError};

/// A parsed RTSP response (RFC 2326 §7).
///
/// RTSP responses follow HTTP/1.1 syntax:
///
/// ```text
/// RTSP-Version SP Status-Code SP Reason-Phrase CRLF
/// *(Header: Value CRLF)
/// CRLF
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2, which matters in
/// practice: SAT>IP servers disagree about the capitalisation of
/// `com.ses.streamID`.
///
/// The parser is line oriented (split on CRLF, then on the first colon)
/// rather than scan-forward, so header values containing `:` or `=` are
/// handled correctly.
#[derive(Debug)]
pub struct RtspResponse {
    /// Numeric status code from the status line (200, 404, 503, ...).
    pub status: u16,
    /// Reason phrase, e.g. `OK`.
    pub reason: String,
    /// Headers as ordered (name, value) pairs. Names are stored as received;
    /// lookups via [`header`](Self::header) are case-insensitive.
    pub headers: Vec<(String, String)>,
}

impl RtspResponse {
    /// Parse a complete RTSP response: status line, headers, trailing blank
    /// line. Returns [`SatipError::Parse`] on malformed input.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.lines();

        let status_line = lines.next().ok_or(SatipError::Parse {
            kind: ParseErrorKind::EmptyResponse,
        })?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or("");
        let code = parts.next().ok_or(SatipError::Parse {
            kind: ParseErrorKind::InvalidStatusLine,
        })?;
        let reason = parts.next().unwrap_or("").to_string();

        if !version.starts_with("RTSP/") {
            return Err(SatipError::Parse {
                kind: ParseErrorKind::InvalidStatusLine,
            });
        }

        let status: u16 = code.parse().map_err(|_| SatipError::Parse {
            kind: ParseErrorKind::InvalidStatusLine,
        })?;

        let mut headers = Vec::new();

        for line in lines {
            if line.is_empty() {
                break;
            }

            let colon_pos = line.find(':').ok_or(SatipError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;

            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();

            headers.push((name, value));
        }

        Ok(RtspResponse {
            status,
            reason,
            headers,
        })
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The session token from the `Session` header, without the
    /// `;timeout=` suffix (RFC 2326 §12.37).
    pub fn session_id(&self) -> Option<&str> {
        self.header("Session")
            .map(|value| value.split(';').next().unwrap_or(value).trim())
            .filter(|id| !id.is_empty())
    }

    /// The `timeout` parameter of the `Session` header, in seconds.
    pub fn session_timeout(&self) -> Option<u64> {
        self.header("Session")?
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("timeout="))
            .next()?
            .trim()
            .parse()
            .ok()
    }

    /// The SAT>IP `com.ses.streamID` header value.
    pub fn stream_id(&self) -> Option<i32> {
        self.header("com.ses.streamID")?.trim().parse().ok()
    }
}
