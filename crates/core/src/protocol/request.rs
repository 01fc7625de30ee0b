/// An outbound RTSP request (RFC 2326 §6).
///
/// Serializes to the standard text format:
///
/// ```text
/// PLAY rtsp://192.168.178.57:554/stream=3?freq=12000&pol=h RTSP/1.0\r\n
/// CSeq: 2\r\n
/// Session: ABCD\r\n
/// User-Agent: satip-client-rs/0.1\r\n
/// \r\n
/// ```
///
/// Uses a builder pattern: chain [`add_header`](Self::add_header), then call
/// [`serialize`](Self::serialize). The `User-Agent` header is appended
/// automatically as the last header of every request.
#[must_use]
pub struct RtspRequest {
    pub method: &'static str,
    pub uri: String,
    pub headers: Vec<(String, String)>,
}

/// Client identification string included in every request
/// per RFC 2326 §12.41.
pub const USER_AGENT: &str = "satip-client-rs/0.1";

impl RtspRequest {
    pub fn new(method: &'static str, uri: String) -> Self {
        RtspRequest {
            method,
            uri,
            headers: Vec::new(),
        }
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Serialize to the RTSP text wire format, `User-Agent` last,
    /// terminated by the blank line.
    pub fn serialize(&self) -> String {
        let mut request = format!("{} {} RTSP/1.0\r\n", self.method, self.uri);

        for (name, value) in &self.headers {
            request.push_str(&format!("{}: {}\r\n", name, value));
        }

        request.push_str(&format!("User-Agent: {}\r\n", USER_AGENT));
        request.push_str("\r\n");
        request
    }
}
