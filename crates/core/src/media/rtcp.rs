//! RTCP compound-packet walking and the SAT>IP `SES1` APP payload.
//!
//! Of the RTCP packet types (RFC 3550 §6) only APP (PT 204) with the
//! 4-character name `SES1` matters here: SAT>IP servers use it to report
//! tuner state. Its payload is an ASCII string of semicolon-separated
//! `key=value` pairs; the `tuner` value is a comma-separated list whose
//! first four fields are frontend number, signal level, lock flag, and
//! signal quality:
//!
//! ```text
//! ver=1.0;src=1;tuner=1,230,1,14,11538,v,dvbs,qpsk,off,0.35,22000,56;pids=0,100
//! ```

/// RTCP packet type for application-defined packets (RFC 3550 §6.7).
pub const RTCP_PT_APP: u8 = 204;

/// APP name identifying SAT>IP tuner telemetry.
const APP_NAME: &[u8; 4] = b"SES1";

/// Offset of the ASCII string inside an APP packet: 4-byte header,
/// 4-byte SSRC, 4-byte name, 2-byte identifier, 2-byte string length.
const APP_STRING_OFFSET: usize = 16;

/// Last reported tuner state, as carried in the `SES1` payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunerStatus {
    pub has_lock: bool,
    /// Signal level, 0..=255.
    pub signal_strength: u8,
    /// Signal quality, 0..=15.
    pub signal_quality: u8,
}

/// Walk a compound RTCP packet and return the tuner status from the last
/// `SES1` APP sub-packet, if any.
///
/// Sub-packets of other types (sender reports, SDES, ...) are stepped
/// over using the length field. Truncated or non-version-2 input stops
/// the walk; whatever was parsed up to that point still counts.
pub fn parse_compound(packet: &[u8]) -> Option<TunerStatus> {
    let mut rest = packet;
    let mut status = None;

    while rest.len() >= 4 {
        if rest[0] >> 6 != 2 {
            tracing::debug!("RTCP sub-packet with bad version, stopping walk");
            break;
        }
        let packet_type = rest[1];
        let length = (u16::from_be_bytes([rest[2], rest[3]]) as usize + 1) * 4;
        if length > rest.len() {
            tracing::debug!(length, available = rest.len(), "truncated RTCP sub-packet");
            break;
        }

        if packet_type == RTCP_PT_APP {
            if let Some(parsed) = parse_app(&rest[..length]) {
                status = Some(parsed);
            }
        }

        rest = &rest[length..];
    }

    status
}

fn parse_app(sub: &[u8]) -> Option<TunerStatus> {
    if sub.len() < APP_STRING_OFFSET || &sub[8..12] != APP_NAME {
        return None;
    }

    let declared = u16::from_be_bytes([sub[14], sub[15]]) as usize;
    let body = &sub[APP_STRING_OFFSET..];
    let body = if declared > 0 && declared <= body.len() {
        &body[..declared]
    } else {
        body
    };

    let text = String::from_utf8_lossy(body);
    parse_app_payload(text.trim_end_matches(['\0', '\r', '\n', ' ']))
}

/// Parse the ASCII `SES1` payload.
///
/// Only the `tuner` value is of interest; everything else (`ver`, `src`,
/// `pids`, trailing tuning parameters) is ignored. Returns `None` when
/// the payload does not carry a parseable tuner triple.
pub fn parse_app_payload(payload: &str) -> Option<TunerStatus> {
    let tuner = payload
        .split(';')
        .find_map(|pair| pair.trim().strip_prefix("tuner="))?;

    let mut fields = tuner.split(',');
    let _frontend = fields.next()?;
    let strength: u16 = fields.next()?.trim().parse().ok()?;
    let lock = fields.next()?.trim();
    let quality: u16 = fields.next()?.trim().parse().ok()?;

    Some(TunerStatus {
        has_lock: lock == "1",
        signal_strength: strength.min(255) as u8,
        signal_quality: quality.min(15) as u8,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = "ver=1.0;src=1;tuner=1,230,1,14,11538,v,dvbs,qpsk,off,0.35,22000,56;pids=0,100";

    /// Build a SES1 APP packet, padded to a 32-bit boundary.
    fn app_packet(payload: &str) -> Vec<u8> {
        let mut body = payload.as_bytes().to_vec();
        while body.len() % 4 != 0 {
            body.push(0);
        }
        let words = (APP_STRING_OFFSET + body.len()) / 4 - 1;

        let mut out = vec![0x80, RTCP_PT_APP, 0, 0];
        out[2..4].copy_from_slice(&(words as u16).to_be_bytes());
        out.extend_from_slice(&0x1234_5678u32.to_be_bytes()); // SSRC
        out.extend_from_slice(APP_NAME);
        out.extend_from_slice(&0u16.to_be_bytes()); // identifier
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// An empty receiver report, as servers commonly prepend.
    fn receiver_report() -> Vec<u8> {
        let mut out = vec![0x80, 201, 0, 1];
        out.extend_from_slice(&0x1234_5678u32.to_be_bytes());
        out
    }

    #[test]
    fn payload_fields_extracted() {
        let status = parse_app_payload(PAYLOAD).unwrap();
        assert!(status.has_lock);
        assert_eq!(status.signal_strength, 230);
        assert_eq!(status.signal_quality, 14);
    }

    #[test]
    fn no_lock_reported() {
        let status = parse_app_payload("ver=1.0;src=1;tuner=1,0,0,0,,,,,,,,;pids=none").unwrap();
        assert!(!status.has_lock);
        assert_eq!(status.signal_strength, 0);
    }

    #[test]
    fn compound_with_leading_report() {
        let mut packet = receiver_report();
        packet.extend_from_slice(&app_packet(PAYLOAD));
        let status = parse_compound(&packet).unwrap();
        assert!(status.has_lock);
        assert_eq!(status.signal_strength, 230);
        assert_eq!(status.signal_quality, 14);
    }

    #[test]
    fn app_with_other_name_is_ignored() {
        let mut packet = app_packet(PAYLOAD);
        packet[8..12].copy_from_slice(b"XXXX");
        assert!(parse_compound(&packet).is_none());
    }

    #[test]
    fn truncated_compound_does_not_panic() {
        let packet = app_packet(PAYLOAD);
        assert!(parse_compound(&packet[..10]).is_none());
    }

    #[test]
    fn garbage_payload_is_rejected() {
        assert!(parse_app_payload("ver=1.0;src=1").is_none());
        assert!(parse_app_payload("tuner=1,notanumber,1,5").is_none());
        assert!(parse_app_payload("").is_none());
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let status = parse_app_payload("tuner=1,999,1,99").unwrap();
        assert_eq!(status.signal_strength, 255);
        assert_eq!(status.signal_quality, 15);
    }
}
