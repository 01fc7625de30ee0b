//! RTP fixed-header parser (RFC 3550 §5.1).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! This is the receive side: the payload after the fixed header, any CSRC
//! list, any header extension, and minus any padding is the MPEG-TS
//! substream the server tuned for us. Packets whose version bits are not
//! 2 are rejected.

use std::fmt;

/// Length of the fixed RTP header.
pub const RTP_HEADER_LEN: usize = 12;

/// A parsed view over one RTP datagram.
pub struct RtpPacket<'a> {
    pub sequence: u16,
    pub ssrc: u32,
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Parse a datagram, honoring padding, extension, and CSRC fields.
    ///
    /// Returns `None` for anything that is not a well-formed version-2
    /// RTP packet.
    pub fn parse(datagram: &'a [u8]) -> Option<Self> {
        if datagram.len() < RTP_HEADER_LEN {
            return None;
        }

        let b0 = datagram[0];
        if b0 >> 6 != 2 {
            return None;
        }
        let padding = b0 & 0x20 != 0;
        let extension = b0 & 0x10 != 0;
        let csrc_count = (b0 & 0x0F) as usize;

        let sequence = u16::from_be_bytes([datagram[2], datagram[3]]);
        let ssrc = u32::from_be_bytes([datagram[8], datagram[9], datagram[10], datagram[11]]);

        let mut offset = RTP_HEADER_LEN + 4 * csrc_count;

        if extension {
            if datagram.len() < offset + 4 {
                return None;
            }
            // Extension length is in 32-bit words, excluding its own
            // 4-byte preamble.
            let words = u16::from_be_bytes([datagram[offset + 2], datagram[offset + 3]]) as usize;
            offset += 4 + 4 * words;
        }

        let mut end = datagram.len();
        if padding {
            let pad = *datagram.last()? as usize;
            if pad == 0 || pad > end {
                return None;
            }
            end -= pad;
        }

        if offset > end {
            return None;
        }

        Some(RtpPacket {
            sequence,
            ssrc,
            payload: &datagram[offset..end],
        })
    }
}

impl fmt::Debug for RtpPacket<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtpPacket")
            .field("sequence", &self.sequence)
            .field("ssrc", &format_args!("{:#010X}", self.ssrc))
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(sequence: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; RTP_HEADER_LEN];
        out[0] = 2 << 6;
        out[1] = 33; // MP2T payload type
        out[2..4].copy_from_slice(&sequence.to_be_bytes());
        out[8..12].copy_from_slice(&0xAABBCCDDu32.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn parse_plain_packet() {
        let data = packet(700, b"TS");
        let parsed = RtpPacket::parse(&data).unwrap();
        assert_eq!(parsed.sequence, 700);
        assert_eq!(parsed.ssrc, 0xAABBCCDD);
        assert_eq!(parsed.payload, b"TS");
    }

    #[test]
    fn reject_wrong_version() {
        let mut data = packet(1, b"TS");
        data[0] = 1 << 6;
        assert!(RtpPacket::parse(&data).is_none());
    }

    #[test]
    fn reject_truncated_header() {
        assert!(RtpPacket::parse(&[0x80, 33, 0, 0]).is_none());
    }

    #[test]
    fn csrc_list_is_skipped() {
        let mut data = packet(5, &[]);
        data[0] |= 2; // CC = 2
        data.extend_from_slice(&[0u8; 8]); // two CSRC entries
        data.extend_from_slice(b"PAYLOAD");
        let parsed = RtpPacket::parse(&data).unwrap();
        assert_eq!(parsed.payload, b"PAYLOAD");
    }

    #[test]
    fn extension_is_skipped() {
        let mut data = packet(5, &[]);
        data[0] |= 0x10;
        data.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x01]); // one extension word
        data.extend_from_slice(&[1, 2, 3, 4]);
        data.extend_from_slice(b"PAYLOAD");
        let parsed = RtpPacket::parse(&data).unwrap();
        assert_eq!(parsed.payload, b"PAYLOAD");
    }

    #[test]
    fn padding_is_stripped() {
        let mut data = packet(5, b"PAYLOAD");
        data[0] |= 0x20;
        data.extend_from_slice(&[0, 0, 3]); // 3 padding bytes, count last
        let parsed = RtpPacket::parse(&data).unwrap();
        assert_eq!(parsed.payload, b"PAYLOAD");
    }

    #[test]
    fn reject_padding_larger_than_packet() {
        let mut data = packet(5, b"");
        data[0] |= 0x20;
        data.extend_from_slice(&[0, 0, 200]);
        assert!(RtpPacket::parse(&data).is_none());
    }
}
