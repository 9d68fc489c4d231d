//! Wire protocol for receiving audio tracks over the local socket.
//!
//! Each message is a CRLF-terminated text header followed by a binary body:
//!
//! ```text
//! <order>:<bits>:<channels>:<rate>:<samples>\r\n
//! <samples * 2 raw bytes>
//! ```
//!
//! A bare `ACK\r\n` line is a keepalive and carries no body. The protocol is
//! fire-and-forget: nothing is ever written back to the producer.

use anyhow::{Result, bail};
use bytes::BytesMut;

use crate::audio::{ByteOrder, Track};

/// Keepalive line, without the CRLF terminator.
pub const ACK: &str = "ACK";

/// A valid header is tens of bytes; anything this long is garbage.
const MAX_HEADER_LEN: usize = 4096;

/// Upper bound on the declared sample count (32 MiB of payload).
const MAX_SAMPLES: u64 = 16 * 1024 * 1024;

/// Parsed header of a non-ACK message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TrackHeader {
    order: ByteOrder,
    bits: u32,
    channels: u32,
    rate: u32,
    samples: usize,
}

#[derive(Clone, Copy)]
enum CodecState {
    AwaitingHeaderLine,
    AwaitingPayload(TrackHeader),
    Failed,
}

/// Incremental decoder for one producer connection.
///
/// Feed received bytes into a `BytesMut` and call [`Codec::advance`] until it
/// returns `Ok(None)`. A decode error is permanent; the connection must be
/// torn down.
pub struct Codec {
    state: CodecState,
}

impl Codec {
    pub fn new() -> Self {
        Self {
            state: CodecState::AwaitingHeaderLine,
        }
    }

    /// Consume as much of `buf` as possible, returning the next complete
    /// track if one is available. Keepalive lines are consumed silently.
    pub fn advance(&mut self, buf: &mut BytesMut) -> Result<Option<Track>> {
        loop {
            match self.state {
                CodecState::AwaitingHeaderLine => {
                    let Some(line) = self.take_header_line(buf)? else {
                        return Ok(None);
                    };
                    if line == ACK {
                        // Keepalive, no body follows. Keep scanning.
                        continue;
                    }
                    let header = match parse_header(&line) {
                        Ok(header) => header,
                        Err(e) => {
                            self.state = CodecState::Failed;
                            return Err(e);
                        }
                    };
                    self.state = CodecState::AwaitingPayload(header);
                }
                CodecState::AwaitingPayload(header) => {
                    let body_len = header.samples * 2;
                    if buf.len() < body_len {
                        return Ok(None);
                    }
                    let body = buf.split_to(body_len);
                    // Keep the raw byte layout; the playback engine swaps
                    // later if the declared order differs from the native one.
                    let samples: Vec<i16> = body
                        .chunks_exact(2)
                        .map(|pair| i16::from_ne_bytes([pair[0], pair[1]]))
                        .collect();
                    self.state = CodecState::AwaitingHeaderLine;
                    return Ok(Some(Track {
                        order: header.order,
                        bits: header.bits,
                        channels: header.channels,
                        rate: header.rate,
                        samples,
                    }));
                }
                CodecState::Failed => bail!("connection already failed protocol decoding"),
            }
        }
    }

    /// Extract one complete CRLF-terminated header line, if buffered.
    ///
    /// NUL bytes are replaced with `'?'` rather than terminating the line;
    /// the wire format must never embed NUL and downstream parsing relies on
    /// the line length staying stable.
    fn take_header_line(&mut self, buf: &mut BytesMut) -> Result<Option<String>> {
        // Scan byte by byte, substituting NULs as we go, and stop at the
        // first terminator. Bytes past it belong to the binary body and must
        // not be touched.
        let mut end = None;
        for i in 0..buf.len() {
            if buf[i] == 0 {
                buf[i] = b'?';
            } else if buf[i] == b'\n' && i > 0 && buf[i - 1] == b'\r' {
                end = Some(i - 1);
                break;
            }
        }
        let Some(end) = end else {
            if buf.len() > MAX_HEADER_LEN {
                self.state = CodecState::Failed;
                bail!("header line exceeds {} bytes without terminator", MAX_HEADER_LEN);
            }
            return Ok(None);
        };
        let line = buf.split_to(end + 2);
        match std::str::from_utf8(&line[..end]) {
            Ok(line) => Ok(Some(line.to_owned())),
            Err(_) => {
                self.state = CodecState::Failed;
                bail!("header line is not valid UTF-8");
            }
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_header(line: &str) -> Result<TrackHeader> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() != 5 {
        bail!(
            "header has {} fields, expected 5: |{}|",
            fields.len(),
            line
        );
    }
    let tag: u32 = parse_field(fields[0], "byte order")?;
    let order = match ByteOrder::from_wire_tag(tag) {
        Some(order) => order,
        None => bail!("unknown byte order tag {}", tag),
    };
    let bits = parse_field(fields[1], "bits per sample")?;
    let channels = parse_field(fields[2], "channel count")?;
    let rate = parse_field(fields[3], "sample rate")?;
    let samples: u64 = match fields[4].parse::<i64>() {
        Ok(n) if n > 0 => n as u64,
        Ok(n) => bail!("sample count {} is not positive", n),
        Err(_) => bail!("sample count |{}| is not an integer", fields[4]),
    };
    if samples > MAX_SAMPLES {
        bail!("sample count {} exceeds the {} sample limit", samples, MAX_SAMPLES);
    }
    Ok(TrackHeader {
        order,
        bits,
        channels,
        rate,
        samples: samples as usize,
    })
}

fn parse_field(field: &str, name: &str) -> Result<u32> {
    field
        .parse()
        .map_err(|_| anyhow::anyhow!("{} field |{}| is not an integer", name, field))
}

/// Encode a track in the wire format. This is what a producer sends; the
/// server only uses it in tests.
pub fn encode_track(track: &Track) -> Vec<u8> {
    let header = format!(
        "{}:{}:{}:{}:{}\r\n",
        track.order.wire_tag(),
        track.bits,
        track.channels,
        track.rate,
        track.samples.len()
    );
    let mut out = Vec::with_capacity(header.len() + track.samples.len() * 2);
    out.extend_from_slice(header.as_bytes());
    for sample in &track.samples {
        out.extend_from_slice(&sample.to_ne_bytes());
    }
    out
}

/// The keepalive message as sent on the wire.
pub fn encode_keepalive() -> &'static [u8] {
    b"ACK\r\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_track(samples: Vec<i16>) -> Track {
        Track {
            order: ByteOrder::native(),
            bits: 16,
            channels: 1,
            rate: 44100,
            samples,
        }
    }

    fn decode_all(bytes: &[u8]) -> Result<Vec<Track>> {
        let mut codec = Codec::new();
        let mut buf = BytesMut::from(bytes);
        let mut tracks = Vec::new();
        while let Some(track) = codec.advance(&mut buf)? {
            tracks.push(track);
        }
        Ok(tracks)
    }

    #[test]
    fn encode_decode_round_trip() {
        for n in [1usize, 2, 7, 1024] {
            let track = test_track((0..n).map(|i| (i as i16).wrapping_mul(-257)).collect());
            let tracks = decode_all(&encode_track(&track)).unwrap();
            assert_eq!(tracks, vec![track]);
        }
    }

    #[test]
    fn decodes_across_arbitrary_splits() {
        let track = test_track(vec![1, -2, 300, -400, 0x7fff, -0x8000]);
        let wire = encode_track(&track);

        // Feed one byte at a time; the codec must never emit early.
        let mut codec = Codec::new();
        let mut buf = BytesMut::new();
        let mut emitted = Vec::new();
        for byte in &wire {
            buf.extend_from_slice(std::slice::from_ref(byte));
            while let Some(t) = codec.advance(&mut buf).unwrap() {
                emitted.push(t);
            }
        }
        assert_eq!(emitted, vec![track]);
    }

    #[test]
    fn body_nul_bytes_survive_single_buffer_delivery() {
        // Header and body usually arrive in one read; NUL substitution is a
        // header-line rule and must leave the binary body alone.
        let track = test_track(vec![0, 256, -1, 0x0100]);
        let wire = encode_track(&track);
        assert!(wire.contains(&0u8), "payload should contain NUL bytes");
        assert_eq!(decode_all(&wire).unwrap(), vec![track]);
    }

    #[test]
    fn keepalive_is_consumed_silently() {
        assert_eq!(decode_all(b"ACK\r\n").unwrap(), vec![]);

        // A keepalive between two tracks does not disturb framing.
        let track = test_track(vec![5, 6, 7]);
        let mut wire = encode_track(&track);
        wire.extend_from_slice(encode_keepalive());
        wire.extend_from_slice(&encode_track(&track));
        assert_eq!(decode_all(&wire).unwrap(), vec![track.clone(), track]);
    }

    #[test]
    fn nul_bytes_become_question_marks() {
        // A NUL inside the header must not terminate the line; it turns the
        // field non-numeric instead.
        let mut codec = Codec::new();
        let mut buf = BytesMut::from(&b"0:16:1:44100:4\x002\r\n"[..]);
        let err = codec.advance(&mut buf).unwrap_err();
        assert!(err.to_string().contains("4?2"), "unexpected error: {err}");
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert!(decode_all(b"0:16:1:44100\r\n").is_err());
        assert!(decode_all(b"0:16:1:44100:10:extra\r\n").is_err());
    }

    #[test]
    fn non_numeric_field_is_rejected() {
        assert!(decode_all(b"0:sixteen:1:44100:10\r\n").is_err());
    }

    #[test]
    fn non_positive_sample_count_is_rejected() {
        assert!(decode_all(b"0:16:1:44100:0\r\n").is_err());
        assert!(decode_all(b"0:16:1:44100:-5\r\n").is_err());
    }

    #[test]
    fn unknown_byte_order_tag_is_rejected() {
        assert!(decode_all(b"7:16:1:44100:10\r\n").is_err());
    }

    #[test]
    fn unterminated_header_is_bounded() {
        let mut codec = Codec::new();
        let mut buf = BytesMut::from(vec![b'9'; MAX_HEADER_LEN + 1].as_slice());
        assert!(codec.advance(&mut buf).is_err());
    }

    #[test]
    fn failed_codec_stays_failed() {
        let mut codec = Codec::new();
        let mut buf = BytesMut::from(&b"bogus\r\n"[..]);
        assert!(codec.advance(&mut buf).is_err());
        let mut buf = BytesMut::from(&encode_track(&test_track(vec![1]))[..]);
        assert!(codec.advance(&mut buf).is_err());
    }
}
