//! Streaming FIX frame extraction over a growable byte buffer.
//!
//! Grounded on the teacher's `protocol::try_extract_one` (memchr-based
//! `8=`/`9=` scanning, fixed 7-byte `10=nnn<SOH>` trailer) and on
//! `original_source/src/C++/ThreadedSocketConnection.cpp`'s `readMessage`/
//! `processStream` loop: bytes accumulate in one buffer, frames are pulled
//! out as they complete, and a malformed frame is skipped rather than
//! killing the connection.

use bytes::{Buf, Bytes, BytesMut};

/// Result of one `FixParser::parse` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// A complete, framed message was extracted and consumed from the buffer.
    Ready(Bytes),
    /// Not enough bytes buffered yet to know whether a full message is present.
    NeedMore,
    /// The buffer contains unparseable garbage up to `skipped` bytes, which
    /// have already been discarded; the caller should call `parse` again.
    Malformed(String),
}

/// Accumulates inbound bytes from a connection and extracts complete FIX
/// frames one at a time, resynchronizing past garbage instead of failing
/// the whole stream. Checksum and BodyLength exactness (invariant 4) are
/// enforced by [`crate::message::Message::decode`], not here: this layer's
/// only job is finding message boundaries.
#[derive(Debug, Default)]
pub struct FixParser {
    buf: BytesMut,
}

impl FixParser {
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    /// Mutable access to the internal buffer, for a reader to `put_slice`
    /// fresh bytes from the socket into directly.
    pub fn buffer(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Feed freshly-read bytes into the parser.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes currently buffered and not yet consumed.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Drop all buffered bytes, e.g. on reconnect.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Attempt to extract one complete frame from the front of the buffer.
    ///
    /// Exact algorithm (spec §4.1): locate `8=`, then the SOH ending it;
    /// locate the following `9=`, parse its decimal BodyLength, and skip
    /// its SOH; advance exactly BodyLength bytes; require a trailer of
    /// `10=` followed by exactly three ASCII digits and a terminating SOH.
    /// Bytes before a usable `8=` are garbage and are discarded so the next
    /// call can resynchronize on the next candidate frame.
    pub fn parse(&mut self) -> ParseOutcome {
        let data: &[u8] = &self.buf;

        let Some(begin_at) = memchr::memmem::find(data, b"8=") else {
            // No BeginString candidate at all; keep everything in case a
            // partial "8=" is about to arrive split across reads... but a
            // literal "8=" substring is two bytes, so there is nothing
            // partial to wait for. Still, only discard if there's enough
            // buffered to be sure nothing will ever match, per below.
            if data.len() > 1 {
                let garbage = data.len() - 1;
                self.buf.advance(garbage);
                return ParseOutcome::Malformed(format!("discarded {garbage} bytes with no BeginString"));
            }
            return ParseOutcome::NeedMore;
        };

        if begin_at > 0 {
            self.buf.advance(begin_at);
            return ParseOutcome::Malformed(format!("discarded {begin_at} bytes before BeginString"));
        }

        let begin_soh = match memchr::memchr(SOH_BYTE, data) {
            Some(i) => i,
            None => return ParseOutcome::NeedMore,
        };

        let rest = &data[begin_soh + 1..];
        let Some(nine_rel) = memchr::memmem::find(rest, b"9=") else {
            // Without a bound on how much non-"9=" data can precede it we
            // cannot yet declare this malformed; wait for more bytes unless
            // the buffer has clearly grown past any plausible header.
            if rest.len() > MAX_HEADER_SCAN {
                let garbage = begin_soh + 1;
                self.buf.advance(garbage);
                return ParseOutcome::Malformed("no BodyLength field found after BeginString".into());
            }
            return ParseOutcome::NeedMore;
        };
        if nine_rel != 0 {
            // BeginString must be immediately followed by BodyLength.
            let garbage = begin_soh + 1;
            self.buf.advance(garbage);
            return ParseOutcome::Malformed("BodyLength did not immediately follow BeginString".into());
        }
        let nine_pos = begin_soh + 1;
        let Some(nine_soh_rel) = memchr::memchr(SOH_BYTE, &data[nine_pos..]) else {
            return ParseOutcome::NeedMore;
        };
        let nine_soh = nine_pos + nine_soh_rel;

        let body_len_str = match std::str::from_utf8(&data[nine_pos + 2..nine_soh]) {
            Ok(s) => s,
            Err(_) => {
                self.buf.advance(nine_soh + 1);
                return ParseOutcome::Malformed("non-UTF8 BodyLength field".into());
            }
        };
        let body_len: usize = match body_len_str.parse() {
            Ok(n) => n,
            Err(_) => {
                self.buf.advance(nine_soh + 1);
                return ParseOutcome::Malformed(format!("non-numeric BodyLength: {body_len_str:?}"));
            }
        };

        let body_start = nine_soh + 1;
        let trailer_start = body_start + body_len;
        let total_len = trailer_start + TRAILER_LEN;

        if data.len() < total_len {
            return ParseOutcome::NeedMore;
        }

        let trailer = &data[trailer_start..total_len];
        if !trailer.starts_with(b"10=")
            || trailer[trailer.len() - 1] != SOH_BYTE
            || !trailer[3..6].iter().all(u8::is_ascii_digit)
        {
            // The declared BodyLength didn't land on a real trailer; skip
            // past BeginString and let the next call resynchronize.
            self.buf.advance(begin_soh + 1);
            return ParseOutcome::Malformed("BodyLength did not land on a 10=nnn trailer".into());
        }

        let frame = Bytes::copy_from_slice(&data[..total_len]);
        self.buf.advance(total_len);
        ParseOutcome::Ready(frame)
    }

    /// Drain every complete frame currently buffered, surfacing malformed
    /// spans as log-worthy strings rather than stopping the drain — matching
    /// `processStream`'s "log and continue" handling of `MessageParseError`.
    pub fn drain(&mut self) -> (Vec<Bytes>, Vec<String>) {
        let mut frames = Vec::new();
        let mut errors = Vec::new();
        loop {
            match self.parse() {
                ParseOutcome::Ready(frame) => frames.push(frame),
                ParseOutcome::Malformed(reason) => errors.push(reason),
                ParseOutcome::NeedMore => break,
            }
        }
        (frames, errors)
    }
}

const SOH_BYTE: u8 = crate::message::SOH;
const TRAILER_LEN: usize = 7; // "10=" + 3 digits + SOH
const MAX_HEADER_SCAN: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body_fields: &str) -> Vec<u8> {
        let body_len = body_fields.len();
        let head = format!("8=FIX.4.4\x019={body_len}\x01{body_fields}");
        let checksum = head.bytes().fold(0u8, |acc, b| acc.wrapping_add(b));
        format!("{head}10={checksum:03}\x01").into_bytes()
    }

    #[test]
    fn parse_reports_need_more_on_empty_buffer() {
        let mut parser = FixParser::new();
        assert_eq!(parser.parse(), ParseOutcome::NeedMore);
    }

    #[test]
    fn parse_extracts_a_single_complete_frame() {
        let mut parser = FixParser::new();
        let bytes = frame("35=0\x01");
        parser.extend(&bytes);
        match parser.parse() {
            ParseOutcome::Ready(frame) => assert_eq!(frame.as_ref(), bytes.as_slice()),
            other => panic!("expected Ready, got {other:?}"),
        }
        assert_eq!(parser.buffered_len(), 0);
    }

    #[test]
    fn parse_waits_for_more_bytes_when_body_is_incomplete() {
        let mut parser = FixParser::new();
        let bytes = frame("35=0\x01");
        parser.extend(&bytes[..bytes.len() - 3]);
        assert_eq!(parser.parse(), ParseOutcome::NeedMore);
    }

    #[test]
    fn parse_extracts_two_frames_back_to_back() {
        let mut parser = FixParser::new();
        let a = frame("35=0\x01");
        let b = frame("35=1\x01112=ping\x01");
        parser.extend(&a);
        parser.extend(&b);
        let (frames, errors) = parser.drain();
        assert!(errors.is_empty());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref(), a.as_slice());
        assert_eq!(frames[1].as_ref(), b.as_slice());
    }

    #[test]
    fn parse_resynchronizes_past_garbage_before_begin_string() {
        let mut parser = FixParser::new();
        let mut buf = b"garbage-not-fix-".to_vec();
        let good = frame("35=0\x01");
        buf.extend_from_slice(&good);
        parser.extend(&buf);

        let (frames, errors) = parser.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), good.as_slice());
        assert!(!errors.is_empty());
    }

    #[test]
    fn parse_flags_non_numeric_body_length_as_malformed() {
        let mut parser = FixParser::new();
        parser.extend(b"8=FIX.4.4\x019=abc\x0135=0\x0110=000\x01");
        match parser.parse() {
            ParseOutcome::Malformed(_) => {}
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn parse_tolerates_checksum_mismatch_leaving_it_to_message_decode() {
        // The parser only frames; checksum correctness is message.rs's job.
        let mut parser = FixParser::new();
        let mut bytes = frame("35=0\x01");
        let len = bytes.len();
        bytes[len - 4] = b'9'; // corrupt one checksum digit
        parser.extend(&bytes);
        match parser.parse() {
            ParseOutcome::Ready(_) => {}
            other => panic!("expected Ready even with a bad checksum digit, got {other:?}"),
        }
    }
}
