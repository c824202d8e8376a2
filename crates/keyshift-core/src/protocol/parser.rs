//! RESP protocol parser
//!
//! Streaming reply parser. A [`FrameScanner`] first checks that the whole
//! frame has arrived, resuming where the previous read left off; the frame
//! is then decoded in one pass. If the buffer ends mid-frame nothing is
//! consumed and the caller reads more from the socket.

use bytes::{Bytes, BytesMut};

use super::Frame;

/// Protocol parser limits.
///
/// Enforced while scanning, before anything is decoded.
#[derive(Debug, Clone)]
pub struct ParserLimits {
    /// Maximum bulk string size in bytes (default: 512MB, matches Redis)
    pub max_bulk_string_size: usize,
    /// Maximum number of elements in an array (default: 16M, enough for KEYS on large instances)
    pub max_array_elements: usize,
    /// Maximum nesting depth (default: 32)
    pub max_nesting_depth: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_bulk_string_size: 512 * 1024 * 1024,
            max_array_elements: 16 * 1024 * 1024,
            max_nesting_depth: 32,
        }
    }
}

/// Parse error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// Not enough data to parse a complete frame
    #[error("incomplete data")]
    Incomplete,

    /// Invalid protocol format
    #[error("invalid protocol: {0}")]
    Invalid(String),

    /// Frame exceeds configured size limits
    #[error("frame too large: {0}")]
    FrameTooLarge(String),
}

#[cold]
#[inline(never)]
fn invalid(msg: impl Into<String>) -> ParseError {
    ParseError::Invalid(msg.into())
}

/// Parse a RESP frame from the buffer
///
/// Returns `Ok(Some(frame))` and advances the buffer if a complete frame was
/// available, `Ok(None)` if more data is needed, or `Err` if the data is
/// invalid.
pub fn parse_frame(buf: &mut BytesMut) -> Result<Option<Frame>, ParseError> {
    parse_frame_with_limits(buf, &ParserLimits::default())
}

/// Parse a RESP frame from the buffer with configurable limits.
pub fn parse_frame_with_limits(
    buf: &mut BytesMut,
    limits: &ParserLimits,
) -> Result<Option<Frame>, ParseError> {
    FrameScanner::new().parse(buf, limits)
}

/// Resumable completeness check for one frame.
///
/// Remembers how far into the buffer it has validated, so a large reply
/// arriving over many socket reads is walked once in total rather than
/// once per read. Only the element cut off by the end of the buffer is
/// looked at again. The frame itself is decoded once the scan completes,
/// slicing payloads out of the frozen buffer without copying.
#[derive(Debug, Default)]
pub struct FrameScanner {
    pos: usize,
    /// Elements still expected by each open array, innermost last
    open: Vec<usize>,
}

enum Step {
    /// A scalar, null, or empty aggregate finished
    Closed,
    /// An array header announcing this many elements
    Opened(usize),
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of the pending frame already validated.
    pub fn scanned(&self) -> usize {
        self.pos
    }

    /// Forget any partial progress.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.open.clear();
    }

    /// Decode the next frame if the buffer now holds all of it.
    ///
    /// The buffer must only grow between calls until a frame is returned;
    /// returning a frame resets the scanner for the next one.
    pub fn parse(
        &mut self,
        buf: &mut BytesMut,
        limits: &ParserLimits,
    ) -> Result<Option<Frame>, ParseError> {
        let len = match self.scan(&buf[..], limits) {
            Ok(Some(len)) => len,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };
        self.reset();

        let mut reader = Reader {
            buf: buf.split_to(len).freeze(),
            pos: 0,
        };
        reader.frame().map(Some)
    }

    /// Walk forward from the last complete element. Returns the frame length
    /// once the outermost frame is complete.
    fn scan(&mut self, buf: &[u8], limits: &ParserLimits) -> Result<Option<usize>, ParseError> {
        loop {
            let depth = self.open.len();
            if depth > limits.max_nesting_depth {
                return Err(ParseError::FrameTooLarge(format!(
                    "nesting depth {} exceeds limit {}",
                    depth, limits.max_nesting_depth
                )));
            }

            let mut cursor = Cursor { buf, pos: self.pos };
            match cursor.element(limits) {
                Ok(step) => {
                    self.pos = cursor.pos;
                    match step {
                        Step::Opened(count) => self.open.push(count),
                        Step::Closed => {
                            while let Some(remaining) = self.open.last_mut() {
                                *remaining -= 1;
                                if *remaining > 0 {
                                    break;
                                }
                                self.open.pop();
                            }
                            if self.open.is_empty() {
                                return Ok(Some(self.pos));
                            }
                        }
                    }
                }
                Err(ParseError::Incomplete) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }
}

/// Borrowed view used by the scanner; validates structure, copies nothing.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn element(&mut self, limits: &ParserLimits) -> Result<Step, ParseError> {
        match self.byte()? {
            b'+' | b'-' | b':' | b',' => {
                self.line_end()?;
                Ok(Step::Closed)
            }
            b'_' => {
                self.skip(2)?;
                Ok(Step::Closed)
            }
            b'#' => {
                self.skip(3)?;
                Ok(Step::Closed)
            }
            b'$' => match length(self.line()?, "bulk string")? {
                None => Ok(Step::Closed),
                Some(len) => {
                    if len > limits.max_bulk_string_size {
                        return Err(ParseError::FrameTooLarge(format!(
                            "bulk string size {} exceeds limit {}",
                            len, limits.max_bulk_string_size
                        )));
                    }
                    self.skip(len.checked_add(2).ok_or(ParseError::Incomplete)?)?;
                    Ok(Step::Closed)
                }
            },
            b'*' => match length(self.line()?, "array")? {
                None | Some(0) => Ok(Step::Closed),
                Some(count) => {
                    if count > limits.max_array_elements {
                        return Err(ParseError::FrameTooLarge(format!(
                            "array element count {} exceeds limit {}",
                            count, limits.max_array_elements
                        )));
                    }
                    Ok(Step::Opened(count))
                }
            },
            other => Err(invalid(format!("unexpected byte: {:02x}", other))),
        }
    }

    fn byte(&mut self) -> Result<u8, ParseError> {
        let b = *self.buf.get(self.pos).ok_or(ParseError::Incomplete)?;
        self.pos += 1;
        Ok(b)
    }

    fn line_end(&mut self) -> Result<usize, ParseError> {
        let end = find_crlf(&self.buf[self.pos..]).ok_or(ParseError::Incomplete)?;
        let line_end = self.pos + end;
        self.pos = line_end + 2;
        Ok(line_end)
    }

    fn line(&mut self) -> Result<&'a [u8], ParseError> {
        let buf: &'a [u8] = self.buf;
        let start = self.pos;
        let end = self.line_end()?;
        Ok(&buf[start..end])
    }

    fn skip(&mut self, n: usize) -> Result<(), ParseError> {
        let end = self.pos.checked_add(n).ok_or(ParseError::Incomplete)?;
        if end > self.buf.len() {
            return Err(ParseError::Incomplete);
        }
        self.pos = end;
        Ok(())
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

fn decimal(line: &[u8]) -> Result<i64, ParseError> {
    let s = std::str::from_utf8(line).map_err(|_| invalid("invalid UTF-8 in integer"))?;
    s.parse()
        .map_err(|_| invalid(format!("invalid integer: {}", s)))
}

/// Reads a length header; `-1` means null.
fn length(line: &[u8], kind: &str) -> Result<Option<usize>, ParseError> {
    match decimal(line)? {
        -1 => Ok(None),
        n if n < -1 => Err(invalid(format!("negative {} length", kind))),
        n => Ok(Some(n as usize)),
    }
}

/// Decodes a frame the scanner has already validated as complete.
struct Reader {
    buf: Bytes,
    pos: usize,
}

impl Reader {
    fn frame(&mut self) -> Result<Frame, ParseError> {
        let tag = self.byte()?;
        match tag {
            b'+' => Ok(Frame::Simple(self.line()?)),
            b'-' => Ok(Frame::Error(self.line()?)),
            b':' => Ok(Frame::Integer(decimal(&self.line()?)?)),
            b'$' => match length(&self.line()?, "bulk string")? {
                None => Ok(Frame::Bulk(None)),
                Some(len) => {
                    let data = self.take(len)?;
                    self.crlf()?;
                    Ok(Frame::Bulk(Some(data)))
                }
            },
            b'*' => match length(&self.line()?, "array")? {
                None => Ok(Frame::Array(None)),
                Some(count) => {
                    let mut items = Vec::with_capacity(count);
                    for _ in 0..count {
                        items.push(self.frame()?);
                    }
                    Ok(Frame::Array(Some(items)))
                }
            },
            b'_' => {
                self.crlf()?;
                Ok(Frame::Null)
            }
            b'#' => {
                let flag = self.byte()?;
                self.crlf()?;
                match flag {
                    b't' => Ok(Frame::Boolean(true)),
                    b'f' => Ok(Frame::Boolean(false)),
                    other => Err(invalid(format!("invalid boolean: {:02x}", other))),
                }
            }
            b',' => {
                let line = self.line()?;
                let s = std::str::from_utf8(&line).map_err(|_| invalid("invalid UTF-8 in double"))?;
                let d = match s {
                    "inf" => f64::INFINITY,
                    "-inf" => f64::NEG_INFINITY,
                    "nan" => f64::NAN,
                    _ => s
                        .parse()
                        .map_err(|_| invalid(format!("invalid double: {}", s)))?,
                };
                Ok(Frame::Double(d))
            }
            other => Err(invalid(format!("unexpected byte: {:02x}", other))),
        }
    }

    fn byte(&mut self) -> Result<u8, ParseError> {
        let b = *self.buf.get(self.pos).ok_or(ParseError::Incomplete)?;
        self.pos += 1;
        Ok(b)
    }

    fn line(&mut self) -> Result<Bytes, ParseError> {
        let end = find_crlf(&self.buf[self.pos..]).ok_or(ParseError::Incomplete)?;
        let line = self.buf.slice(self.pos..self.pos + end);
        self.pos += end + 2;
        Ok(line)
    }

    fn take(&mut self, n: usize) -> Result<Bytes, ParseError> {
        let end = self.pos.checked_add(n).ok_or(ParseError::Incomplete)?;
        if end > self.buf.len() {
            return Err(ParseError::Incomplete);
        }
        let data = self.buf.slice(self.pos..end);
        self.pos = end;
        Ok(data)
    }

    fn crlf(&mut self) -> Result<(), ParseError> {
        match &self.take(2)?[..] {
            b"\r\n" => Ok(()),
            _ => Err(invalid("expected CRLF")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_to_bytes;
    use proptest::prelude::*;

    #[test]
    fn test_parse_simple_string() {
        let mut buf = BytesMut::from("+OK\r\n");
        let frame = parse_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::Simple(Bytes::from("OK")));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_parse_error() {
        let mut buf = BytesMut::from("-ERR DUMP payload version or checksum are wrong\r\n");
        let frame = parse_frame(&mut buf).unwrap().unwrap();
        assert_eq!(
            frame.error_message().as_deref(),
            Some("ERR DUMP payload version or checksum are wrong")
        );
    }

    #[test]
    fn test_parse_integer() {
        let mut buf = BytesMut::from(":-2\r\n");
        let frame = parse_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::Integer(-2));
    }

    #[test]
    fn test_parse_binary_bulk_string() {
        // DUMP payloads contain CRLF bytes inside the body
        let mut buf = BytesMut::from(&b"$6\r\n\x00\r\n\x0b\r\n\r\n"[..]);
        let frame = parse_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::bulk(Bytes::from_static(b"\x00\r\n\x0b\r\n")));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_parse_null_bulk() {
        let mut buf = BytesMut::from("$-1\r\n");
        assert_eq!(parse_frame(&mut buf).unwrap(), Some(Frame::Bulk(None)));
    }

    #[test]
    fn test_parse_scan_reply() {
        let mut buf = BytesMut::from("*2\r\n$2\r\n17\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n");
        let frame = parse_frame(&mut buf).unwrap().unwrap();
        let parts = frame.into_array().unwrap();
        assert_eq!(parts[0].as_str(), Some("17"));
        assert_eq!(parts[1].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_parse_incomplete_leaves_buffer() {
        let mut buf = BytesMut::from("*2\r\n$3\r\nfoo\r\n$3\r\nba");
        let before = buf.len();
        assert_eq!(parse_frame(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), before);

        buf.extend_from_slice(b"r\r\n");
        let frame = parse_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::array(vec![Frame::bulk("foo"), Frame::bulk("bar")]));
    }

    #[test]
    fn test_parse_pipelined_replies() {
        let mut buf = BytesMut::from("+OK\r\n+OK\r\n-ERR bad\r\n");
        assert_eq!(parse_frame(&mut buf).unwrap(), Some(Frame::simple("OK")));
        assert_eq!(parse_frame(&mut buf).unwrap(), Some(Frame::simple("OK")));
        assert!(parse_frame(&mut buf).unwrap().unwrap().is_error());
        assert_eq!(parse_frame(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_parse_resp3_scalars() {
        let mut buf = BytesMut::from("_\r\n#t\r\n,1.5\r\n");
        assert_eq!(parse_frame(&mut buf).unwrap(), Some(Frame::Null));
        assert_eq!(parse_frame(&mut buf).unwrap(), Some(Frame::Boolean(true)));
        assert_eq!(parse_frame(&mut buf).unwrap(), Some(Frame::Double(1.5)));
    }

    #[test]
    fn test_parse_invalid_type_byte() {
        let mut buf = BytesMut::from("?what\r\n");
        assert!(matches!(parse_frame(&mut buf), Err(ParseError::Invalid(_))));
    }

    #[test]
    fn test_parse_negative_length() {
        let mut buf = BytesMut::from("$-5\r\n");
        assert!(matches!(parse_frame(&mut buf), Err(ParseError::Invalid(_))));
    }

    #[test]
    fn test_bulk_limit_enforced() {
        let limits = ParserLimits {
            max_bulk_string_size: 4,
            ..Default::default()
        };
        let mut buf = BytesMut::from("$5\r\nhello\r\n");
        assert!(matches!(
            parse_frame_with_limits(&mut buf, &limits),
            Err(ParseError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_nesting_limit_enforced() {
        let limits = ParserLimits {
            max_nesting_depth: 1,
            ..Default::default()
        };
        let mut buf = BytesMut::from("*1\r\n*1\r\n*1\r\n:1\r\n");
        assert!(matches!(
            parse_frame_with_limits(&mut buf, &limits),
            Err(ParseError::FrameTooLarge(_))
        ));
    }

    fn key_list_reply(n: usize) -> BytesMut {
        let keys = (0..n)
            .map(|i| Frame::bulk(Bytes::from(format!("session:{:013}", i))))
            .collect();
        encode_to_bytes(&Frame::array(keys))
    }

    #[test]
    fn test_scanner_resumes_across_reads() {
        let full = key_list_reply(20_000);
        let mut scanner = FrameScanner::new();
        let limits = ParserLimits::default();
        let mut buf = BytesMut::new();
        let mut parsed = None;
        let mut last_scanned = 0;

        for chunk in full.chunks(4096) {
            buf.extend_from_slice(chunk);
            match scanner.parse(&mut buf, &limits).unwrap() {
                Some(frame) => parsed = Some(frame),
                None => {
                    // Progress is kept; only the element cut off by the read is revisited.
                    assert!(scanner.scanned() >= last_scanned);
                    assert!(buf.len() - scanner.scanned() < 64);
                    last_scanned = scanner.scanned();
                }
            }
        }

        let items = parsed.unwrap().into_array().unwrap();
        assert_eq!(items.len(), 20_000);
        assert_eq!(items[19_999].as_str(), Some("session:0000000019999"));
        assert!(buf.is_empty());
        assert_eq!(scanner.scanned(), 0);
    }

    #[test]
    fn test_scanner_leaves_next_reply_buffered() {
        let mut buf = BytesMut::from("*2\r\n:1\r\n:2\r\n+PONG\r\n");
        let mut scanner = FrameScanner::new();
        let limits = ParserLimits::default();
        let first = scanner.parse(&mut buf, &limits).unwrap().unwrap();
        assert_eq!(first, Frame::array(vec![Frame::Integer(1), Frame::Integer(2)]));
        assert_eq!(scanner.parse(&mut buf, &limits).unwrap(), Some(Frame::simple("PONG")));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_parse_empty_array() {
        let mut buf = BytesMut::from("*0\r\n");
        assert_eq!(parse_frame(&mut buf).unwrap(), Some(Frame::array(vec![])));
    }

    proptest! {
        #[test]
        fn prop_bulk_payload_survives_codec(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
            let frame = Frame::bulk(Bytes::from(payload.clone()));
            let mut buf = encode_to_bytes(&frame);
            let parsed = parse_frame(&mut buf).unwrap().unwrap();
            prop_assert_eq!(parsed.into_bytes().unwrap().to_vec(), payload);
            prop_assert!(buf.is_empty());
        }

        #[test]
        fn prop_truncated_input_is_incomplete(payload in proptest::collection::vec(any::<u8>(), 1..128), cut in 1usize..8) {
            let frame = Frame::array(vec![Frame::bulk(Bytes::from(payload))]);
            let full = encode_to_bytes(&frame);
            let keep = full.len().saturating_sub(cut);
            let mut buf = BytesMut::from(&full[..keep]);
            prop_assert_eq!(parse_frame(&mut buf).unwrap(), None);
            prop_assert_eq!(buf.len(), keep);
        }
    }
}
