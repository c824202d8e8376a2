//! RESP Frame types
//!
//! This module defines the Frame enum for the reply types a client reads
//! back from a Redis-compatible server, plus builders for outgoing commands.

use bytes::Bytes;

/// RESP protocol frame types
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string: +OK\r\n
    Simple(Bytes),

    /// Error: -ERR message\r\n
    Error(Bytes),

    /// Integer: :1000\r\n
    Integer(i64),

    /// Bulk string: $5\r\nhello\r\n or $-1\r\n for null
    Bulk(Option<Bytes>),

    /// Array: *2\r\n... or *-1\r\n for null
    Array(Option<Vec<Frame>>),

    /// Null: _\r\n (RESP3 explicit null)
    Null,

    /// Boolean: #t\r\n or #f\r\n
    Boolean(bool),

    /// Double: ,3.14\r\n
    Double(f64),
}

impl Frame {
    /// Create a simple string frame
    #[inline]
    pub fn simple(s: impl Into<Bytes>) -> Self {
        Frame::Simple(s.into())
    }

    /// Create an error frame
    #[cold]
    #[inline]
    pub fn error(s: impl Into<Bytes>) -> Self {
        Frame::Error(s.into())
    }

    /// Create a bulk string frame
    #[inline]
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(Some(data.into()))
    }

    /// Create a null bulk string frame
    #[inline]
    pub fn null() -> Self {
        Frame::Bulk(None)
    }

    /// Create an array frame
    #[inline]
    pub fn array(frames: Vec<Frame>) -> Self {
        Frame::Array(Some(frames))
    }

    /// Build a command as an array of bulk strings.
    ///
    /// ```
    /// use bytes::Bytes;
    /// use keyshift_core::protocol::Frame;
    ///
    /// let cmd = Frame::command("EXISTS", [Bytes::from_static(b"user:1")]);
    /// assert_eq!(cmd.as_array().map(Vec::len), Some(2));
    /// ```
    pub fn command<I>(name: &'static str, args: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        let mut parts = vec![Frame::bulk(Bytes::from_static(name.as_bytes()))];
        parts.extend(args.into_iter().map(Frame::bulk));
        Frame::Array(Some(parts))
    }

    /// Check if this frame is null (bulk, array, or RESP3 Null)
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Bulk(None) | Frame::Array(None) | Frame::Null)
    }

    /// Check if this frame is an error
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }

    /// The error message if this is an error reply
    pub fn error_message(&self) -> Option<String> {
        match self {
            Frame::Error(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    /// Get the string value if this is a Simple or Bulk frame
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Frame::Simple(b) => std::str::from_utf8(b).ok(),
            Frame::Bulk(Some(b)) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Get the integer value if this is an Integer frame
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Frame::Integer(n) => Some(*n),
            Frame::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Get the array if this is an Array frame
    pub fn as_array(&self) -> Option<&Vec<Frame>> {
        match self {
            Frame::Array(Some(arr)) => Some(arr),
            _ => None,
        }
    }

    /// Convert to owned array if this is an Array frame
    pub fn into_array(self) -> Option<Vec<Frame>> {
        match self {
            Frame::Array(Some(arr)) => Some(arr),
            _ => None,
        }
    }

    /// Convert to owned bytes if this is a Bulk or Simple frame
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            Frame::Bulk(Some(b)) | Frame::Simple(b) => Some(b),
            _ => None,
        }
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Frame::bulk(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<i64> for Frame {
    fn from(n: i64) -> Self {
        Frame::Integer(n)
    }
}

impl From<Bytes> for Frame {
    fn from(b: Bytes) -> Self {
        Frame::bulk(b)
    }
}
