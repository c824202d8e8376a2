//! RESP protocol encoder

use bytes::{BufMut, BytesMut};

use super::Frame;

/// Encode a frame into the buffer
pub fn encode_frame(frame: &Frame, buf: &mut BytesMut) {
    match frame {
        Frame::Simple(s) => {
            buf.put_u8(b'+');
            buf.put_slice(s);
            buf.put_slice(b"\r\n");
        }
        Frame::Error(s) => {
            buf.put_u8(b'-');
            buf.put_slice(s);
            buf.put_slice(b"\r\n");
        }
        Frame::Integer(n) => {
            buf.put_u8(b':');
            put_decimal(buf, *n);
        }
        Frame::Bulk(None) => buf.put_slice(b"$-1\r\n"),
        Frame::Bulk(Some(data)) => {
            buf.reserve(data.len() + 16);
            buf.put_u8(b'$');
            put_decimal(buf, data.len() as i64);
            buf.put_slice(data);
            buf.put_slice(b"\r\n");
        }
        Frame::Array(None) => buf.put_slice(b"*-1\r\n"),
        Frame::Array(Some(frames)) => {
            buf.put_u8(b'*');
            put_decimal(buf, frames.len() as i64);
            for frame in frames {
                encode_frame(frame, buf);
            }
        }
        Frame::Null => buf.put_slice(b"_\r\n"),
        Frame::Boolean(b) => buf.put_slice(if *b { b"#t\r\n" } else { b"#f\r\n" }),
        Frame::Double(d) => {
            buf.put_u8(b',');
            if d.is_nan() {
                buf.put_slice(b"nan");
            } else if d.is_infinite() {
                buf.put_slice(if *d > 0.0 { b"inf" } else { b"-inf" });
            } else {
                buf.put_slice(d.to_string().as_bytes());
            }
            buf.put_slice(b"\r\n");
        }
    }
}

/// Encode a frame to a new BytesMut
pub fn encode_to_bytes(frame: &Frame) -> BytesMut {
    let mut buf = BytesMut::new();
    encode_frame(frame, &mut buf);
    buf
}

#[inline]
fn put_decimal(buf: &mut BytesMut, n: i64) {
    buf.put_slice(n.to_string().as_bytes());
    buf.put_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_encode_command() {
        let frame = Frame::command("PTTL", [Bytes::from_static(b"session:9")]);
        let encoded = encode_to_bytes(&frame);
        assert_eq!(&encoded[..], b"*2\r\n$4\r\nPTTL\r\n$9\r\nsession:9\r\n");
    }

    #[test]
    fn test_encode_scalars() {
        assert_eq!(&encode_to_bytes(&Frame::simple("OK"))[..], b"+OK\r\n");
        assert_eq!(&encode_to_bytes(&Frame::error("ERR x"))[..], b"-ERR x\r\n");
        assert_eq!(&encode_to_bytes(&Frame::Integer(-2))[..], b":-2\r\n");
        assert_eq!(&encode_to_bytes(&Frame::Null)[..], b"_\r\n");
        assert_eq!(&encode_to_bytes(&Frame::Boolean(false))[..], b"#f\r\n");
    }

    #[test]
    fn test_encode_null_and_empty_bulk() {
        assert_eq!(&encode_to_bytes(&Frame::null())[..], b"$-1\r\n");
        assert_eq!(&encode_to_bytes(&Frame::bulk(""))[..], b"$0\r\n\r\n");
    }

    #[test]
    fn test_encode_nested_array() {
        let frame = Frame::array(vec![
            Frame::bulk("0"),
            Frame::array(vec![Frame::bulk("a"), Frame::bulk("b")]),
        ]);
        let encoded = encode_to_bytes(&frame);
        assert_eq!(&encoded[..], b"*2\r\n$1\r\n0\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n");
    }
}
