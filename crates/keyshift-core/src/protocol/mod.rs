//! RESP protocol implementation
//!
//! Client-side codec for the Redis Serialization Protocol. Commands are
//! always sent as RESP2 arrays of bulk strings; replies may be RESP2 or the
//! RESP3 scalar types a server can emit without `HELLO 3` negotiation.

mod encoder;
mod frame;
mod parser;

pub use encoder::{encode_frame, encode_to_bytes};
pub use frame::Frame;
pub use parser::{parse_frame, parse_frame_with_limits, FrameScanner, ParseError, ParserLimits};
