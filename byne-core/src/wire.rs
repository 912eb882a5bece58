//! Wire codec: fixed-layout payloads for each command, and multipart framing
//! (4 bytes LE frame count, then 4 bytes LE length + bytes per frame).

use crate::protocol::{Command, Reply, Request, MAX_VALUE, PROTOCOL_VERSION};

const LEN_SIZE: usize = 4;

/// Maximum number of frames in one message.
pub const MAX_FRAMES: usize = 16;

/// Maximum size of a single frame.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Malformed payload. Fatal to the request that produced it, never repaired.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("empty payload")]
    Empty,
    #[error("unexpected {command} reply length: expected at least {expected}, got {actual}")]
    TooShort {
        command: Command,
        expected: usize,
        actual: usize,
    },
    #[error("unexpected reply command: expected {expected}, got 0x{actual:02x}")]
    UnexpectedCommand { expected: Command, actual: u8 },
    #[error("cannot handle protocol version {actual} (expected {expected})")]
    UnsupportedVersion { expected: u8, actual: u8 },
    #[error("out of range value in {command}: {value}")]
    ValueOutOfRange { command: Command, value: u8 },
    #[error("unknown command 0x{0:02x}")]
    UnknownCommand(u8),
}

/// Encode a request payload.
pub fn encode_request(req: &Request) -> Vec<u8> {
    match *req {
        Request::AcceptValue(v) => vec![Command::AcceptValue.as_byte(), v],
        other => vec![other.command().as_byte()],
    }
}

/// Decode a request payload. Strict: the server decides how lenient to be.
pub fn decode_request(bytes: &[u8]) -> Result<Request, ProtocolViolation> {
    let Some(&first) = bytes.first() else {
        return Err(ProtocolViolation::Empty);
    };
    let command = Command::from_byte(first).ok_or(ProtocolViolation::UnknownCommand(first))?;
    match command {
        Command::Hello => Ok(Request::Hello),
        Command::GetEven => Ok(Request::GetEven),
        Command::GetOdd => Ok(Request::GetOdd),
        Command::AcceptValue => {
            let Some(&value) = bytes.get(1) else {
                return Err(ProtocolViolation::TooShort {
                    command,
                    expected: 2,
                    actual: bytes.len(),
                });
            };
            check_range(command, value)?;
            Ok(Request::AcceptValue(value))
        }
    }
}

/// Encode a reply payload.
pub fn encode_reply(reply: &Reply) -> Vec<u8> {
    match *reply {
        Reply::Hello { version, value } => vec![Command::Hello.as_byte(), version, value],
        Reply::GetEven(v) => vec![Command::GetEven.as_byte(), v],
        Reply::GetOdd(v) => vec![Command::GetOdd.as_byte(), v],
        Reply::AcceptValue => vec![Command::AcceptValue.as_byte()],
    }
}

/// Decode the reply to a request of kind `expected`.
/// Validates length, command byte, protocol version (hello) and value range.
pub fn decode_reply(expected: Command, bytes: &[u8]) -> Result<Reply, ProtocolViolation> {
    let need = expected.reply_len();
    if bytes.len() < need {
        return Err(ProtocolViolation::TooShort {
            command: expected,
            expected: need,
            actual: bytes.len(),
        });
    }
    if bytes[0] != expected.as_byte() {
        return Err(ProtocolViolation::UnexpectedCommand {
            expected,
            actual: bytes[0],
        });
    }
    match expected {
        Command::Hello => {
            let version = bytes[1];
            if version != PROTOCOL_VERSION {
                return Err(ProtocolViolation::UnsupportedVersion {
                    expected: PROTOCOL_VERSION,
                    actual: version,
                });
            }
            let value = check_range(expected, bytes[2])?;
            Ok(Reply::Hello { version, value })
        }
        Command::GetEven => Ok(Reply::GetEven(check_range(expected, bytes[1])?)),
        Command::GetOdd => Ok(Reply::GetOdd(check_range(expected, bytes[1])?)),
        Command::AcceptValue => Ok(Reply::AcceptValue),
    }
}

fn check_range(command: Command, value: u8) -> Result<u8, ProtocolViolation> {
    if value > MAX_VALUE {
        return Err(ProtocolViolation::ValueOutOfRange { command, value });
    }
    Ok(value)
}

/// Encode a multipart message.
pub fn encode_message<B: AsRef<[u8]>>(frames: &[B]) -> Result<Vec<u8>, FrameEncodeError> {
    if frames.len() > MAX_FRAMES {
        return Err(FrameEncodeError::TooManyFrames(frames.len()));
    }
    let total: usize = frames.iter().map(|f| LEN_SIZE + f.as_ref().len()).sum();
    let mut out = Vec::with_capacity(LEN_SIZE + total);
    out.extend_from_slice(&(frames.len() as u32).to_le_bytes());
    for frame in frames {
        let frame = frame.as_ref();
        if frame.len() > MAX_FRAME_LEN {
            return Err(FrameEncodeError::TooLarge);
        }
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(frame);
    }
    Ok(out)
}

/// Error encoding a multipart message.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("frame too large")]
    TooLarge,
    #[error("too many frames: {0}")]
    TooManyFrames(usize),
}

/// Decode one multipart message from the front of `bytes`. Returns the frames and the number of bytes consumed.
/// Call with partial buffer; returns NeedMore if not enough bytes (caller should try again after more data).
pub fn decode_message(bytes: &[u8]) -> Result<(Vec<Vec<u8>>, usize), FrameDecodeError> {
    let count = read_len(bytes, 0).ok_or(FrameDecodeError::NeedMore)?;
    if count > MAX_FRAMES {
        return Err(FrameDecodeError::TooManyFrames(count));
    }
    let mut pos = LEN_SIZE;
    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_len(bytes, pos).ok_or(FrameDecodeError::NeedMore)?;
        if len > MAX_FRAME_LEN {
            return Err(FrameDecodeError::TooLarge);
        }
        pos += LEN_SIZE;
        if bytes.len() < pos + len {
            return Err(FrameDecodeError::NeedMore);
        }
        frames.push(bytes[pos..pos + len].to_vec());
        pos += len;
    }
    Ok((frames, pos))
}

fn read_len(bytes: &[u8], at: usize) -> Option<usize> {
    let b = bytes.get(at..at + LEN_SIZE)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
}

/// Error decoding a multipart message.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("too many frames: {0}")]
    TooManyFrames(usize),
}

/// Accumulates bytes read from a stream and yields complete messages.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete message, if buffered.
    pub fn next_message(&mut self) -> Result<Option<Vec<Vec<u8>>>, FrameDecodeError> {
        match decode_message(&self.buf) {
            Ok((frames, n)) => {
                self.buf.drain(..n);
                Ok(Some(frames))
            }
            Err(FrameDecodeError::NeedMore) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layouts() {
        assert_eq!(encode_request(&Request::Hello), vec![0x00]);
        assert_eq!(encode_request(&Request::GetEven), vec![0x01]);
        assert_eq!(encode_request(&Request::GetOdd), vec![0x02]);
        assert_eq!(encode_request(&Request::AcceptValue(42)), vec![0x03, 42]);
    }

    #[test]
    fn decode_hello_reply() {
        let r = decode_reply(Command::Hello, &[0x00, PROTOCOL_VERSION, 17]).unwrap();
        assert_eq!(
            r,
            Reply::Hello {
                version: PROTOCOL_VERSION,
                value: 17
            }
        );
    }

    #[test]
    fn hello_reply_value_out_of_range() {
        let err = decode_reply(Command::Hello, &[0x00, PROTOCOL_VERSION, 100]).unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::ValueOutOfRange {
                command: Command::Hello,
                value: 100
            }
        );
    }

    #[test]
    fn hello_reply_wrong_version() {
        let err = decode_reply(Command::Hello, &[0x00, 2, 5]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolViolation::UnsupportedVersion { actual: 2, .. }
        ));
    }

    #[test]
    fn reply_too_short() {
        let err = decode_reply(Command::Hello, &[0x00, 1]).unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::TooShort {
                command: Command::Hello,
                expected: 3,
                actual: 2
            }
        );
        assert!(matches!(
            decode_reply(Command::GetOdd, &[]),
            Err(ProtocolViolation::TooShort { actual: 0, .. })
        ));
    }

    #[test]
    fn reply_command_mismatch() {
        let err = decode_reply(Command::GetOdd, &[0x01, 4]).unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::UnexpectedCommand {
                expected: Command::GetOdd,
                actual: 0x01
            }
        );
    }

    #[test]
    fn accept_value_reply_ignores_trailing_bytes() {
        assert_eq!(
            decode_reply(Command::AcceptValue, &[0x03, 0xaa]).unwrap(),
            Reply::AcceptValue
        );
    }

    #[test]
    fn decode_request_rejects_bad_input() {
        assert_eq!(decode_request(&[]), Err(ProtocolViolation::Empty));
        assert_eq!(
            decode_request(&[0x09]),
            Err(ProtocolViolation::UnknownCommand(0x09))
        );
        assert!(matches!(
            decode_request(&[0x03]),
            Err(ProtocolViolation::TooShort { expected: 2, .. })
        ));
        assert!(matches!(
            decode_request(&[0x03, 150]),
            Err(ProtocolViolation::ValueOutOfRange { value: 150, .. })
        ));
        assert_eq!(decode_request(&[0x03, 99]), Ok(Request::AcceptValue(99)));
    }

    #[test]
    fn message_roundtrip_with_empty_frame() {
        let frames: Vec<&[u8]> = vec![b"client-1".as_slice(), b"".as_slice(), &[0x03, 7]];
        let bytes = encode_message(&frames).unwrap();
        let (decoded, n) = decode_message(&bytes).unwrap();
        assert_eq!(n, bytes.len());
        assert_eq!(decoded.len(), 3);
        assert!(decoded[1].is_empty());
        assert_eq!(decoded[2], vec![0x03, 7]);
    }

    #[test]
    fn partial_read_need_more() {
        let bytes = encode_message(&[b"abc".as_slice(), b"".as_slice()]).unwrap();
        for cut in 0..bytes.len() {
            assert_eq!(
                decode_message(&bytes[..cut]).unwrap_err(),
                FrameDecodeError::NeedMore
            );
        }
    }

    #[test]
    fn oversized_frames_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_le_bytes());
        assert_eq!(decode_message(&bytes), Err(FrameDecodeError::TooLarge));

        let count = (MAX_FRAMES as u32 + 1).to_le_bytes();
        assert_eq!(
            decode_message(&count),
            Err(FrameDecodeError::TooManyFrames(MAX_FRAMES + 1))
        );
        let too_many: Vec<&[u8]> = vec![b"x".as_slice(); MAX_FRAMES + 1];
        assert!(matches!(
            encode_message(&too_many),
            Err(FrameEncodeError::TooManyFrames(_))
        ));
    }

    #[test]
    fn frame_buffer_yields_messages_in_order() {
        let a = encode_message(&[b"a".as_slice()]).unwrap();
        let b = encode_message(&[b"".as_slice(), b"bb".as_slice()]).unwrap();
        let mut stream = a.clone();
        stream.extend_from_slice(&b);

        let mut fb = FrameBuffer::new();
        fb.extend(&stream[..3]);
        assert_eq!(fb.next_message().unwrap(), None);
        fb.extend(&stream[3..]);
        assert_eq!(fb.next_message().unwrap(), Some(vec![b"a".to_vec()]));
        assert_eq!(
            fb.next_message().unwrap(),
            Some(vec![Vec::new(), b"bb".to_vec()])
        );
        assert_eq!(fb.next_message().unwrap(), None);
        assert!(fb.is_empty());
    }
}
