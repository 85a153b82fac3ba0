use std::fmt::{Display, Formatter};

use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::session::SessionId;

/// Protocol sentinel, the first four bytes of every datagram. Datagrams that
/// do not start with it are foreign traffic and get dropped.
pub const MAGIC: u32 = 0xC461C461;

/// Wire format version.
pub const VERSION: u8 = 1;

/// Fixed header length in bytes: magic, version, command, sequence,
/// session id, logical clock.
pub const HEADER_LEN: usize = 18;

/// Command tag of a message. The numeric values are part of the wire format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Command {
    Hello = 0,
    Data = 1,
    Alive = 2,
    Goodbye = 3,
}

/// Reason an inbound datagram could not be decoded. These are dropped and
/// logged, they never produce a reply.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum DecodeError {
    #[error("datagram of {0} bytes is shorter than the {HEADER_LEN} byte header")]
    TooShort(usize),
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported version {0}")]
    BadVersion(u8),
    #[error("unknown command tag {0}")]
    BadCommand(u8),
}

/// One decoded protocol unit. Magic and version are not stored: decoding
/// rejects anything that does not carry the fixed values.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub command: Command,
    pub sequence: u32,
    pub session_id: SessionId,
    pub logical_clock: u32,
    /// Raw application bytes, non-empty only for [Command::Data].
    pub payload: Vec<u8>,
}

impl Message {
    pub fn hello(session_id: SessionId, sequence: u32, logical_clock: u32) -> Message {
        Message { command: Command::Hello, sequence, session_id, logical_clock, payload: Vec::new() }
    }

    pub fn data(session_id: SessionId, sequence: u32, logical_clock: u32, payload: Vec<u8>) -> Message {
        Message { command: Command::Data, sequence, session_id, logical_clock, payload }
    }

    pub fn alive(session_id: SessionId, sequence: u32, logical_clock: u32) -> Message {
        Message { command: Command::Alive, sequence, session_id, logical_clock, payload: Vec::new() }
    }

    pub fn goodbye(session_id: SessionId, sequence: u32, logical_clock: u32) -> Message {
        Message { command: Command::Goodbye, sequence, session_id, logical_clock, payload: Vec::new() }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32(MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(self.command.into());
        buf.put_u32(self.sequence);
        buf.put_u32(self.session_id.0);
        buf.put_u32(self.logical_clock);
        if self.command == Command::Data {
            buf.put_slice(&self.payload);
        }
    }

    /// Convenience wrapper around [ser](Message::ser) allocating the buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        self.ser(&mut buf);
        buf
    }

    /// Parses one datagram. Everything after the fixed header is payload and
    /// is accepted whatever its length; only [Command::Data] keeps it.
    pub fn decode(datagram: &[u8]) -> Result<Message, DecodeError> {
        if datagram.len() < HEADER_LEN {
            return Err(DecodeError::TooShort(datagram.len()));
        }
        let mut buf = datagram;

        let magic = buf.get_u32();
        if magic != MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }
        let version = buf.get_u8();
        if version != VERSION {
            return Err(DecodeError::BadVersion(version));
        }
        let command = Command::try_from(buf.get_u8())
            .map_err(|e| DecodeError::BadCommand(e.number))?;
        let sequence = buf.get_u32();
        let session_id = SessionId(buf.get_u32());
        let logical_clock = buf.get_u32();
        let payload = match command {
            Command::Data => buf.to_vec(),
            _ => Vec::new(),
        };

        Ok(Message { command, sequence, session_id, logical_clock, payload })
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[session={}, seq={}, clock={}]",
               self.command, self.session_id, self.sequence, self.logical_clock)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::hello(Message::hello(SessionId(0x12345678), 0, 0),
        vec![0xc4,0x61,0xc4,0x61, 1, 0, 0,0,0,0, 0x12,0x34,0x56,0x78, 0,0,0,0])]
    #[case::data(Message::data(SessionId(1), 5, 9, b"abc".to_vec()),
        vec![0xc4,0x61,0xc4,0x61, 1, 1, 0,0,0,5, 0,0,0,1, 0,0,0,9, b'a',b'b',b'c'])]
    #[case::data_empty(Message::data(SessionId(1), 6, 10, Vec::new()),
        vec![0xc4,0x61,0xc4,0x61, 1, 1, 0,0,0,6, 0,0,0,1, 0,0,0,10])]
    #[case::alive(Message::alive(SessionId(u32::MAX), 7, 3),
        vec![0xc4,0x61,0xc4,0x61, 1, 2, 0,0,0,7, 0xff,0xff,0xff,0xff, 0,0,0,3])]
    #[case::goodbye(Message::goodbye(SessionId(2), 1, u32::MAX),
        vec![0xc4,0x61,0xc4,0x61, 1, 3, 0,0,0,1, 0,0,0,2, 0xff,0xff,0xff,0xff])]
    fn test_ser_decode(#[case] message: Message, #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        message.ser(&mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());
        assert_eq!(buf, message.encode());

        assert_eq!(Message::decode(&buf), Ok(message));
    }

    #[rstest]
    fn test_decode_truncated() {
        let full = Message::data(SessionId(77), 3, 4, b"xyz".to_vec()).encode();
        for len in 0..HEADER_LEN {
            assert_eq!(Message::decode(&full[..len]), Err(DecodeError::TooShort(len)));
        }
    }

    #[rstest]
    fn test_decode_bad_magic() {
        let mut datagram = Message::alive(SessionId(1), 0, 0).encode();
        datagram[0] = 0x00;
        assert_eq!(Message::decode(&datagram), Err(DecodeError::BadMagic(0x0061C461)));
    }

    #[rstest]
    fn test_decode_bad_version() {
        let mut datagram = Message::alive(SessionId(1), 0, 0).encode();
        datagram[4] = 2;
        assert_eq!(Message::decode(&datagram), Err(DecodeError::BadVersion(2)));
    }

    #[rstest]
    #[case::first_unassigned(4)]
    #[case::max(255)]
    fn test_decode_bad_command(#[case] tag: u8) {
        let mut datagram = Message::alive(SessionId(1), 0, 0).encode();
        datagram[5] = tag;
        assert_eq!(Message::decode(&datagram), Err(DecodeError::BadCommand(tag)));
    }

    #[rstest]
    fn test_decode_oversized_payload() {
        // larger than any configured receive buffer needs to be accepted as-is
        let payload = vec![0xab_u8; 100_000];
        let message = Message::data(SessionId(9), 1, 2, payload);
        assert_eq!(Message::decode(&message.encode()), Ok(message));
    }

    #[rstest]
    fn test_decode_ignores_trailing_bytes_for_non_data() {
        let mut datagram = Message::goodbye(SessionId(3), 1, 1).encode();
        datagram.put_slice(b"junk");
        assert_eq!(Message::decode(&datagram), Ok(Message::goodbye(SessionId(3), 1, 1)));
    }
}
