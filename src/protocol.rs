//! Wire protocol between workers and the collector
//!
//! Every worker message is a frame:
//!
//! ```text
//! +-----+----------------+----------------------+
//! | tag | len (u32, BE)  | payload (len bytes)  |
//! +-----+----------------+----------------------+
//!   'R'   result record: "count\tmean\tstd\tpath"
//!   'E'   termination:   "Ended"
//! ```
//!
//! The collector replies with the two bytes `Ok` after consuming each
//! frame. The configuration handoff that precedes all worker traffic is a
//! bare 4-byte big-endian worker count.

use crate::error::{ProtocolError, TransportError};
use crate::stats::ResultRecord;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use tracing::trace;

/// Acknowledgment sent by the collector after every consumed frame
pub const ACK: &[u8; 2] = b"Ok";

/// Payload of the termination frame
pub const TERMINATION: &str = "Ended";

/// Upper bound on a frame payload
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const TAG_RECORD: u8 = b'R';
const TAG_ENDED: u8 = b'E';
const HEADER_LEN: usize = 5;

/// A message from a worker to the collector
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Summary of one file
    Record(ResultRecord),

    /// The worker has no more work and is about to disconnect
    Ended,
}

impl Message {
    /// Serialize to a complete frame
    pub fn encode(&self) -> Vec<u8> {
        let (tag, payload) = match self {
            Message::Record(record) => (TAG_RECORD, record.to_string()),
            Message::Ended => (TAG_ENDED, TERMINATION.to_string()),
        };

        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.push(tag);
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(payload.as_bytes());
        frame
    }

    fn decode(tag: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidUtf8)?;
        match tag {
            TAG_RECORD => Ok(Message::Record(text.parse()?)),
            TAG_ENDED if text == TERMINATION => Ok(Message::Ended),
            TAG_ENDED => Err(ProtocolError::InvalidTermination),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

/// Reassembles frames from whatever chunks the socket hands back
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the connection
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet consumed as frames
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete message, if one has fully arrived
    pub fn next_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let tag = self.buf[0];
        if tag != TAG_RECORD && tag != TAG_ENDED {
            return Err(ProtocolError::UnknownTag(tag));
        }

        let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let message = Message::decode(tag, &self.buf[HEADER_LEN..HEADER_LEN + len])?;
        self.buf.drain(..HEADER_LEN + len);
        Ok(Some(message))
    }
}

/// Encode the worker count for the configuration handoff
pub fn encode_worker_count(workers: u32) -> [u8; 4] {
    workers.to_be_bytes()
}

/// Decode the worker count sent during the configuration handoff
pub fn decode_worker_count(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

/// Send the acknowledgment on a collector-side connection
pub fn write_ack<W: Write>(writer: &mut W) -> io::Result<()> {
    writer.write_all(ACK)
}

/// A worker's persistent connection to the collector
pub struct CollectorLink {
    stream: TcpStream,
}

impl CollectorLink {
    /// Connect to the collector
    pub fn connect(addr: SocketAddr) -> Result<Self, TransportError> {
        let stream =
            TcpStream::connect(addr).map_err(|source| TransportError::Connect { addr, source })?;
        stream.set_nodelay(true).map_err(TransportError::Send)?;
        Ok(Self { stream })
    }

    /// Send a message and wait for the acknowledgment
    pub fn deliver(&mut self, message: &Message) -> Result<(), TransportError> {
        self.send(message)?;
        self.await_ack()
    }

    /// Write one frame
    pub fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let frame = message.encode();
        trace!(bytes = frame.len(), "Sending frame");
        self.stream.write_all(&frame).map_err(TransportError::Send)
    }

    /// Block until the collector acknowledges the last frame
    pub fn await_ack(&mut self) -> Result<(), TransportError> {
        let mut reply = [0u8; ACK.len()];
        self.stream.read_exact(&mut reply).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                TransportError::Closed
            } else {
                TransportError::Receive(e)
            }
        })?;
        if &reply != ACK {
            return Err(ProtocolError::BadAck(reply.to_vec()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str) -> ResultRecord {
        ResultRecord {
            count: 3,
            mean: 2.0,
            std_dev: 0.816,
            path: path.to_string(),
        }
    }

    #[test]
    fn test_frame_layout() {
        let frame = Message::Ended.encode();
        assert_eq!(frame, b"E\x00\x00\x00\x05Ended");

        let frame = Message::Record(record("a.dat")).encode();
        assert_eq!(frame[0], b'R');
        assert_eq!(&frame[5..], b"3\t2.00\t0.82\ta.dat");
    }

    #[test]
    fn test_decoder_handles_split_and_coalesced_frames() {
        let mut wire = Message::Record(record("a.dat")).encode();
        wire.extend(Message::Ended.encode());

        let mut decoder = FrameDecoder::new();
        let mut messages = Vec::new();
        for byte in &wire {
            decoder.extend(std::slice::from_ref(byte));
            while let Some(message) = decoder.next_message().unwrap() {
                messages.push(message);
            }
        }

        assert_eq!(messages.len(), 2);
        match &messages[0] {
            Message::Record(r) => {
                assert_eq!(r.count, 3);
                assert_eq!(r.path, "a.dat");
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(messages[1], Message::Ended);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_short_result_is_not_termination() {
        // A result line as short as the termination token stays a result
        let mut decoder = FrameDecoder::new();
        decoder.extend(&Message::Record(record("x")).encode());
        assert!(matches!(
            decoder.next_message().unwrap(),
            Some(Message::Record(_))
        ));
    }

    #[test]
    fn test_decoder_rejects_bad_frames() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"Z\x00\x00\x00\x01x");
        assert_eq!(decoder.next_message(), Err(ProtocolError::UnknownTag(b'Z')));

        let mut decoder = FrameDecoder::new();
        decoder.extend(b"R\xff\xff\xff\xff");
        assert!(matches!(
            decoder.next_message(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));

        let mut decoder = FrameDecoder::new();
        decoder.extend(b"E\x00\x00\x00\x04Done");
        assert_eq!(
            decoder.next_message(),
            Err(ProtocolError::InvalidTermination)
        );

        let mut decoder = FrameDecoder::new();
        decoder.extend(b"R\x00\x00\x00\x03a\tb");
        assert!(matches!(
            decoder.next_message(),
            Err(ProtocolError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_worker_count_encoding() {
        assert_eq!(encode_worker_count(3), [0, 0, 0, 3]);
        assert_eq!(decode_worker_count([0, 0, 1, 0]), 256);
    }
}
