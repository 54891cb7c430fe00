use std::io::{self, Read, Write};

use thiserror::Error;

use crate::demand::{DemandPatch, FrameError};

/// Reserved single-byte codes exchanged before streaming starts.
pub const HELLO: u8 = 0x01;
pub const BATTERY_READY: u8 = 0x02;
pub const BATTERY_FAILED: u8 = 0x00;

/// Everything that travels on the link.
///
/// `Hello`/`HelloAck` and `BatteryReady`/`BatteryAck` share their wire value,
/// the direction tells them apart.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello,
    HelloAck,
    BatteryReady,
    BatteryAck,
    BatteryFailed,
    DemandFrame(DemandPatch),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("unexpected byte 0x{got:02x} while expecting {expected}")]
    UnexpectedByte { got: u8, expected: &'static str },
    #[error("connection closed by peer")]
    Closed,
    #[error("cannot encode demand frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Message {
    /// Wire representation of the message.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(match self {
            Message::Hello | Message::HelloAck => vec![HELLO],
            Message::BatteryReady | Message::BatteryAck => vec![BATTERY_READY],
            Message::BatteryFailed => vec![BATTERY_FAILED],
            Message::DemandFrame(patch) => {
                let mut frame = serde_json::to_vec(patch)?;
                frame.push(b'\n');
                frame
            },
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtocolError> {
        writer.write_all(&self.to_bytes()?)?;
        writer.flush()?;
        Ok(())
    }

    /// Decode a control byte sent by the client.
    pub fn from_request(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            HELLO => Ok(Message::Hello),
            BATTERY_READY => Ok(Message::BatteryReady),
            got => Err(ProtocolError::UnexpectedByte {
                got,
                expected: "a client request",
            }),
        }
    }

    /// Decode a control byte sent back by the server.
    pub fn from_reply(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            HELLO => Ok(Message::HelloAck),
            BATTERY_READY => Ok(Message::BatteryAck),
            BATTERY_FAILED => Ok(Message::BatteryFailed),
            got => Err(ProtocolError::UnexpectedByte {
                got,
                expected: "a server reply",
            }),
        }
    }

    /// Decode one streaming line, trailing newline included or not.
    pub fn from_frame(line: &str) -> Result<Self, FrameError> {
        DemandPatch::parse(line.trim()).map(Message::DemandFrame)
    }
}

/// Read a single control byte. Timeouts are passed through untouched so the
/// caller can decide whether to keep waiting.
pub fn read_byte<R: Read>(reader: &mut R) -> Result<u8, ProtocolError> {
    let mut byte = [0u8; 1];
    match reader.read(&mut byte) {
        Ok(0) => Err(ProtocolError::Closed),
        Ok(_) => Ok(byte[0]),
        Err(e) => Err(ProtocolError::Io(e)),
    }
}

/// True for the errors a socket with a read timeout reports when nothing
/// arrived in time, or when a signal interrupted the read.
pub fn should_retry(error: &ProtocolError) -> bool {
    matches!(error, ProtocolError::Io(e) if is_retryable(e))
}

pub fn is_retryable(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
