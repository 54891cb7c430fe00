use std::io::{self, ErrorKind};
use std::net::TcpStream;
use std::time::Duration;

use heli_api::message::read_byte;
use heli_api::{Demand, DemandPatch, Message, ProtocolError, SessionEvent, SessionState};
use thiserror::Error;

/// Why the link to the helicopter failed, as reported to the operator.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("helicopter unreachable: {0}")]
    Unreachable(io::Error),
    #[error("broken pipe, the helicopter stopped listening")]
    BrokenPipe,
    #[error("connection reset by the helicopter")]
    ResetByPeer,
    #[error("connection closed by the helicopter")]
    Closed,
    #[error("no answer from the helicopter")]
    NoReply,
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Protocol(ProtocolError),
    #[error(transparent)]
    Io(io::Error),
}

/// Sort socket errors into what the operator can act upon.
pub fn classify(error: io::Error) -> LinkError {
    match error.kind() {
        ErrorKind::ConnectionRefused
        | ErrorKind::HostUnreachable
        | ErrorKind::NetworkUnreachable
        | ErrorKind::AddrNotAvailable
        | ErrorKind::NotFound => LinkError::Unreachable(error),
        ErrorKind::BrokenPipe => LinkError::BrokenPipe,
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => LinkError::ResetByPeer,
        ErrorKind::UnexpectedEof => LinkError::Closed,
        ErrorKind::WouldBlock | ErrorKind::TimedOut => LinkError::NoReply,
        _ => LinkError::Io(error),
    }
}

impl From<ProtocolError> for LinkError {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::Io(e) => classify(e),
            ProtocolError::Closed => LinkError::Closed,
            other => LinkError::Protocol(other),
        }
    }
}

/// Client side of the helicopter link.
pub struct Link {
    address: String,
    reply_timeout: Duration,
    stream: Option<TcpStream>,
    state: SessionState,
}

impl Link {
    pub fn new(address: impl Into<String>, reply_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            reply_timeout,
            stream: None,
            state: SessionState::Disconnected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_streaming()
    }

    /// Open the socket and exchange hellos.
    pub fn init_connection(&mut self) -> Result<(), LinkError> {
        self.close();
        let result = self.open().and_then(|()| self.handshake());
        if result.is_err() {
            self.close();
        }
        result
    }

    fn open(&mut self) -> Result<(), LinkError> {
        let stream = TcpStream::connect(&self.address).map_err(|e| match classify(e) {
            LinkError::NoReply => LinkError::Unreachable(io::Error::from(ErrorKind::TimedOut)),
            other => other,
        })?;
        // Demands are small, do not let them wait for a full segment
        stream.set_nodelay(true).map_err(classify)?;
        stream.set_read_timeout(Some(self.reply_timeout)).map_err(classify)?;
        self.stream = Some(stream);
        self.transition(SessionEvent::Connected);
        Ok(())
    }

    fn handshake(&mut self) -> Result<(), LinkError> {
        match self.request(Message::Hello)? {
            Message::HelloAck => {
                self.transition(SessionEvent::HelloExchanged);
                Ok(())
            },
            other => Err(unexpected(other, "hello ack")),
        }
    }

    /// Tell the helicopter its battery is plugged in. `Ok(false)` means it
    /// is not ready yet and the request may be repeated. Once accepted,
    /// further calls answer `Ok(true)` without touching the link.
    pub fn confirm_battery(&mut self) -> Result<bool, LinkError> {
        if self.is_connected() {
            return Ok(true);
        }
        if self.state != SessionState::AwaitingBatteryConfirm {
            return Err(LinkError::NotConnected);
        }
        let reply = self.request(Message::BatteryReady);
        match reply {
            Ok(Message::BatteryAck) => {
                self.transition(SessionEvent::BatteryAccepted);
                Ok(true)
            },
            Ok(Message::BatteryFailed) => {
                self.transition(SessionEvent::BatteryRefused);
                Ok(false)
            },
            Ok(other) => {
                self.close();
                Err(unexpected(other, "battery reply"))
            },
            Err(e) => {
                self.close();
                Err(e)
            },
        }
    }

    /// Stream the whole demand vector as one frame.
    pub fn send_demands(&mut self, demand: &Demand) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let frame = Message::DemandFrame(DemandPatch::from(*demand));
        let result = match self.stream.as_mut() {
            Some(stream) => frame.write_to(stream).map_err(LinkError::from),
            None => Err(LinkError::NotConnected),
        };
        match result {
            Ok(()) => {
                self.transition(SessionEvent::Frame);
                Ok(())
            },
            Err(e) => {
                self.close();
                Err(e)
            },
        }
    }

    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            self.transition(SessionEvent::Closed);
        }
    }

    fn request(&mut self, message: Message) -> Result<Message, LinkError> {
        let stream = self.stream.as_mut().ok_or(LinkError::NotConnected)?;
        message.write_to(stream)?;
        let byte = read_byte(stream)?;
        Ok(Message::from_reply(byte)?)
    }

    fn transition(&mut self, event: SessionEvent) {
        if let Some(next) = self.state.next(event) {
            if next != self.state {
                log::debug!("Link {} -> {}", self.state, next);
            }
            self.state = next;
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

fn unexpected(message: Message, expected: &'static str) -> LinkError {
    let got = message.to_bytes().ok().and_then(|bytes| bytes.first().copied()).unwrap_or_default();
    LinkError::Protocol(ProtocolError::UnexpectedByte {
        got,
        expected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    const TIMEOUT: Duration = Duration::from_secs(2);

    /// Minimal helicopter: answers hello, refuses the battery `refusals`
    /// times, then returns the first demand line it receives.
    fn fake_helicopter(refusals: usize) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut byte = [0u8; 1];
            stream.read_exact(&mut byte).unwrap();
            assert_eq!(byte, [0x01]);
            stream.write_all(&[0x01]).unwrap();
            for _ in 0..refusals {
                stream.read_exact(&mut byte).unwrap();
                assert_eq!(byte, [0x02]);
                stream.write_all(&[0x00]).unwrap();
            }
            stream.read_exact(&mut byte).unwrap();
            assert_eq!(byte, [0x02]);
            stream.write_all(&[0x02]).unwrap();
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).unwrap();
            line
        });
        (address, handle)
    }

    #[test]
    fn connect_confirm_and_stream() {
        let (address, helicopter) = fake_helicopter(1);
        let mut link = Link::new(address, TIMEOUT);

        link.init_connection().unwrap();
        assert_eq!(link.state(), SessionState::AwaitingBatteryConfirm);
        assert!(!link.confirm_battery().unwrap());
        assert_eq!(link.state(), SessionState::AwaitingBatteryConfirm);
        assert!(link.confirm_battery().unwrap());
        assert!(link.is_connected());
        // A second press sends nothing, the next line stays a clean frame
        assert!(link.confirm_battery().unwrap());

        link.send_demands(&Demand {
            throttle: 0.25,
            start: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(link.state(), SessionState::Streaming);

        let line = helicopter.join().unwrap();
        let patch = DemandPatch::parse(line.trim()).unwrap();
        assert_eq!(patch.throttle, Some(0.25));
        assert_eq!(patch.start, Some(true));
        assert_eq!(patch.stop, Some(false));
    }

    #[test]
    fn refused_connection_is_unreachable() {
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let mut link = Link::new(address, TIMEOUT);
        assert!(matches!(link.init_connection(), Err(LinkError::Unreachable(_))));
        assert_eq!(link.state(), SessionState::Disconnected);
    }

    #[test]
    fn demands_need_a_confirmed_battery() {
        let mut link = Link::new("127.0.0.1:1", TIMEOUT);
        assert!(matches!(link.send_demands(&Demand::default()), Err(LinkError::NotConnected)));
        assert!(matches!(link.confirm_battery(), Err(LinkError::NotConnected)));
    }

    #[test]
    fn server_hanging_up_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let helicopter = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        let mut link = Link::new(address, TIMEOUT);
        let result = link.init_connection();
        helicopter.join().unwrap();
        assert!(matches!(
            result,
            Err(LinkError::Closed | LinkError::ResetByPeer | LinkError::BrokenPipe)
        ));
        assert_eq!(link.state(), SessionState::Disconnected);
    }

    #[test]
    fn errors_are_classified() {
        assert!(matches!(classify(ErrorKind::ConnectionRefused.into()), LinkError::Unreachable(_)));
        assert!(matches!(classify(ErrorKind::BrokenPipe.into()), LinkError::BrokenPipe));
        assert!(matches!(classify(ErrorKind::ConnectionReset.into()), LinkError::ResetByPeer));
        assert!(matches!(classify(ErrorKind::TimedOut.into()), LinkError::NoReply));
        assert!(matches!(classify(ErrorKind::PermissionDenied.into()), LinkError::Io(_)));
        assert!(matches!(LinkError::from(ProtocolError::Closed), LinkError::Closed));
        assert!(matches!(
            LinkError::from(ProtocolError::UnexpectedByte {
                got: 7,
                expected: "x"
            }),
            LinkError::Protocol(_)
        ));
    }
}
