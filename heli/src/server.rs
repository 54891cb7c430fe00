use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use heli_api::message::{is_retryable, read_byte, should_retry};
use heli_api::{Demand, Message, ProtocolError, SessionEvent, SessionState};
use mio::Token;

use crate::config::HeliConfig;
use crate::helicopter::Airframe;
use crate::pilot::{DemandCell, Pilot, PilotHandle};
use crate::polling::Poller;

const LISTENER: Token = Token(0);
const ACCEPT_POLL: Duration = Duration::from_millis(100);
/// Longest demand line accepted, newline included.
const MAX_FRAME_LEN: usize = 4096;

/// One client connection, from handshake to teardown.
pub struct Session<'a, R, W, A> {
    reader: R,
    writer: W,
    airframe: &'a mut A,
    config: &'a HeliConfig,
    state: SessionState,
    demand: Demand,
    demands: DemandCell,
    pilot: Option<PilotHandle>,
}

impl<'a, R: BufRead, W: Write, A: Airframe> Session<'a, R, W, A> {
    pub fn new(reader: R, writer: W, airframe: &'a mut A, config: &'a HeliConfig) -> Self {
        Self {
            reader,
            writer,
            airframe,
            config,
            state: SessionState::Disconnected,
            demand: Demand::default(),
            demands: DemandCell::default(),
            pilot: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Latest merged demand.
    pub fn demand(&self) -> Demand {
        self.demand
    }

    pub fn is_flying(&self) -> bool {
        self.pilot.as_ref().is_some_and(PilotHandle::is_flying)
    }

    /// Serve the connection until the peer leaves, the protocol is violated
    /// or `shutdown` is raised. The pilot is always stopped before returning.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), ProtocolError> {
        self.transition(SessionEvent::Connected);
        let result = self.serve(shutdown);
        self.transition(SessionEvent::Closed);
        self.stop_flying();
        match result {
            Err(ProtocolError::Closed) => Ok(()),
            other => other,
        }
    }

    fn serve(&mut self, shutdown: &AtomicBool) -> Result<(), ProtocolError> {
        self.handshake(shutdown)?;
        self.confirm_battery(shutdown)?;
        self.stream(shutdown)
    }

    fn transition(&mut self, event: SessionEvent) {
        match self.state.next(event) {
            Some(next) => {
                if next != self.state {
                    log::info!("Session {} -> {}", self.state, next);
                }
                self.state = next;
            },
            None => log::error!("Session cannot handle {:?} while {}", event, self.state),
        }
    }

    fn next_byte(&mut self, shutdown: &AtomicBool) -> Result<u8, ProtocolError> {
        loop {
            match read_byte(&mut self.reader) {
                Err(e) if should_retry(&e) => {
                    if shutdown.load(Ordering::Relaxed) {
                        return Err(ProtocolError::Closed);
                    }
                },
                other => return other,
            }
        }
    }

    fn send(&mut self, message: Message) -> Result<(), ProtocolError> {
        message.write_to(&mut self.writer)
    }

    fn handshake(&mut self, shutdown: &AtomicBool) -> Result<(), ProtocolError> {
        let byte = self.next_byte(shutdown)?;
        match Message::from_request(byte)? {
            Message::Hello => {
                self.send(Message::HelloAck)?;
                self.transition(SessionEvent::HelloExchanged);
                Ok(())
            },
            _ => Err(ProtocolError::UnexpectedByte {
                got: byte,
                expected: "hello",
            }),
        }
    }

    fn confirm_battery(&mut self, shutdown: &AtomicBool) -> Result<(), ProtocolError> {
        loop {
            let byte = self.next_byte(shutdown)?;
            match Message::from_request(byte)? {
                Message::BatteryReady => match self.prepare_pilot() {
                    Ok(pilot) => {
                        self.pilot = Some(pilot);
                        self.send(Message::BatteryAck)?;
                        self.transition(SessionEvent::BatteryAccepted);
                        return Ok(());
                    },
                    Err(e) => {
                        log::warn!("Helicopter not ready: {:#}", e);
                        self.send(Message::BatteryFailed)?;
                        self.transition(SessionEvent::BatteryRefused);
                    },
                },
                _ => {
                    return Err(ProtocolError::UnexpectedByte {
                        got: byte,
                        expected: "battery ready",
                    })
                },
            }
        }
    }

    fn prepare_pilot(&mut self) -> Result<PilotHandle> {
        let avionics = self.airframe.power_on().context("Powering avionics")?;
        let pilot = Pilot::new(avionics, &self.config.pilot)?;
        self.demand = Demand::default();
        self.demands.publish(self.demand);
        PilotHandle::spawn(pilot, self.demands.clone(), Duration::from_millis(self.config.pilot.tick_ms))
    }

    fn stream(&mut self, shutdown: &AtomicBool) -> Result<(), ProtocolError> {
        let mut frame = Vec::new();
        // Set while skipping the rest of a line longer than MAX_FRAME_LEN
        let mut oversized = false;
        loop {
            let room = (MAX_FRAME_LEN - frame.len()) as u64;
            match self.reader.by_ref().take(room).read_until(b'\n', &mut frame) {
                Ok(0) => {
                    if oversized {
                        self.discard_oversized();
                    } else if !frame.is_empty() {
                        self.handle_frame(&frame);
                    }
                    return Err(ProtocolError::Closed);
                },
                Ok(_) if frame.ends_with(b"\n") => {
                    if oversized {
                        self.discard_oversized();
                        oversized = false;
                    } else {
                        self.handle_frame(&frame);
                    }
                    frame.clear();
                },
                Ok(_) if frame.len() >= MAX_FRAME_LEN => {
                    oversized = true;
                    frame.clear();
                },
                // Partial line, keep reading
                Ok(_) => (),
                Err(e) if is_retryable(&e) => {
                    if shutdown.load(Ordering::Relaxed) {
                        return Err(ProtocolError::Closed);
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn discard_oversized(&mut self) {
        log::warn!("Discarding frame longer than {} bytes", MAX_FRAME_LEN);
        self.stop_flying();
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        let parsed = std::str::from_utf8(frame).map_err(anyhow::Error::from).and_then(|line| {
            if line.trim().is_empty() {
                return Ok(None);
            }
            Message::from_frame(line).map(Some).map_err(anyhow::Error::from)
        });

        match parsed {
            Ok(Some(Message::DemandFrame(patch))) => {
                self.demand = self.demand.merge(&patch);
                self.demands.publish(self.demand);
                self.transition(SessionEvent::Frame);
                log::trace!("Demand {:?}", self.demand);
            },
            Ok(_) => (),
            Err(e) => {
                log::warn!("Discarding frame: {:#}", e);
                self.stop_flying();
            },
        }
    }

    fn stop_flying(&mut self) {
        if let Some(mut pilot) = self.pilot.take() {
            log::warn!("Stopping flight");
            pilot.stop_flying();
        }
    }
}

/// TCP front end serving one client at a time.
pub struct Server<A> {
    listener: TcpListener,
    poller: Poller,
    airframe: A,
    config: HeliConfig,
}

impl<A: Airframe> Server<A> {
    pub fn bind(config: HeliConfig, airframe: A) -> Result<Self> {
        let address = config.listen_address();
        let listener = TcpListener::bind(&address).with_context(|| format!("Cannot listen on {}", address))?;
        listener.set_nonblocking(true).context("Configuring listener")?;
        let mut poller = Poller::new(4)?;
        poller.register(&listener, LISTENER)?;
        Ok(Self {
            listener,
            poller,
            airframe,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("Reading listener address")
    }

    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        log::info!("Listening on {}", self.local_addr()?);
        while !shutdown.load(Ordering::Relaxed) {
            if !self.poller.readable(LISTENER, ACCEPT_POLL)? {
                continue;
            }
            loop {
                match self.listener.accept() {
                    Ok((stream, peer)) => {
                        if let Err(e) = self.handle(stream, peer, shutdown) {
                            log::warn!("Client {}: {:#}", peer, e);
                        }
                    },
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        log::warn!("Accepting connection: {}", e);
                        break;
                    },
                }
            }
        }
        log::info!("Server stopped");
        Ok(())
    }

    fn handle(&mut self, stream: TcpStream, peer: SocketAddr, shutdown: &AtomicBool) -> Result<()> {
        log::info!("Client {} connected", peer);
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(Duration::from_millis(self.config.server.read_timeout_ms.max(1))))?;
        let reader = BufReader::new(stream.try_clone().context("Cloning client stream")?);

        let mut session = Session::new(reader, stream, &mut self.airframe, &self.config);
        session.run(shutdown).context("Session aborted")?;
        log::info!("Client {} disconnected", peer);
        Ok(())
    }
}
