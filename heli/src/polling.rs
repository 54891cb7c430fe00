use std::io::ErrorKind;
use std::os::fd::AsRawFd;
use std::time::Duration;

use anyhow::{Context, Result};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

/// Readiness wait over raw sockets, so the accept loop can keep an eye on the
/// shutdown flag between clients.
pub struct Poller {
    inner: Poll,
    events: Events,
}

impl Poller {
    pub fn new(capacity: usize) -> Result<Self> {
        let inner = Poll::new().context("Error creating poller")?;
        let events = Events::with_capacity(capacity);
        Ok(Self {
            inner,
            events,
        })
    }

    pub fn register<T: AsRawFd>(&mut self, source: &T, token: Token) -> Result<()> {
        self.inner
            .registry()
            .register(&mut SourceFd(&source.as_raw_fd()), token, Interest::READABLE)
            .context("Error registering socket")
    }

    /// Wait up to `timeout` for `token` to become readable. A signal
    /// interrupting the wait counts as a timeout.
    pub fn readable(&mut self, token: Token, timeout: Duration) -> Result<bool> {
        match self.inner.poll(&mut self.events, Some(timeout)) {
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(false),
            other => other.context("Error polling sockets")?,
        }
        Ok(self.events.iter().any(|event| event.token() == token && event.is_readable()))
    }
}
