//! Readiness-driven event loop.
//!
//! One thread owns the poll, the listening sockets and the connection
//! table. Listener tokens are `0..n`, connection tokens count up from `n`,
//! and `WAKE_TOKEN` belongs to the shutdown waker. Every connection is
//! registered for exactly one of read or write interest.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use mio::event::Event;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::http::connection::{Connection, ConnectionPolicy, NextStep};
use crate::router::Router;

pub mod listener;
pub mod shutdown;

use listener::Listener;
use shutdown::{ShutdownHandle, ShutdownToken};

const WAKE_TOKEN: Token = Token(usize::MAX);
/// Upper bound on one poll wait, so the idle sweep runs at least this often.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);
const EVENTS_CAPACITY: usize = 1024;

struct Slot<'cfg> {
    conn: Connection<'cfg>,
    interest: Interest,
}

pub struct Server<'cfg> {
    config: &'cfg Config,
    poll: Poll,
    listeners: Vec<Listener<'cfg>>,
    listener_tokens: usize,
    connections: HashMap<Token, Slot<'cfg>>,
    next_token: usize,
    router: Router,
    policy: ConnectionPolicy,
    shutdown: ShutdownToken,
    waker: Arc<Waker>,
}

impl<'cfg> Server<'cfg> {
    /// Binds every configured listen address. Failure here is fatal.
    pub fn bind(config: &'cfg Config) -> anyhow::Result<Self> {
        let router = Router::new(config)?;
        Self::with_router(config, router)
    }

    pub fn with_router(config: &'cfg Config, router: Router) -> anyhow::Result<Self> {
        let poll = Poll::new().context("creating poll instance")?;
        let mut listeners = listener::bind_all(config)?;
        for (i, l) in listeners.iter_mut().enumerate() {
            poll.registry()
                .register(&mut l.socket, Token(i), Interest::READABLE)
                .with_context(|| format!("registering listener {}", l.addr))?;
            info!(addr = %l.addr, "listening");
        }
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN).context("creating waker")?);

        Ok(Self {
            config,
            poll,
            listener_tokens: listeners.len(),
            next_token: listeners.len(),
            listeners,
            connections: HashMap::new(),
            router,
            policy: ConnectionPolicy::from(&config.timeouts),
            shutdown: ShutdownToken::new(),
            waker,
        })
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(|l| l.addr).collect()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.shutdown.clone(), self.waker.clone())
    }

    /// Serves until the shutdown token is cancelled, then drains.
    pub fn run(mut self) -> anyhow::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let idle = Duration::from_secs(self.config.timeouts.idle_secs);
        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        let mut drain_deadline: Option<Instant> = None;

        loop {
            if self.shutdown.is_cancelled() {
                let deadline = *drain_deadline.get_or_insert_with(|| {
                    self.begin_drain();
                    Instant::now() + grace
                });
                if self.connections.is_empty() || Instant::now() >= deadline {
                    break;
                }
            }

            if let Err(e) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e).context("polling for events");
            }

            for event in events.iter() {
                match event.token() {
                    WAKE_TOKEN => debug!("woken"),
                    Token(i) if i < self.listener_tokens => self.accept(i),
                    token => self.connection_event(token, event),
                }
            }

            if drain_deadline.is_some() {
                self.close_quiescent();
            }
            self.reap_idle(idle);
        }

        self.close_all();
        info!("server stopped");
        Ok(())
    }

    /// Accepts until the listener would block.
    fn accept(&mut self, index: usize) {
        let max_connections = self.config.limits.max_connections;
        loop {
            let Some(listener) = self.listeners.get(index) else {
                return;
            };
            let (mut stream, peer) = match listener.socket.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(addr = %listener.addr, error = %e, "accept failed");
                    return;
                }
            };

            if self.connections.len() >= max_connections {
                warn!(%peer, max_connections, "connection limit reached, dropping");
                continue;
            }

            let token = Token(self.next_token);
            self.next_token += 1;
            if self.next_token == WAKE_TOKEN.0 {
                self.next_token = self.listener_tokens;
            }

            if let Err(e) = self
                .poll
                .registry()
                .register(&mut stream, token, Interest::READABLE)
            {
                error!(%peer, error = %e, "register failed");
                continue;
            }

            let conn = Connection::new(
                stream,
                peer,
                listener.vhosts.clone(),
                listener.limits,
                self.policy,
            );
            debug!(%peer, token = token.0, "accepted");
            self.connections.insert(
                token,
                Slot {
                    conn,
                    interest: Interest::READABLE,
                },
            );
        }
    }

    fn connection_event(&mut self, token: Token, event: &Event) {
        let Some(slot) = self.connections.get_mut(&token) else {
            return;
        };

        let step = if event.is_error() || event.is_write_closed() {
            NextStep::Close
        } else if event.is_readable() || event.is_read_closed() {
            slot.conn.on_readable(&self.router)
        } else if event.is_writable() {
            slot.conn.on_writable(&self.router)
        } else {
            return;
        };

        match step {
            NextStep::Close => self.close(token),
            NextStep::WantRead => self.set_interest(token, Interest::READABLE),
            NextStep::WantWrite => self.set_interest(token, Interest::WRITABLE),
        }
    }

    /// Moves the connection to `interest`. Write interest is always
    /// re-armed so a response queued right after a flush gets its event.
    fn set_interest(&mut self, token: Token, interest: Interest) {
        let Some(slot) = self.connections.get_mut(&token) else {
            return;
        };
        if slot.interest == interest && interest == Interest::READABLE {
            return;
        }

        match self
            .poll
            .registry()
            .reregister(slot.conn.stream_mut(), token, interest)
        {
            Ok(()) => slot.interest = interest,
            Err(e) => {
                error!(peer = %slot.conn.peer(), error = %e, "reregister failed");
                self.close(token);
            }
        }
    }

    fn reap_idle(&mut self, idle: Duration) {
        let now = Instant::now();
        let expired: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, slot)| slot.conn.is_idle_for(idle, now))
            .map(|(token, _)| *token)
            .collect();

        for token in expired {
            if let Some(slot) = self.connections.get(&token) {
                info!(peer = %slot.conn.peer(), "idle timeout");
            }
            self.close(token);
        }
    }

    fn begin_drain(&mut self) {
        info!(
            connections = self.connections.len(),
            "shutting down, no longer accepting"
        );
        for mut l in self.listeners.drain(..) {
            let _ = self.poll.registry().deregister(&mut l.socket);
        }
        for slot in self.connections.values_mut() {
            slot.conn.set_draining();
        }
        self.close_quiescent();
    }

    fn close_quiescent(&mut self) {
        let quiet: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, slot)| slot.conn.is_quiescent())
            .map(|(token, _)| *token)
            .collect();
        for token in quiet {
            self.close(token);
        }
    }

    fn close(&mut self, token: Token) {
        if let Some(mut slot) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(slot.conn.stream_mut());
            debug!(
                peer = %slot.conn.peer(),
                served = slot.conn.requests_served(),
                "connection closed"
            );
        }
    }

    fn close_all(&mut self) {
        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            self.close(token);
        }
    }
}
