use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use mio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::{ServerConfig, Timeouts, VirtualHosts};
use crate::http::headers::has_token;
use crate::http::parser::{ParseStatus, ParserLimits, RequestParser};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::{ResponseWriter, WriteProgress};

const READ_CHUNK: usize = 8192;
pub const SERVER_HEADER: &str = concat!("webserv/", env!("CARGO_PKG_VERSION"));

/// Turns a complete (or failed) request into a response.
pub trait Handler {
    fn handle(&self, server: &ServerConfig, request: &Request, peer: SocketAddr) -> Response;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    ReadingRequest,
    AwaitingHandler,
    WritingResponse,
    Closing,
}

/// What the event loop should wait for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    WantRead,
    WantWrite,
    Close,
}

/// Keep-alive ceilings applied to every connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionPolicy {
    pub max_requests: usize,
    pub max_age: Duration,
}

impl From<&Timeouts> for ConnectionPolicy {
    fn from(t: &Timeouts) -> Self {
        Self {
            max_requests: t.max_requests_per_connection,
            max_age: Duration::from_secs(t.max_connection_age_secs),
        }
    }
}

/// One client socket and everything needed to serve it.
///
/// ```text
///   ReadingRequest ──parse done──▶ AwaitingHandler ──handler──▶ WritingResponse
///         ▲                                                       │
///         └──────────────── flushed, keep-alive ──────────────────┤
///                                                                 ▼
///                                                              Closing
/// ```
///
/// At most one request is in flight: bytes that arrive early stay in the
/// read buffer until the current response has been flushed.
pub struct Connection<'cfg, S = TcpStream> {
    stream: S,
    peer: SocketAddr,
    vhosts: VirtualHosts<'cfg>,
    state: ConnectionState,
    buffer: BytesMut,
    parser: RequestParser,
    writer: Option<ResponseWriter>,
    keep_alive: bool,
    started_at: Instant,
    last_activity: Instant,
    requests_served: usize,
    policy: ConnectionPolicy,
    draining: bool,
}

impl<'cfg, S: Read + Write> Connection<'cfg, S> {
    pub fn new(
        stream: S,
        peer: SocketAddr,
        vhosts: VirtualHosts<'cfg>,
        limits: ParserLimits,
        policy: ConnectionPolicy,
    ) -> Self {
        let now = Instant::now();
        Self {
            stream,
            peer,
            vhosts,
            state: ConnectionState::ReadingRequest,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            parser: RequestParser::new(limits),
            writer: None,
            keep_alive: false,
            started_at: now,
            last_activity: now,
            requests_served: 0,
            policy,
            draining: false,
        }
    }

    /// Drains the socket until it would block, parsing after every read.
    pub fn on_readable<H: Handler>(&mut self, handler: &H) -> NextStep {
        if self.state != ConnectionState::ReadingRequest {
            return self.interest();
        }

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    debug!(peer = %self.peer, "peer closed connection");
                    self.state = ConnectionState::Closing;
                    return NextStep::Close;
                }
                Ok(n) => {
                    self.last_activity = Instant::now();
                    self.buffer.extend_from_slice(&chunk[..n]);
                    match self.parser.advance(&mut self.buffer) {
                        ParseStatus::Incomplete => continue,
                        ParseStatus::Complete | ParseStatus::Error(_) => {
                            return self.dispatch(handler);
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return NextStep::WantRead,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(peer = %self.peer, error = %e, "read failed");
                    self.state = ConnectionState::Closing;
                    return NextStep::Close;
                }
            }
        }
    }

    /// Issues one write of the pending response.
    pub fn on_writable<H: Handler>(&mut self, handler: &H) -> NextStep {
        let Some(writer) = self.writer.as_mut() else {
            return self.interest();
        };

        let before = writer.written();
        match writer.write_to(&mut self.stream) {
            Ok(WriteProgress::Partial) => {
                if writer.written() > before {
                    self.last_activity = Instant::now();
                }
                NextStep::WantWrite
            }
            Ok(WriteProgress::Complete) => {
                self.writer = None;
                self.requests_served += 1;
                self.last_activity = Instant::now();

                if !self.keep_alive {
                    self.state = ConnectionState::Closing;
                    return NextStep::Close;
                }

                debug!(peer = %self.peer, served = self.requests_served, "keep-alive");
                self.state = ConnectionState::ReadingRequest;
                if self.buffer.is_empty() {
                    return NextStep::WantRead;
                }
                // The client sent the next request before this response went out.
                match self.parser.advance(&mut self.buffer) {
                    ParseStatus::Incomplete => NextStep::WantRead,
                    ParseStatus::Complete | ParseStatus::Error(_) => self.dispatch(handler),
                }
            }
            Err(e) => {
                debug!(peer = %self.peer, error = %e, "write failed");
                self.state = ConnectionState::Closing;
                NextStep::Close
            }
        }
    }

    fn dispatch<H: Handler>(&mut self, handler: &H) -> NextStep {
        self.state = ConnectionState::AwaitingHandler;
        let request = self.parser.take_request();
        if let Some(status) = request.error {
            warn!(peer = %self.peer, status = status.as_u16(), "rejecting malformed request");
        }

        let server = self.vhosts.select(request.host());
        let response = handler.handle(server, &request, self.peer);
        self.respond(&request, response)
    }

    fn respond(&mut self, request: &Request, mut response: Response) -> NextStep {
        let status = response.status;
        let handler_close = response
            .headers
            .get("Connection")
            .is_some_and(|v| has_token(v, "close"));

        self.keep_alive = request.error.is_none()
            && request.keep_alive()
            && !handler_close
            && !status.is_server_error()
            && status != StatusCode::RequestTimeout
            && !self.draining
            && self.requests_served + 1 < self.policy.max_requests
            && self.started_at.elapsed() < self.policy.max_age;

        response.headers.insert(
            "Connection",
            if self.keep_alive { "keep-alive" } else { "close" },
        );
        response.headers.insert("Server", SERVER_HEADER);

        info!(
            peer = %self.peer,
            method = %request.method,
            path = %request.path,
            status = status.as_u16(),
            bytes = response.body.len(),
            "request completed"
        );

        self.writer = Some(if request.method == Method::HEAD {
            ResponseWriter::head_only(&response)
        } else {
            ResponseWriter::new(&response)
        });
        self.state = ConnectionState::WritingResponse;
        NextStep::WantWrite
    }

    fn interest(&self) -> NextStep {
        match self.state {
            ConnectionState::ReadingRequest => NextStep::WantRead,
            ConnectionState::AwaitingHandler | ConnectionState::WritingResponse => {
                NextStep::WantWrite
            }
            ConnectionState::Closing => NextStep::Close,
        }
    }

    pub fn is_idle_for(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) >= timeout
    }

    /// Waiting for a request that has not started arriving.
    pub fn is_quiescent(&self) -> bool {
        self.state == ConnectionState::ReadingRequest
            && self.buffer.is_empty()
            && self.parser.is_idle()
    }

    /// Subsequent responses close the connection.
    pub fn set_draining(&mut self) {
        self.draining = true;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn requests_served(&self) -> usize {
        self.requests_served
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}
