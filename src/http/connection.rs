use std::io::{self, ErrorKind, Read};
use std::net::{Shutdown, SocketAddr};

use bytes::{Buf, Bytes, BytesMut};
use mio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use crate::config::ConnectionConfig;
use crate::http::parser::{parse_http_request, ParseError};
use crate::http::response::{Response, StatusCode};
use crate::http::router::Router;
use crate::http::writer::{IoProgress, ResponseWriter};

/// Where a connection is in its single request/response exchange.
#[derive(Debug)]
pub enum ConnectionState {
    /// Reading until a full request head has arrived.
    AwaitingRequest,
    /// A handler queued output that has not been handed to the writer yet.
    PendingOutput,
    /// The queued output was concatenated and is being sent in chunks.
    Draining(ResponseWriter),
    Closed,
}

/// One accepted client socket and everything it owns.
///
/// `C` is the handler context: built alongside the route table when the
/// connection is accepted and passed by reference into every handler call.
pub struct Connection<C> {
    stream: TcpStream,
    peer: SocketAddr,
    read_buffer: BytesMut,
    response: Response,
    router: Router<C>,
    context: C,
    state: ConnectionState,
    peer_closed: bool,
    read_size: usize,
    send_chunk: usize,
    requests: u64,
    write_events: u64,
}

impl<C: 'static> Connection<C> {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        router: Router<C>,
        context: C,
        config: &ConnectionConfig,
    ) -> Self {
        Self {
            stream,
            peer,
            read_buffer: BytesMut::with_capacity(config.read_size),
            response: Response::new(),
            router,
            context,
            state: ConnectionState::AwaitingRequest,
            peer_closed: false,
            read_size: config.read_size.max(1),
            send_chunk: config.send_chunk.max(1),
            requests: 0,
            write_events: 0,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Requests framed and dispatched so far.
    ///
    /// Diagnostic only: it feeds the shutdown log line and tests. Handlers
    /// keep their own counts in the context, which is what pages display.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// Writable events handled so far.
    pub fn write_events(&self) -> u64 {
        self.write_events
    }

    /// Bytes received but not yet framed into a request.
    pub fn buffered(&self) -> usize {
        self.read_buffer.len()
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ConnectionState::Closed)
    }

    pub fn peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// Whether the reactor should keep this connection in the readable set.
    pub fn wants_read(&self) -> bool {
        !self.peer_closed && !self.is_closed()
    }

    /// Whether the reactor should keep this connection in the writable set.
    pub fn wants_write(&self) -> bool {
        self.has_output()
    }

    fn has_output(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::PendingOutput | ConnectionState::Draining(_)
        )
    }

    /// Queues response bytes, header block first on the first call.
    pub fn queue(&mut self, data: impl Into<Bytes>) {
        if self.is_closed() {
            warn!(peer = %self.peer, "queue on closed connection, dropping data");
            return;
        }
        self.response.queue(data);
        if matches!(self.state, ConnectionState::AwaitingRequest) {
            self.state = ConnectionState::PendingOutput;
        }
    }

    /// Performs one non-blocking receive and dispatches the request once its
    /// header terminator has arrived.
    pub fn handle_read(&mut self) -> io::Result<IoProgress> {
        if !self.wants_read() {
            return Ok(IoProgress::WouldBlock);
        }

        let start = self.read_buffer.len();
        self.read_buffer.resize(start + self.read_size, 0);

        let n = match self.stream.read(&mut self.read_buffer[start..]) {
            Ok(n) => n,
            Err(e) => {
                self.read_buffer.truncate(start);
                return match e.kind() {
                    ErrorKind::WouldBlock => Ok(IoProgress::WouldBlock),
                    ErrorKind::Interrupted => Ok(IoProgress::Ready),
                    _ => Err(e),
                };
            }
        };
        self.read_buffer.truncate(start + n);

        if n == 0 {
            info!(peer = %self.peer, "Disconnect");
            self.peer_closed = true;
            if !self.has_output() {
                self.shutdown();
            }
            return Ok(IoProgress::WouldBlock);
        }

        trace!(peer = %self.peer, received = n, buffered = self.read_buffer.len(), "read");

        if matches!(self.state, ConnectionState::AwaitingRequest) {
            self.try_dispatch();
        } else {
            trace!(peer = %self.peer, discarded = n, "bytes after request, ignoring");
            self.read_buffer.clear();
        }

        Ok(IoProgress::Ready)
    }

    fn try_dispatch(&mut self) {
        let (request, consumed) = match parse_http_request(&self.read_buffer) {
            Ok(parsed) => parsed,
            Err(ParseError::Incomplete) => {
                trace!(peer = %self.peer, "waiting for header terminator");
                return;
            }
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "malformed request");
                self.read_buffer.clear();
                self.response.set_status(StatusCode::BadRequest);
                self.queue("<h1>400 Bad Request</h1>");
                return;
            }
        };
        self.read_buffer.advance(consumed);
        self.requests += 1;

        info!(
            peer = %self.peer,
            method = %request.method,
            path = %request.path,
            "request"
        );

        self.router
            .dispatch(&mut self.context, &request, &mut self.response);

        if self.response.has_pending() {
            self.state = ConnectionState::PendingOutput;
        } else {
            debug!(peer = %self.peer, "handler queued no response, closing");
            self.shutdown();
        }
    }

    /// Sends the next bounded chunk of the response, closing the connection
    /// once nothing is left to send.
    pub fn handle_write(&mut self) -> io::Result<IoProgress> {
        self.write_events += 1;

        match self.state {
            ConnectionState::Closed => return Ok(IoProgress::WouldBlock),
            ConnectionState::AwaitingRequest => {
                self.shutdown();
                return Ok(IoProgress::Ready);
            }
            ConnectionState::PendingOutput => {
                let blob = self.response.take_pending();
                debug!(peer = %self.peer, bytes = blob.len(), "starting send");
                self.state = ConnectionState::Draining(ResponseWriter::new(blob));
            }
            ConnectionState::Draining(_) => {
                trace!(peer = %self.peer, "continuing last send");
            }
        }

        let ConnectionState::Draining(writer) = &mut self.state else {
            return Ok(IoProgress::WouldBlock);
        };
        let progress = writer.write_chunk(&mut self.stream, self.send_chunk)?;

        if writer.is_done() {
            debug!(peer = %self.peer, bytes = writer.written(), "response sent");
            if self.response.has_pending() {
                self.state = ConnectionState::PendingOutput;
            } else {
                self.shutdown();
            }
        }

        Ok(progress)
    }

    /// Closes the connection. Returns `false` if it was already closed.
    ///
    /// The socket itself is released when the connection is dropped, after
    /// the reactor has removed it from every readiness set.
    pub fn shutdown(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = ConnectionState::Closed;

        if let Err(e) = self.stream.shutdown(Shutdown::Write) {
            if e.kind() != ErrorKind::NotConnected {
                debug!(peer = %self.peer, error = %e, "socket shutdown failed");
            }
        }
        info!(peer = %self.peer, requests = self.requests, "Shutting down");
        true
    }
}
