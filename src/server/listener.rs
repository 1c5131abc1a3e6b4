use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs};

use anyhow::Context;
use mio::net::TcpListener;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{info, warn};

use crate::config::{ConnectionConfig, ServerConfig};
use crate::http::connection::Connection;
use crate::http::router::Router;

/// Builds the route table and handler context for each accepted connection.
pub type ConnectionFactory<C> = Box<dyn Fn(SocketAddr) -> (Router<C>, C)>;

/// Outcome of one accept attempt.
pub enum Accept<C> {
    Accepted(Connection<C>),
    /// Nothing pending; wait for the next readiness event.
    Empty,
    /// A transient failure; try again on the next iteration.
    Retry,
}

pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Binds a non-blocking listening socket with `SO_REUSEADDR` and the
    /// configured backlog.
    pub fn bind(cfg: &ServerConfig) -> anyhow::Result<Self> {
        let addr = (cfg.host.as_str(), cfg.port)
            .to_socket_addrs()
            .with_context(|| format!("resolving {}", cfg.listen_addr()))?
            .next()
            .with_context(|| format!("{} resolved to no address", cfg.listen_addr()))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket
            .bind(&addr.into())
            .with_context(|| format!("binding {addr}"))?;
        socket.listen(cfg.backlog)?;

        let std_listener: std::net::TcpListener = socket.into();
        let inner = TcpListener::from_std(std_listener);
        let local_addr = inner.local_addr()?;

        info!(%local_addr, backlog = cfg.backlog, "Listening");
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn source(&mut self) -> &mut TcpListener {
        &mut self.inner
    }

    /// Accepts at most one pending connection and wraps it.
    ///
    /// Accepted sockets are already non-blocking.
    pub fn accept<C: 'static>(
        &self,
        factory: &ConnectionFactory<C>,
        config: &ConnectionConfig,
    ) -> io::Result<Accept<C>> {
        match self.inner.accept() {
            Ok((stream, peer)) => {
                info!(%peer, "Connection from");
                let (router, context) = factory(peer);
                Ok(Accept::Accepted(Connection::new(
                    stream, peer, router, context, config,
                )))
            }
            Err(e) => match e.kind() {
                ErrorKind::WouldBlock => Ok(Accept::Empty),
                ErrorKind::Interrupted
                | ErrorKind::ConnectionAborted
                | ErrorKind::ConnectionReset => {
                    warn!(error = %e, local_addr = %self.local_addr, "Transient accept error");
                    Ok(Accept::Retry)
                }
                _ => Err(e),
            },
        }
    }
}
