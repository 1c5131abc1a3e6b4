//! The single-threaded event loop.
//!
//! The reactor owns three readiness sets, mirroring `select(2)`:
//!
//! - **readable**: the listener, the control channel, and every connection
//!   that has not seen end-of-stream,
//! - **writable**: connections with queued or in-flight output,
//! - **exceptional**: every live connection; an error condition reported by
//!   the poller closes it.
//!
//! Membership is only ever changed here. After each handler call the
//! reactor asks the connection what it wants (`wants_read`, `wants_write`,
//! `is_closed`) and updates the sets and the OS registration to match.
//!
//! mio reports readiness edge-triggered, so the reactor remembers readiness
//! per token and forgets it only when an operation hits `WouldBlock`. The
//! sets therefore behave level-triggered: a connection with more to send is
//! serviced again on the next iteration without a fresh OS event.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConnectionConfig};
use crate::http::connection::Connection;
use crate::http::router::Router;
use crate::http::writer::IoProgress;
use crate::server::control::{ControlChannel, ControlHandle};
use crate::server::listener::{Accept, ConnectionFactory, Listener};

const LISTENER: Token = Token(0);
const CONTROL: Token = Token(1);
const FIRST_CONNECTION: usize = 2;

const EVENTS_CAPACITY: usize = 256;

/// Membership of the three readiness sets.
#[derive(Debug, Default)]
pub struct ReadinessSets {
    readable: HashSet<Token>,
    writable: HashSet<Token>,
    exceptional: HashSet<Token>,
}

impl ReadinessSets {
    pub fn is_readable(&self, token: Token) -> bool {
        self.readable.contains(&token)
    }

    pub fn is_writable(&self, token: Token) -> bool {
        self.writable.contains(&token)
    }

    pub fn is_exceptional(&self, token: Token) -> bool {
        self.exceptional.contains(&token)
    }

    /// True if `token` is in any of the three sets.
    pub fn contains(&self, token: Token) -> bool {
        self.is_readable(token) || self.is_writable(token) || self.is_exceptional(token)
    }

    pub fn readable_len(&self) -> usize {
        self.readable.len()
    }

    pub fn writable_len(&self) -> usize {
        self.writable.len()
    }

    fn set_readable(&mut self, token: Token, member: bool) {
        toggle(&mut self.readable, token, member);
    }

    fn set_writable(&mut self, token: Token, member: bool) {
        toggle(&mut self.writable, token, member);
    }

    fn remove_all(&mut self, token: Token) {
        self.readable.remove(&token);
        self.writable.remove(&token);
        self.exceptional.remove(&token);
    }
}

fn toggle(set: &mut HashSet<Token>, token: Token, member: bool) {
    if member {
        set.insert(token);
    } else {
        set.remove(&token);
    }
}

/// Readiness seen from the poller and not yet used up.
#[derive(Debug, Default, Clone, Copy)]
struct Readiness {
    readable: bool,
    writable: bool,
    error: bool,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Read,
    Write,
}

/// Tokens ready for servicing in one iteration, grouped per set.
#[derive(Debug, Default)]
struct ReadyMembers {
    readable: Vec<Token>,
    writable: Vec<Token>,
    exceptional: Vec<Token>,
}

impl ReadyMembers {
    fn is_empty(&self) -> bool {
        self.readable.is_empty() && self.writable.is_empty() && self.exceptional.is_empty()
    }
}

pub struct Reactor<C> {
    poll: Poll,
    events: Events,
    listener: Option<Listener>,
    control: ControlChannel,
    connections: HashMap<Token, Connection<C>>,
    interests: HashMap<Token, Interest>,
    sets: ReadinessSets,
    readiness: HashMap<Token, Readiness>,
    factory: ConnectionFactory<C>,
    connection_config: ConnectionConfig,
    poll_timeout: Duration,
    idle: Box<dyn FnMut()>,
    idle_count: u64,
    next_token: usize,
    quit: bool,
}

impl<C: 'static> Reactor<C> {
    /// Binds the listener described by `config.server` and builds a reactor
    /// around it.
    pub fn bind<F>(config: &Config, factory: F) -> anyhow::Result<Self>
    where
        F: Fn(SocketAddr) -> (Router<C>, C) + 'static,
    {
        let listener = Listener::bind(&config.server)?;
        Self::with_listener(listener, config, factory)
    }

    pub fn with_listener<F>(mut listener: Listener, config: &Config, factory: F) -> anyhow::Result<Self>
    where
        F: Fn(SocketAddr) -> (Router<C>, C) + 'static,
    {
        let poll = Poll::new().context("creating poller")?;
        poll.registry()
            .register(listener.source(), LISTENER, Interest::READABLE)
            .context("registering listener")?;
        let control = ControlChannel::new(poll.registry(), CONTROL, config.reactor.quit_char)
            .context("creating control channel")?;

        let mut sets = ReadinessSets::default();
        sets.set_readable(LISTENER, true);
        sets.set_readable(CONTROL, true);

        let idle_sleep = Duration::from_millis(config.reactor.idle_sleep_ms);

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            listener: Some(listener),
            control,
            connections: HashMap::new(),
            interests: HashMap::new(),
            sets,
            readiness: HashMap::new(),
            factory: Box::new(factory),
            connection_config: config.connection.clone(),
            poll_timeout: Duration::from_millis(config.reactor.poll_timeout_ms),
            idle: Box::new(move || {
                debug!("Doing idle work");
                std::thread::sleep(idle_sleep);
            }),
            idle_count: 0,
            next_token: FIRST_CONNECTION,
            quit: false,
        })
    }

    /// Replaces the action run when a poll comes back with nothing ready.
    pub fn on_idle<F: FnMut() + 'static>(&mut self, idle: F) -> &mut Self {
        self.idle = Box::new(idle);
        self
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(Listener::local_addr)
    }

    /// A handle that can stop the loop from another thread.
    pub fn control(&self) -> ControlHandle {
        self.control.handle()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of iterations that found nothing to do.
    pub fn idle_count(&self) -> u64 {
        self.idle_count
    }

    pub fn sets(&self) -> &ReadinessSets {
        &self.sets
    }

    /// Runs until the control channel delivers the quit character, then
    /// closes every connection and the listener.
    pub fn run(&mut self) -> anyhow::Result<()> {
        info!("Event loop running");
        while !self.quit {
            self.turn()?;
        }
        self.close_all();
        info!("Event loop stopped");
        Ok(())
    }

    /// One poll-and-dispatch iteration.
    pub fn turn(&mut self) -> anyhow::Result<()> {
        let timeout = if self.ready_members().is_empty() {
            self.poll_timeout
        } else {
            Duration::ZERO
        };

        if let Err(e) = self.poll.poll(&mut self.events, Some(timeout)) {
            if e.kind() == ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(e).context("polling for readiness");
        }

        for event in self.events.iter() {
            let token = event.token();
            if token != LISTENER && token != CONTROL && !self.connections.contains_key(&token) {
                continue;
            }
            let ready = self.readiness.entry(token).or_default();
            // A socket error goes to the exceptional pass only; readiness
            // cached from earlier events is still serviced first.
            if token != LISTENER && token != CONTROL && event.is_error() {
                ready.error = true;
                continue;
            }
            ready.readable |= token == CONTROL || event.is_readable() || event.is_read_closed();
            ready.writable |= event.is_writable() || event.is_write_closed();
            ready.error |= event.is_error();
        }

        let ready = self.ready_members();
        if ready.is_empty() {
            (self.idle)();
            self.idle_count += 1;
            return Ok(());
        }

        for token in ready.readable {
            match token {
                LISTENER => self.accept(),
                CONTROL => self.read_control(),
                _ => self.service(token, Direction::Read),
            }
        }

        for token in ready.writable {
            self.service(token, Direction::Write);
        }

        for token in ready.exceptional {
            self.fail(token);
        }

        Ok(())
    }

    fn ready_members(&self) -> ReadyMembers {
        let mut ready = ReadyMembers::default();
        for (token, readiness) in &self.readiness {
            if readiness.readable && self.sets.is_readable(*token) {
                ready.readable.push(*token);
            }
            if readiness.writable && self.sets.is_writable(*token) {
                ready.writable.push(*token);
            }
            if readiness.error && self.sets.is_exceptional(*token) {
                ready.exceptional.push(*token);
            }
        }
        ready
    }

    fn clear_readiness(&mut self, token: Token, direction: Direction) {
        if let Some(ready) = self.readiness.get_mut(&token) {
            match direction {
                Direction::Read => ready.readable = false,
                Direction::Write => ready.writable = false,
            }
        }
    }

    fn accept(&mut self) {
        let Some(listener) = &self.listener else {
            return;
        };

        let mut conn = match listener.accept(&self.factory, &self.connection_config) {
            Ok(Accept::Accepted(conn)) => conn,
            Ok(Accept::Retry) => return,
            Ok(Accept::Empty) => {
                self.clear_readiness(LISTENER, Direction::Read);
                return;
            }
            Err(e) => {
                error!(error = %e, "Error accepting connection");
                self.clear_readiness(LISTENER, Direction::Read);
                return;
            }
        };

        let token = Token(self.next_token);
        self.next_token += 1;

        if let Err(e) = self
            .poll
            .registry()
            .register(conn.stream_mut(), token, Interest::READABLE)
        {
            warn!(peer = %conn.peer(), error = %e, "Failed to register connection");
            conn.shutdown();
            return;
        }

        debug!(peer = %conn.peer(), ?token, "registered connection");
        self.interests.insert(token, Interest::READABLE);
        self.sets.set_readable(token, true);
        self.sets.exceptional.insert(token);
        self.connections.insert(token, conn);
    }

    fn read_control(&mut self) {
        self.clear_readiness(CONTROL, Direction::Read);
        if self.control.drain() {
            info!("Quit requested");
            self.quit = true;
        }
    }

    fn service(&mut self, token: Token, direction: Direction) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };

        let result = match direction {
            Direction::Read => conn.handle_read(),
            Direction::Write => conn.handle_write(),
        };

        match result {
            Ok(IoProgress::Ready) => {}
            Ok(IoProgress::WouldBlock) => self.clear_readiness(token, direction),
            Err(e) => {
                warn!(peer = %conn.peer(), error = %e, ?direction, "Connection error");
                conn.shutdown();
            }
        }

        self.sync(token);
    }

    fn fail(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        let cause = conn.stream_mut().take_error().ok().flatten();
        warn!(peer = %conn.peer(), error = ?cause, "Exceptional condition");
        conn.shutdown();
        self.sync(token);
    }

    /// Brings set membership and the OS registration in line with what the
    /// connection wants, releasing it once closed.
    fn sync(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };

        if conn.is_closed() {
            self.release(token);
            return;
        }

        let read = conn.wants_read();
        let write = conn.wants_write();
        self.sets.set_readable(token, read);
        self.sets.set_writable(token, write);

        let interest = match (read, write) {
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (true, false) => Interest::READABLE,
            (false, true) => Interest::WRITABLE,
            (false, false) => {
                debug!(peer = %conn.peer(), "connection wants nothing, closing");
                conn.shutdown();
                self.release(token);
                return;
            }
        };

        if self.interests.get(&token) == Some(&interest) {
            return;
        }
        match self
            .poll
            .registry()
            .reregister(conn.stream_mut(), token, interest)
        {
            Ok(()) => {
                self.interests.insert(token, interest);
            }
            Err(e) => {
                warn!(peer = %conn.peer(), error = %e, "Failed to update registration");
                conn.shutdown();
                self.release(token);
            }
        }
    }

    /// Drops a closed connection: out of every set first, then out of the
    /// poller, then the socket itself.
    fn release(&mut self, token: Token) {
        self.sets.remove_all(token);
        self.readiness.remove(&token);
        self.interests.remove(&token);

        if let Some(mut conn) = self.connections.remove(&token) {
            if let Err(e) = self.poll.registry().deregister(conn.stream_mut()) {
                debug!(peer = %conn.peer(), error = %e, "deregister failed");
            }
            debug!(peer = %conn.peer(), ?token, "released connection");
        }
    }

    fn close_all(&mut self) {
        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            if let Some(conn) = self.connections.get_mut(&token) {
                conn.shutdown();
            }
            self.release(token);
        }

        self.sets.remove_all(CONTROL);
        self.sets.remove_all(LISTENER);
        self.readiness.clear();

        if let Some(mut listener) = self.listener.take() {
            if let Err(e) = self.poll.registry().deregister(listener.source()) {
                debug!(error = %e, "deregister listener failed");
            }
            info!(local_addr = %listener.local_addr(), "Closed listener");
        }
    }
}
