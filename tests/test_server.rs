//! End-to-end tests: a real reactor on a loopback port, real clients.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use switchboard::config::Config;
use switchboard::http::request::{Method, Request};
use switchboard::http::response::Response;
use switchboard::http::router::Router;
use switchboard::server::{ControlHandle, Reactor};
use switchboard::site;

/// What the reactor looked like once `run` returned.
#[derive(Debug)]
struct Finished {
    connections: usize,
    readable: usize,
    writable: usize,
    idle: u64,
}

fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.server.host = "127.0.0.1".to_string();
    cfg.server.port = 0;
    cfg.reactor.poll_timeout_ms = 20;
    cfg.reactor.idle_sleep_ms = 0;
    cfg
}

fn start_with<C, F>(cfg: Config, factory: F) -> (SocketAddr, ControlHandle, JoinHandle<Finished>)
where
    C: 'static,
    F: Fn(SocketAddr) -> (Router<C>, C) + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let mut reactor = Reactor::bind(&cfg, factory).expect("bind reactor");
        tx.send((reactor.local_addr().expect("listener"), reactor.control()))
            .unwrap();
        reactor.run().expect("reactor run");
        Finished {
            connections: reactor.connection_count(),
            readable: reactor.sets().readable_len(),
            writable: reactor.sets().writable_len(),
            idle: reactor.idle_count(),
        }
    });
    let (addr, control) = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("reactor did not start");
    (addr, control, handle)
}

fn start() -> (SocketAddr, ControlHandle, JoinHandle<Finished>) {
    start_with(test_config(), site::routes)
}

fn stop(control: ControlHandle, handle: JoinHandle<Finished>) -> Finished {
    control.shutdown().unwrap();
    let finished = handle.join().expect("reactor thread panicked");
    assert_eq!(finished.connections, 0);
    assert_eq!(finished.readable, 0);
    assert_eq!(finished.writable, 0);
    finished
}

fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

fn exchange(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = connect(addr);
    stream.write_all(request).unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn test_post_myname_greets() {
    let (addr, control, handle) = start();

    let response = exchange(addr, b"POST /myname HTTP/1.1\r\nHost: localhost\r\n\r\nname=Grace");

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Connection: close\r\n"));
    assert!(response.contains("Hello there, Grace!"));

    stop(control, handle);
}

#[test]
fn test_post_myname_decodes_plus() {
    let (addr, control, handle) = start();

    let response = exchange(addr, b"POST /myname HTTP/1.1\r\n\r\nname=Ada+Lovelace&x");
    assert!(response.contains("Hello there, Ada Lovelace!"));

    let response = exchange(addr, b"POST /myname HTTP/1.1\r\n\r\n");
    assert!(response.contains("Hello there, stranger!"));

    stop(control, handle);
}

#[test]
fn test_unknown_path_gets_404_and_clean_close() {
    let (addr, control, handle) = start();

    let response = exchange(addr, b"GET /nope HTTP/1.1\r\n\r\n");

    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    stop(control, handle);
}

#[test]
fn test_unknown_method_gets_404() {
    let (addr, control, handle) = start();

    let response = exchange(addr, b"FOO / HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));

    // Method tokens are case-sensitive
    let response = exchange(addr, b"get / HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));

    let response = exchange(addr, b"GET\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));

    stop(control, handle);
}

#[test]
fn test_index_page_with_counter() {
    let (addr, control, handle) = start();

    let response = exchange(addr, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("Content-Type: text/html; charset=UTF-8"));
    assert!(response.contains("Request count: 1"));
    assert_eq!(response.matches("HTTP/1.1 ").count(), 1);

    stop(control, handle);
}

#[test]
fn test_split_delivery_dispatches_once() {
    let (addr, control, handle) = start();

    let mut stream = connect(addr);
    stream.write_all(b"GET / HTTP/1.1\r\n").unwrap();
    stream.flush().unwrap();
    thread::sleep(Duration::from_millis(100));
    stream.write_all(b"\r\n").unwrap();

    let mut out = String::new();
    stream.read_to_string(&mut out).unwrap();

    assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 1);
    assert!(out.contains("Request count: 1"));

    stop(control, handle);
}

fn pattern() -> Vec<u8> {
    (0..10_000u32).map(|i| b'a' + (i % 26) as u8).collect()
}

fn large_routes(_peer: SocketAddr) -> (Router<()>, ()) {
    let mut router = Router::new();
    router.register(&[Method::GET], "/large", |_: &mut (), _: &Request, out: &mut Response| {
        let body = pattern();
        out.queue(body[..3_000].to_vec());
        out.queue(body[3_000..].to_vec());
    });
    (router, ())
}

#[test]
fn test_large_response_arrives_complete_and_in_order() {
    let mut cfg = test_config();
    cfg.connection.send_chunk = 4096;
    let (addr, control, handle) = start_with(cfg, large_routes);

    let mut stream = connect(addr);
    stream.write_all(b"GET /large HTTP/1.1\r\n\r\n").unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).unwrap();

    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("header terminator")
        + 4;
    assert_eq!(&raw[split..], &pattern()[..]);

    stop(control, handle);
}

#[test]
fn test_concurrent_clients_are_multiplexed() {
    let (addr, control, handle) = start();

    // Open every connection and send half a request before finishing any
    let mut clients: Vec<TcpStream> = (0..4).map(|_| connect(addr)).collect();
    for client in &mut clients {
        client.write_all(b"POST /myname HTTP/1.1\r\n").unwrap();
    }
    thread::sleep(Duration::from_millis(50));
    for (i, client) in clients.iter_mut().enumerate() {
        client
            .write_all(format!("\r\nname=client{i}").as_bytes())
            .unwrap();
    }

    for (i, mut client) in clients.into_iter().enumerate() {
        let mut out = String::new();
        client.read_to_string(&mut out).unwrap();
        assert!(
            out.contains(&format!("Hello there, client{i}!")),
            "client {i} got {out:?}"
        );
    }

    stop(control, handle);
}

#[test]
fn test_shutdown_closes_idle_connections() {
    let (addr, control, handle) = start();

    let mut idle_client = connect(addr);
    // Give the reactor time to accept the connection
    thread::sleep(Duration::from_millis(100));

    stop(control, handle);

    let mut buf = [0u8; 16];
    let n = idle_client.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0);
}

#[test]
fn test_idle_action_runs_when_nothing_is_ready() {
    let (_addr, control, handle) = start();

    thread::sleep(Duration::from_millis(150));
    let finished = stop(control, handle);

    assert!(finished.idle > 0);
}

#[test]
fn test_non_quit_control_input_is_ignored() {
    let (addr, control, handle) = start();

    control.send('x').unwrap();
    let response = exchange(addr, b"GET /nope HTTP/1.1\r\n\r\n");
    assert!(response.starts_with("HTTP/1.1 404"));

    stop(control, handle);
}

#[test]
fn test_turn_by_turn_set_membership() {
    let mut reactor = Reactor::bind(&test_config(), site::routes).unwrap();
    let addr = reactor.local_addr().unwrap();

    let mut client = connect(addr);
    client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();

    // Listener and control channel are readable members from the start
    assert_eq!(reactor.sets().readable_len(), 2);

    let deadline = Instant::now() + Duration::from_secs(5);
    while reactor.connection_count() == 0 {
        assert!(Instant::now() < deadline, "never accepted");
        reactor.turn().unwrap();
    }
    assert_eq!(reactor.sets().readable_len(), 3);

    while reactor.connection_count() > 0 {
        assert!(Instant::now() < deadline, "never finished");
        reactor.turn().unwrap();
    }
    assert_eq!(reactor.sets().readable_len(), 2);
    assert_eq!(reactor.sets().writable_len(), 0);

    let mut out = String::new();
    client.read_to_string(&mut out).unwrap();
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
}

fn turn_until<C: 'static>(reactor: &mut Reactor<C>, what: &str, done: impl Fn(&Reactor<C>) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done(reactor) {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        reactor.turn().unwrap();
    }
}

/// Closes `client` with an RST instead of a FIN.
fn reset(client: TcpStream) {
    socket2::SockRef::from(&client)
        .set_linger(Some(Duration::ZERO))
        .unwrap();
    drop(client);
}

/// Checks the reactor is back to listener and control only and still
/// answers a fresh client.
fn assert_recovered<C: 'static>(reactor: &mut Reactor<C>, request: &[u8], status_line: &str) {
    assert_eq!(reactor.connection_count(), 0);
    assert_eq!(reactor.sets().readable_len(), 2);
    assert_eq!(reactor.sets().writable_len(), 0);

    let mut client = connect(reactor.local_addr().unwrap());
    client.write_all(request).unwrap();
    turn_until(reactor, "next accept", |r| r.connection_count() == 1);
    turn_until(reactor, "next response", |r| r.connection_count() == 0);

    let mut out = Vec::new();
    client.read_to_end(&mut out).unwrap();
    assert!(out.starts_with(status_line.as_bytes()));
}

#[test]
fn test_reset_while_idle_releases_connection() {
    let mut reactor = Reactor::bind(&test_config(), site::routes).unwrap();
    let client = connect(reactor.local_addr().unwrap());

    turn_until(&mut reactor, "accept", |r| r.connection_count() == 1);
    assert_eq!(reactor.sets().readable_len(), 3);

    reset(client);
    turn_until(&mut reactor, "release", |r| r.connection_count() == 0);

    assert_recovered(&mut reactor, b"GET / HTTP/1.1\r\n\r\n", "HTTP/1.1 200 OK\r\n");
}

const FLOOD_LEN: usize = 32 * 1024 * 1024;

fn flood_routes(_peer: SocketAddr) -> (Router<()>, ()) {
    let mut router = Router::new();
    router.register(&[Method::GET], "/flood", |_: &mut (), _: &Request, out: &mut Response| {
        out.queue(vec![b'z'; FLOOD_LEN]);
    });
    (router, ())
}

#[test]
fn test_reset_while_send_is_blocked_releases_connection() {
    let mut cfg = test_config();
    cfg.connection.send_chunk = 65536;
    let mut reactor = Reactor::bind(&cfg, flood_routes).unwrap();

    let mut client = connect(reactor.local_addr().unwrap());
    client.write_all(b"GET /flood HTTP/1.1\r\n\r\n").unwrap();
    client.shutdown(Shutdown::Write).unwrap();

    // Turn until the response is in flight and the client's unread bytes
    // have stalled it: an idle iteration with the connection still writable.
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        assert!(Instant::now() < deadline, "send never blocked");
        let idle = reactor.idle_count();
        reactor.turn().unwrap();
        if reactor.sets().writable_len() == 1 && reactor.idle_count() > idle {
            break;
        }
    }
    assert_eq!(reactor.connection_count(), 1);
    // Half-closed peer: writable only
    assert_eq!(reactor.sets().readable_len(), 2);

    reset(client);
    turn_until(&mut reactor, "release", |r| r.connection_count() == 0);

    assert_recovered(&mut reactor, b"GET /nope HTTP/1.1\r\n\r\n", "HTTP/1.1 404 Not Found\r\n");
}

#[test]
fn test_reset_while_writes_progress_releases_connection() {
    let mut cfg = test_config();
    cfg.connection.send_chunk = 16;
    let mut reactor = Reactor::bind(&cfg, large_routes).unwrap();

    let mut client = connect(reactor.local_addr().unwrap());
    client.write_all(b"GET /large HTTP/1.1\r\n\r\n").unwrap();

    turn_until(&mut reactor, "dispatch", |r| r.sets().writable_len() == 1);
    // A few bounded sends, leaving most of the body queued
    for _ in 0..5 {
        reactor.turn().unwrap();
    }
    assert_eq!(reactor.connection_count(), 1);

    reset(client);
    turn_until(&mut reactor, "release", |r| r.connection_count() == 0);

    assert_recovered(&mut reactor, b"GET /nope HTTP/1.1\r\n\r\n", "HTTP/1.1 404 Not Found\r\n");
}
