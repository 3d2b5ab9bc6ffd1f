//! Tests for ChatNode
//!
//! These tests verify:
//! - Host relays between clients, excluding the sender
//! - Client with no upstream reports "Not connected to any server."
//! - Disconnect detection on both sides
//! - Degraded startup (bind / connect failure)
//! - Dispatcher loop and shutdown

use std::io::{Cursor, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;
use lanchat::terminal::notice;
use lanchat::{ChannelTerminal, ChatError, ChatNode, Config, Framing, Message, Role, TerminalEvent};

const TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Helper Functions
// =============================================================================

fn host_config(framing: Framing) -> Config {
    Config::builder()
        .username("host")
        .listen_addr("127.0.0.1:0")
        .framing(framing)
        .accept_poll_interval_ms(10)
        .build()
}

fn client_config(name: &str, framing: Framing) -> Config {
    Config::builder()
        .username(name)
        .framing(framing)
        .connect_timeout_ms(1000)
        .build()
}

fn start_host(framing: Framing) -> (ChatNode, Receiver<TerminalEvent>, SocketAddr) {
    let (terminal, rx) = ChannelTerminal::new();
    let node = ChatNode::host(host_config(framing), Arc::new(terminal)).unwrap();
    let addr = node.local_addr().expect("host should be listening");
    expect_notice(&rx, notice::SERVER_STARTED);
    (node, rx, addr)
}

fn join(name: &str, addr: SocketAddr, host_rx: &Receiver<TerminalEvent>) -> (ChatNode, Receiver<TerminalEvent>) {
    let (terminal, rx) = ChannelTerminal::new();
    let node = ChatNode::join(client_config(name, Framing::Line), &addr.to_string(), Arc::new(terminal)).unwrap();
    expect_notice(&rx, notice::CONNECTED_TO_SERVER);
    expect_notice(host_rx, notice::CLIENT_CONNECTED);
    (node, rx)
}

/// Wait for a specific notice, skipping anything else
fn expect_notice(rx: &Receiver<TerminalEvent>, text: &str) {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(TerminalEvent::Notice(n)) if n == text => return,
            Ok(_) => continue,
            Err(_) => panic!("timed out waiting for notice {:?}", text),
        }
    }
}

/// Wait for a notice starting with `prefix`
fn expect_notice_prefix(rx: &Receiver<TerminalEvent>, prefix: &str) -> String {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(TerminalEvent::Notice(n)) if n.starts_with(prefix) => return n,
            Ok(_) => continue,
            Err(_) => panic!("timed out waiting for notice starting with {:?}", prefix),
        }
    }
}

/// Next chat message, skipping notices
fn expect_message(rx: &Receiver<TerminalEvent>) -> String {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(TerminalEvent::Message(m)) => return m,
            Ok(TerminalEvent::Notice(_)) => continue,
            Err(_) => panic!("timed out waiting for a message"),
        }
    }
}

fn assert_no_message(rx: &Receiver<TerminalEvent>, within: Duration) {
    let deadline = Instant::now() + within;
    while let Ok(event) = rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        if let TerminalEvent::Message(m) = event {
            panic!("unexpected message {:?}", m);
        }
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(10));
    }
}

// =============================================================================
// Relay Scenarios
// =============================================================================

#[test]
fn test_single_client_message_is_not_echoed() {
    let (host, host_rx, addr) = start_host(Framing::Line);
    let (alice, alice_rx) = join("alice", addr, &host_rx);

    assert_eq!(alice.send_line("hello").unwrap(), 1);

    // Host shows it; nobody else to relay to
    assert_eq!(expect_message(&host_rx), "alice: hello");
    assert_no_message(&alice_rx, Duration::from_millis(300));
    assert_eq!(host.peer_count(), 1);
}

#[test]
fn test_relay_to_other_clients_only() {
    let (_host, host_rx, addr) = start_host(Framing::Line);
    let (alice, alice_rx) = join("alice", addr, &host_rx);
    let (_bob, bob_rx) = join("bob", addr, &host_rx);

    alice.send_line("hi").unwrap();

    assert_eq!(expect_message(&host_rx), "alice: hi");
    assert_eq!(expect_message(&bob_rx), "alice: hi");
    assert_no_message(&alice_rx, Duration::from_millis(300));
}

#[test]
fn test_host_line_reaches_every_client() {
    let (host, host_rx, addr) = start_host(Framing::Line);
    let (_alice, alice_rx) = join("alice", addr, &host_rx);
    let (_bob, bob_rx) = join("bob", addr, &host_rx);

    assert_eq!(host.send_line("welcome").unwrap(), 2);

    assert_eq!(expect_message(&alice_rx), "host: welcome");
    assert_eq!(expect_message(&bob_rx), "host: welcome");
}

#[test]
fn test_host_with_no_clients_sends_nowhere() {
    let (host, _host_rx, _addr) = start_host(Framing::Line);

    assert_eq!(host.send_line("echo?").unwrap(), 0);
    assert_eq!(host.role(), Role::Server);
}

#[test]
fn test_raw_framing_interop() {
    let (_host, host_rx, addr) = start_host(Framing::Raw);

    let mut legacy = TcpStream::connect(addr).unwrap();
    expect_notice(&host_rx, notice::CLIENT_CONNECTED);
    legacy.write_all(b"old peer: hey").unwrap();

    assert_eq!(expect_message(&host_rx), "old peer: hey");
}

// =============================================================================
// Client Connectivity
// =============================================================================

#[test]
fn test_detached_client_reports_not_connected() {
    let (terminal, rx) = ChannelTerminal::new();
    let node = ChatNode::detached(client_config("carol", Framing::Line), Arc::new(terminal)).unwrap();

    let result = node.send_line("anyone?");

    assert!(matches!(result, Err(ChatError::NotConnected)));
    expect_notice(&rx, notice::NOT_CONNECTED);
    assert_eq!(node.peer_count(), 0);
}

#[test]
fn test_connect_failure_leaves_client_degraded() {
    // Grab a free port, then close it so nothing listens there
    let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();

    let (terminal, rx) = ChannelTerminal::new();
    let node = ChatNode::join(client_config("dave", Framing::Line), &addr.to_string(), Arc::new(terminal)).unwrap();

    expect_notice_prefix(&rx, "Connection error:");
    assert_eq!(node.role(), Role::Client);
    assert!(matches!(node.send_line("hello"), Err(ChatError::NotConnected)));
    expect_notice(&rx, notice::NOT_CONNECTED);
}

#[test]
fn test_upstream_eof_is_detected() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let (terminal, rx) = ChannelTerminal::new();
    let node = ChatNode::join(client_config("erin", Framing::Line), &addr.to_string(), Arc::new(terminal)).unwrap();
    expect_notice(&rx, notice::CONNECTED_TO_SERVER);

    let (mut host_side, _) = listener.accept().unwrap();
    host_side.write_all(b"host: bye\n").unwrap();
    drop(host_side);

    assert_eq!(expect_message(&rx), "host: bye");
    expect_notice(&rx, notice::SERVER_DISCONNECTED);
    assert_eq!(node.peer_count(), 0);
    assert!(matches!(node.send_line("still there?"), Err(ChatError::NotConnected)));
}

#[test]
fn test_client_disconnect_is_reported_once() {
    let (host, host_rx, addr) = start_host(Framing::Line);

    let peer = TcpStream::connect(addr).unwrap();
    expect_notice(&host_rx, notice::CLIENT_CONNECTED);
    wait_until(|| host.peer_count() == 1);

    drop(peer);
    expect_notice(&host_rx, notice::CLIENT_DISCONNECTED);
    wait_until(|| host.peer_count() == 0);

    // No second notice for the same connection
    let extra = host_rx
        .recv_timeout(Duration::from_millis(300))
        .ok()
        .filter(|e| *e == TerminalEvent::Notice(notice::CLIENT_DISCONNECTED.to_string()));
    assert!(extra.is_none());
}

#[test]
fn test_oversized_line_drops_only_that_client() {
    let config = Config::builder()
        .username("host")
        .listen_addr("127.0.0.1:0")
        .max_message_size(16)
        .accept_poll_interval_ms(10)
        .build();
    let (terminal, host_rx) = ChannelTerminal::new();
    let host = ChatNode::host(config, Arc::new(terminal)).unwrap();
    let addr = host.local_addr().unwrap();

    let (_good, good_rx) = join("good", addr, &host_rx);
    let mut noisy = TcpStream::connect(addr).unwrap();
    expect_notice(&host_rx, notice::CLIENT_CONNECTED);

    noisy.write_all(&[b'x'; 64]).unwrap();

    expect_notice_prefix(&host_rx, "Client error:");
    expect_notice(&host_rx, notice::CLIENT_DISCONNECTED);
    wait_until(|| host.peer_count() == 1);

    host.send_line("ok").unwrap();
    assert_eq!(expect_message(&good_rx), "host: ok");
}

// =============================================================================
// Outbound Limits
// =============================================================================

#[test]
fn test_oversized_outbound_line_is_refused_locally() {
    let (host, host_rx, addr) = start_host(Framing::Line);
    let (alice, alice_rx) = join("alice", addr, &host_rx);

    let huge = "x".repeat(70 * 1024);
    let result = alice.send_line(&huge);

    assert!(matches!(result, Err(ChatError::Protocol(_))));
    let notice = expect_notice_prefix(&alice_rx, "Send error:");
    assert!(notice.contains("too large"));

    // Nothing went out, so the host keeps the connection
    assert_no_message(&host_rx, Duration::from_millis(300));
    assert_eq!(alice.peer_count(), 1);
    assert_eq!(host.peer_count(), 1);

    assert_eq!(alice.send_line("still here").unwrap(), 1);
    assert_eq!(expect_message(&host_rx), "alice: still here");
}

#[test]
fn test_line_at_size_limit_is_delivered() {
    let config = Config::builder()
        .username("host")
        .listen_addr("127.0.0.1:0")
        .max_message_size(32)
        .accept_poll_interval_ms(10)
        .build();
    let (terminal, host_rx) = ChannelTerminal::new();
    let host = ChatNode::host(config, Arc::new(terminal)).unwrap();
    let addr = host.local_addr().unwrap();

    let client = Config::builder().username("amy").max_message_size(32).build();
    let (terminal, amy_rx) = ChannelTerminal::new();
    let amy = ChatNode::join(client, &addr.to_string(), Arc::new(terminal)).unwrap();
    expect_notice(&amy_rx, notice::CONNECTED_TO_SERVER);
    expect_notice(&host_rx, notice::CLIENT_CONNECTED);

    // "amy: " plus 27 bytes is exactly 32
    let exact = "y".repeat(27);
    assert_eq!(amy.send_line(&exact).unwrap(), 1);
    assert_eq!(expect_message(&host_rx), format!("amy: {}", exact));

    assert!(matches!(amy.send_line(&"y".repeat(28)), Err(ChatError::Protocol(_))));
    assert_eq!(amy.peer_count(), 1);
}

#[test]
fn test_embedded_newline_is_refused_under_line_framing() {
    let (host, host_rx, addr) = start_host(Framing::Line);
    let (_alice, alice_rx) = join("alice", addr, &host_rx);

    let result = host.dispatch(&Message::from("host: one\nhost: two"));

    assert!(matches!(result, Err(ChatError::Protocol(_))));
    expect_notice_prefix(&host_rx, "Send error:");
    assert_no_message(&alice_rx, Duration::from_millis(300));
    assert_eq!(host.peer_count(), 1);
}

#[test]
fn test_embedded_newline_is_sent_whole_under_length_framing() {
    let (host, host_rx, addr) = start_host(Framing::LengthPrefixed);
    let client = Config::builder()
        .username("lena")
        .framing(Framing::LengthPrefixed)
        .build();
    let (terminal, lena_rx) = ChannelTerminal::new();
    let _lena = ChatNode::join(client, &addr.to_string(), Arc::new(terminal)).unwrap();
    expect_notice(&host_rx, notice::CLIENT_CONNECTED);

    assert_eq!(host.dispatch(&Message::from("host: one\nhost: two")).unwrap(), 1);
    assert_eq!(expect_message(&lena_rx), "host: one\nhost: two");
}

// =============================================================================
// Startup Failures
// =============================================================================

#[test]
fn test_bind_failure_leaves_host_degraded() {
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = Config::builder()
        .listen_addr(occupied.local_addr().unwrap().to_string())
        .build();

    let (terminal, rx) = ChannelTerminal::new();
    let node = ChatNode::host(config, Arc::new(terminal)).unwrap();

    expect_notice_prefix(&rx, "Server error:");
    assert!(node.local_addr().is_none());
    assert!(!node.is_listening());
    assert_eq!(node.send_line("alone").unwrap(), 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = Config::builder().read_buffer_size(0).build();
    let (terminal, _rx) = ChannelTerminal::new();

    let result = ChatNode::host(config, Arc::new(terminal));
    assert!(matches!(result, Err(ChatError::Config(_))));
}

// =============================================================================
// Dispatcher and Shutdown
// =============================================================================

#[test]
fn test_dispatcher_skips_blank_lines_and_stops_on_quit() {
    let (_host, host_rx, addr) = start_host(Framing::Line);
    let (frank, _frank_rx) = join("frank", addr, &host_rx);

    let input = Cursor::new("one\n\n   \n/quit\nnever sent\n");
    frank.run_dispatcher(input).unwrap();

    assert_eq!(expect_message(&host_rx), "frank: one");
    assert_no_message(&host_rx, Duration::from_millis(300));
}

#[test]
fn test_listening_ends_with_the_accept_loop() {
    let (host, _host_rx, _addr) = start_host(Framing::Line);
    assert!(host.is_listening());

    host.shutdown();

    assert!(!host.is_listening());
    assert!(host.local_addr().is_some());
}

#[test]
fn test_client_is_never_listening() {
    let (_host, host_rx, addr) = start_host(Framing::Line);
    let (alice, _alice_rx) = join("alice", addr, &host_rx);

    assert!(!alice.is_listening());
}

#[test]
fn test_shutdown_closes_clients_without_local_notices() {
    let (host, host_rx, addr) = start_host(Framing::Line);
    let (alice, alice_rx) = join("alice", addr, &host_rx);
    wait_until(|| host.peer_count() == 1);

    host.shutdown();
    host.shutdown();

    assert!(host.is_shutting_down());
    assert_eq!(host.peer_count(), 0);
    assert!(matches!(host.send_line("gone"), Err(ChatError::Shutdown)));

    // The client sees the host go away
    expect_notice(&alice_rx, notice::SERVER_DISCONNECTED);
    assert_eq!(alice.peer_count(), 0);

    // The host does not announce its own teardown
    while let Ok(event) = host_rx.recv_timeout(Duration::from_millis(200)) {
        assert_ne!(event, TerminalEvent::Notice(notice::CLIENT_DISCONNECTED.to_string()));
    }
}
