//! Integration tests for the server/client engine over loopback sockets

use netframe::{
    ClientInterface, Connection, Message, NetworkError, ServerConfig, ServerHandler,
    ServerInterface, HEADER_SIZE,
};
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

netframe::message_kind! {
    enum Kind {
        ServerAccept = 0,
        ServerDeny = 1,
        ServerPing = 2,
        MessageAll = 3,
        ServerMessage = 4,
        Data = 5,
    }
}

const DEADLINE: Duration = Duration::from_secs(5);

/// Server mirroring the ping / message-all sample application
struct TestServer {
    approve: bool,
    disconnects: Mutex<Vec<u32>>,
    received: Mutex<Vec<(u32, Message<Kind>)>>,
}

impl TestServer {
    fn new(approve: bool) -> Arc<Self> {
        Arc::new(Self {
            approve,
            disconnects: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
        })
    }
}

impl ServerHandler<Kind> for TestServer {
    fn on_client_connect(&self, client: &Arc<Connection<Kind>>) -> bool {
        if self.approve {
            client.send(&Message::new(Kind::ServerAccept)).unwrap();
        }
        self.approve
    }

    fn on_client_disconnect(&self, client: &Arc<Connection<Kind>>) {
        self.disconnects.lock().push(client.id());
    }

    fn on_message(&self, server: &ServerInterface<Kind>, client: &Arc<Connection<Kind>>, msg: Message<Kind>) {
        self.received.lock().push((client.id(), msg.clone()));
        match msg.kind() {
            Kind::ServerPing => server.message_client(client, &msg).unwrap(),
            Kind::MessageAll => {
                let mut out = Message::new(Kind::ServerMessage);
                out.push(client.id());
                server.message_all_clients(&out, Some(client)).unwrap();
            }
            _ => {}
        }
    }
}

fn start_server(handler: Arc<TestServer>) -> ServerInterface<Kind> {
    let mut server = ServerInterface::with_config(ServerConfig::new("127.0.0.1:0"), handler);
    server.start().expect("Failed to start server");
    server
}

fn connect_client(server: &ServerInterface<Kind>) -> ClientInterface<Kind> {
    let port = server.local_addr().unwrap().port();
    let mut client = ClientInterface::new();
    client.connect("127.0.0.1", port).expect("Failed to connect");
    client
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + DEADLINE;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Run `update` on this thread until `count` messages were dispatched
fn pump(server: &ServerInterface<Kind>, count: usize) {
    let mut dispatched = 0;
    assert!(
        wait_until(|| {
            dispatched += server.update(usize::MAX, false);
            dispatched >= count
        }),
        "only {} of {} messages dispatched",
        dispatched,
        count
    );
}

fn receive(client: &ClientInterface<Kind>) -> Message<Kind> {
    assert!(
        client.incoming().wait_timeout(DEADLINE),
        "no message arrived"
    );
    let owned = client.incoming().pop_front().unwrap();
    assert!(!owned.has_origin());
    owned.msg
}

#[test]
fn test_start_fails_when_port_in_use() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = occupied.local_addr().unwrap();

    let mut server =
        ServerInterface::<Kind>::with_config(ServerConfig::new(addr.to_string()), TestServer::new(true));
    let result = server.start();

    assert!(matches!(result, Err(NetworkError::Bind(_))));
    assert!(!server.is_running());
}

#[test]
fn test_echo_ping() {
    let handler = TestServer::new(true);
    let mut server = start_server(Arc::clone(&handler));
    let client = connect_client(&server);

    assert_eq!(receive(&client).kind(), Kind::ServerAccept);

    let sent_at: u64 = 1_700_000_123_456;
    let mut ping = Message::new(Kind::ServerPing);
    ping.push(sent_at);
    client.send(&ping).unwrap();

    pump(&server, 1);

    let mut echo = receive(&client);
    assert_eq!(echo.kind(), Kind::ServerPing);
    assert_eq!(echo.header().size, 8);
    assert_eq!(echo.pop::<u64>().unwrap(), sent_at);

    server.stop();
}

#[test]
fn test_denied_connection_is_closed_and_never_registered() {
    let handler = TestServer::new(false);
    let mut server = start_server(Arc::clone(&handler));
    let client = connect_client(&server);

    assert!(wait_until(|| !client.is_connected()));
    assert_eq!(server.connection_count(), 0);
    assert!(client.incoming().is_empty());

    server.stop();
}

/// Denies the first peer, approves every later one
struct DenyFirst {
    seen: AtomicUsize,
}

impl ServerHandler<Kind> for DenyFirst {
    fn on_client_connect(&self, _client: &Arc<Connection<Kind>>) -> bool {
        self.seen.fetch_add(1, Ordering::SeqCst) > 0
    }
}

#[test]
fn test_accept_continues_after_denial() {
    let mut server = ServerInterface::<Kind>::with_config(
        ServerConfig::new("127.0.0.1:0"),
        Arc::new(DenyFirst {
            seen: AtomicUsize::new(0),
        }),
    );
    server.start().unwrap();
    let port = server.local_addr().unwrap().port();

    let mut denied = ClientInterface::<Kind>::new();
    denied.connect("127.0.0.1", port).unwrap();
    assert!(wait_until(|| !denied.is_connected()));
    assert_eq!(server.connection_count(), 0);

    let mut approved = ClientInterface::<Kind>::new();
    approved.connect("127.0.0.1", port).unwrap();
    assert!(wait_until(|| server.connection_count() == 1));

    // Denied peers never consume an id
    let ids: Vec<u32> = server.connections().iter().map(|c| c.id()).collect();
    assert_eq!(ids, vec![10_000]);
    assert!(approved.is_connected());

    server.stop();
}

#[test]
fn test_ids_are_sequential_from_base() {
    let handler = TestServer::new(true);
    let mut server = start_server(Arc::clone(&handler));

    let first = connect_client(&server);
    assert!(wait_until(|| server.connection_count() == 1));
    let second = connect_client(&server);
    assert!(wait_until(|| server.connection_count() == 2));

    let ids: Vec<u32> = server.connections().iter().map(|c| c.id()).collect();
    assert_eq!(ids, vec![10_000, 10_001]);
    assert!(server.connection(10_001).is_some());

    // Client-side connections never get an id
    assert_eq!(first.connection().unwrap().id(), 0);
    assert_eq!(second.connection().unwrap().id(), 0);

    server.stop();
}

#[test]
fn test_broadcast_excludes_sender() {
    let handler = TestServer::new(true);
    let mut server = start_server(Arc::clone(&handler));

    let a = connect_client(&server);
    let b = connect_client(&server);
    let c = connect_client(&server);
    for client in [&a, &b, &c] {
        assert_eq!(receive(client).kind(), Kind::ServerAccept);
    }
    assert!(wait_until(|| server.connection_count() == 3));

    a.send(&Message::new(Kind::MessageAll)).unwrap();
    pump(&server, 1);

    let sender_id = handler.received.lock()[0].0;
    for client in [&b, &c] {
        let mut msg = receive(client);
        assert_eq!(msg.kind(), Kind::ServerMessage);
        assert_eq!(msg.pop::<u32>().unwrap(), sender_id);
    }

    std::thread::sleep(Duration::from_millis(200));
    assert!(a.incoming().is_empty());
    assert!(b.incoming().is_empty());
    assert!(c.incoming().is_empty());

    server.stop();
}

#[test]
fn test_broadcast_prunes_dead_connection_once() {
    let handler = TestServer::new(true);
    let mut server = start_server(Arc::clone(&handler));

    let mut leaving = connect_client(&server);
    let staying = connect_client(&server);
    assert!(wait_until(|| server.connection_count() == 2));

    leaving.disconnect();
    assert!(wait_until(|| server
        .connections()
        .iter()
        .any(|c| !c.is_connected())));

    // Dead entries linger until the registry is touched
    assert_eq!(server.connection_count(), 2);

    let notice = Message::new(Kind::Data);
    server.message_all_clients(&notice, None).unwrap();
    server.message_all_clients(&notice, None).unwrap();
    server.message_all_clients(&notice, None).unwrap();

    assert_eq!(server.connection_count(), 1);
    assert_eq!(handler.disconnects.lock().len(), 1);

    assert_eq!(receive(&staying).kind(), Kind::ServerAccept);
    for _ in 0..3 {
        assert_eq!(receive(&staying).kind(), Kind::Data);
    }

    server.stop();
}

#[test]
fn test_message_client_prunes_dead_connection() {
    let handler = TestServer::new(true);
    let mut server = start_server(Arc::clone(&handler));

    let mut client = connect_client(&server);
    assert!(wait_until(|| server.connection_count() == 1));
    let server_side = server.connections().remove(0);

    client.disconnect();
    assert!(wait_until(|| !server_side.is_connected()));

    let msg = Message::new(Kind::Data);
    server.message_client(&server_side, &msg).unwrap();
    server.message_client(&server_side, &msg).unwrap();

    assert_eq!(server.connection_count(), 0);
    assert_eq!(*handler.disconnects.lock(), vec![server_side.id()]);

    server.stop();
}

#[test]
fn test_inbound_fifo_from_single_write() {
    let handler = TestServer::new(true);
    let mut server = start_server(Arc::clone(&handler));

    let mut raw = std::net::TcpStream::connect(server.local_addr().unwrap()).unwrap();
    let mut wire = Vec::new();
    for i in 0..100u32 {
        let mut msg = Message::new(Kind::Data);
        for _ in 0..(i % 4) {
            msg.push(i);
        }
        wire.extend_from_slice(&msg.encode().unwrap());
    }
    raw.write_all(&wire).unwrap();

    pump(&server, 100);

    let received = handler.received.lock();
    assert_eq!(received.len(), 100);
    for (i, (_, msg)) in received.iter().enumerate() {
        assert_eq!(msg.size(), (i % 4) * 4);
    }
    drop(received);

    server.stop();
}

#[test]
fn test_update_dispatches_message_from_pruned_connection() {
    let handler = TestServer::new(true);
    let mut server = start_server(Arc::clone(&handler));

    let mut raw = std::net::TcpStream::connect(server.local_addr().unwrap()).unwrap();
    assert!(wait_until(|| server.connection_count() == 1));
    let server_side = server.connections().remove(0);

    let mut last_words = Message::new(Kind::Data);
    last_words.push(42u32);
    raw.write_all(&last_words.encode().unwrap()).unwrap();
    assert!(wait_until(|| server.incoming().count() == 1));

    drop(raw);
    assert!(wait_until(|| !server_side.is_connected()));

    // The broadcast prunes the dead peer before anyone drains its message
    server.message_all_clients(&Message::new(Kind::Data), None).unwrap();
    assert_eq!(server.connection_count(), 0);
    assert_eq!(*handler.disconnects.lock(), vec![server_side.id()]);

    assert_eq!(server.update(usize::MAX, false), 1);

    let received = handler.received.lock();
    assert_eq!(received.len(), 1);
    let (sender, msg) = &received[0];
    assert_eq!(*sender, server_side.id());
    assert_eq!(msg.kind(), Kind::Data);
    assert_eq!(msg.clone().pop::<u32>().unwrap(), 42);
    drop(received);

    server.stop();
}

#[test]
fn test_concurrent_sends_never_interleave() {
    const THREADS: u32 = 4;
    const PER_THREAD: u32 = 250;

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut client: ClientInterface<u32> = ClientInterface::new();
    client.connect("127.0.0.1", port).unwrap();
    let (mut peer, _) = listener.accept().unwrap();

    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let client = &client;
            scope.spawn(move || {
                for seq in 0..PER_THREAD {
                    let mut msg = Message::new(t);
                    msg.push(seq);
                    msg.push(0u8);
                    client.send(&msg).unwrap();
                }
            });
        }
    });

    peer.set_read_timeout(Some(DEADLINE)).unwrap();
    let mut next_seq = vec![0u32; THREADS as usize];
    for _ in 0..THREADS * PER_THREAD {
        let mut header = [0u8; HEADER_SIZE];
        peer.read_exact(&mut header).unwrap();
        let kind = u32::from_be_bytes(header[..4].try_into().unwrap());
        let size = u32::from_be_bytes(header[4..].try_into().unwrap());
        assert_eq!(size, 5);

        let mut body = [0u8; 5];
        peer.read_exact(&mut body).unwrap();
        let seq = u32::from_be_bytes(body[..4].try_into().unwrap());
        assert_eq!(body[4], 0);

        assert_eq!(seq, next_seq[kind as usize], "thread {} out of order", kind);
        next_seq[kind as usize] += 1;
    }
    assert!(next_seq.iter().all(|&n| n == PER_THREAD));

    client.disconnect();
}

#[test]
fn test_stop_closes_clients() {
    let handler = TestServer::new(true);
    let mut server = start_server(Arc::clone(&handler));
    let client = connect_client(&server);
    assert!(wait_until(|| server.connection_count() == 1));

    server.stop();

    assert!(wait_until(|| !client.is_connected()));
    assert_eq!(server.connection_count(), 0);
    // Stop does not report shutdown closures as disconnects
    assert!(handler.disconnects.lock().is_empty());
}

#[test]
fn test_update_wait_blocks_until_message() {
    let handler = TestServer::new(true);
    let mut server = start_server(Arc::clone(&handler));
    let client = connect_client(&server);
    assert!(wait_until(|| server.connection_count() == 1));

    let dispatched = Arc::new(AtomicUsize::new(0));
    std::thread::scope(|scope| {
        let dispatched_in = Arc::clone(&dispatched);
        let server = &server;
        let waiter = scope.spawn(move || {
            dispatched_in.fetch_add(server.update(1, true), Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(dispatched.load(Ordering::SeqCst), 0);

        client.send(&Message::new(Kind::Data)).unwrap();
        waiter.join().unwrap();
    });
    assert_eq!(dispatched.load(Ordering::SeqCst), 1);

    server.stop();
}

/// Approves every peer, but only after lingering in the hook
struct SlowApprover {
    entered: AtomicBool,
}

impl ServerHandler<Kind> for SlowApprover {
    fn on_client_connect(&self, _client: &Arc<Connection<Kind>>) -> bool {
        self.entered.store(true, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(300));
        true
    }
}

#[test]
fn test_stop_closes_connection_approved_during_shutdown() {
    let handler = Arc::new(SlowApprover {
        entered: AtomicBool::new(false),
    });
    let mut server = ServerInterface::<Kind>::with_config(
        ServerConfig::new("127.0.0.1:0"),
        Arc::clone(&handler) as Arc<dyn ServerHandler<Kind>>,
    );
    server.start().unwrap();

    let mut client = ClientInterface::<Kind>::new();
    client
        .connect("127.0.0.1", server.local_addr().unwrap().port())
        .unwrap();

    // Stop while the accept task is still inside the approval hook
    assert!(wait_until(|| handler.entered.load(Ordering::SeqCst)));
    server.stop();

    assert_eq!(server.connection_count(), 0);
    assert!(wait_until(|| !client.is_connected()));
    client.disconnect();
}
