//! End-to-end tests over real TCP: listener, connector, engine, and
//! pipes wired together through a reactor.

use std::time::{Duration, Instant};

use bytes::Bytes;
use hashbrown::HashMap;
use keelson_core::endpoint::Endpoint;
use keelson_core::fq::FairQueue;
use keelson_core::monitor::{create_monitor, TransportEvent};
use keelson_core::msg::Msg;
use keelson_core::options::SocketOptions;
use keelson_core::pipe::Pipe;
use keelson_transport::mailbox::{mailbox, Command, Mailbox};
use keelson_transport::{Connector, Listener, Reactor, TcpTransport};

const TEST_DEADLINE: Duration = Duration::from_secs(5);

/// Wait for the listener to hand over an accepted connection's pipe.
async fn accepted_pipe(sink: &Mailbox) -> Pipe {
    let command = compio::time::timeout(TEST_DEADLINE, sink.recv_async())
        .await
        .expect("timed out waiting for an accepted connection")
        .expect("listener went away before accepting");
    match command {
        Command::AttachPipe(pipe) => pipe,
        other => panic!("expected AttachPipe, got {:?}", other),
    }
}

/// Read `count` frames from a pipe, waiting between deliveries.
async fn collect_frames(pipe: &mut Pipe, count: usize) -> Vec<Msg> {
    let start = Instant::now();
    let mut frames = Vec::with_capacity(count);
    while frames.len() < count {
        assert!(
            start.elapsed() < TEST_DEADLINE,
            "timed out after {} of {} frames",
            frames.len(),
            count
        );
        if let Ok(msg) = pipe.read() {
            frames.push(msg);
            continue;
        }
        compio::time::timeout(Duration::from_millis(500), pipe.wait())
            .await
            .ok();
    }
    frames
}

fn multipart(parts: &[&str]) -> Vec<Msg> {
    let last = parts.len() - 1;
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            let mut msg = Msg::from_bytes(Bytes::copy_from_slice(part.as_bytes()));
            msg.set_more(i != last);
            msg
        })
        .collect()
}

fn send_multipart(pipe: &mut Pipe, parts: &[&str]) {
    for msg in multipart(parts) {
        pipe.write(msg).expect("pipe should accept the frame");
    }
    pipe.flush();
}

#[compio::test]
async fn multipart_round_trip_over_tcp() {
    let mut reactor = Reactor::new(1).unwrap();
    let options = SocketOptions::default();

    let (sink_tx, sink_rx) = mailbox();
    let bind_to = Endpoint::resolve("tcp://127.0.0.1:0", true).unwrap();
    let (bound, listener_ctl) = Listener::<TcpTransport>::spawn(
        reactor.choose(0),
        bind_to,
        options.clone(),
        sink_tx,
        None,
    )
    .unwrap();

    let (mut client, connector_ctl) =
        Connector::<TcpTransport>::spawn(reactor.choose(0), bound, options, None, false).unwrap();

    send_multipart(&mut client, &["alpha", "beta", "gamma"]);

    let mut server = accepted_pipe(&sink_rx).await;
    let frames = collect_frames(&mut server, 3).await;

    assert_eq!(frames[0].data(), b"alpha");
    assert!(frames[0].more());
    assert_eq!(frames[1].data(), b"beta");
    assert!(frames[1].more());
    assert_eq!(frames[2].data(), b"gamma");
    assert!(!frames[2].more());

    // Reply on the same session.
    send_multipart(&mut server, &["pong"]);
    let reply = collect_frames(&mut client, 1).await;
    assert_eq!(reply[0].data(), b"pong");
    assert!(!reply[0].more());

    let _ = connector_ctl.send(Command::Stop);
    let _ = listener_ctl.send(Command::Stop);
    reactor.shutdown();
}

#[compio::test]
async fn fair_queue_keeps_messages_whole_across_connections() {
    let mut reactor = Reactor::new(2).unwrap();
    let options = SocketOptions::default();

    let (sink_tx, sink_rx) = mailbox();
    let bind_to = Endpoint::resolve("tcp://127.0.0.1:0", true).unwrap();
    let (bound, listener_ctl) = Listener::<TcpTransport>::spawn(
        reactor.choose(0),
        bind_to,
        options.clone(),
        sink_tx,
        None,
    )
    .unwrap();

    let (mut first, first_ctl) = Connector::<TcpTransport>::spawn(
        reactor.choose(0),
        bound.clone(),
        options.clone(),
        None,
        false,
    )
    .unwrap();
    let (mut second, second_ctl) =
        Connector::<TcpTransport>::spawn(reactor.choose(0), bound, options, None, false).unwrap();

    send_multipart(&mut first, &["a1", "a2", "a3"]);
    send_multipart(&mut second, &["b1", "b2", "b3"]);

    let mut pipes: HashMap<_, _> = HashMap::new();
    let mut fq = FairQueue::new();
    for _ in 0..2 {
        let pipe = accepted_pipe(&sink_rx).await;
        fq.attach(pipe.id());
        pipes.insert(pipe.id(), pipe);
    }

    // Drain both sessions through the fair queue. Frames of one
    // message must come out contiguously even though two connections
    // are delivering concurrently.
    let start = Instant::now();
    let mut frames = Vec::new();
    while frames.len() < 6 {
        assert!(start.elapsed() < TEST_DEADLINE, "timed out draining");
        match fq.recv(&mut pipes) {
            Ok(msg) => frames.push(msg),
            Err(_) => {
                // Block until either connection delivers more frames.
                let waits: Vec<_> = pipes
                    .values_mut()
                    .map(|pipe| Box::pin(pipe.wait()))
                    .collect();
                compio::time::timeout(
                    Duration::from_millis(500),
                    futures::future::select_all(waits),
                )
                .await
                .ok();
            }
        }
    }

    let payloads: Vec<&str> = frames
        .iter()
        .map(|m| std::str::from_utf8(m.data()).unwrap())
        .collect();
    let first_message = ["a1", "a2", "a3"];
    let second_message = ["b1", "b2", "b3"];
    let a_start = payloads.iter().position(|p| *p == "a1").unwrap();
    let b_start = payloads.iter().position(|p| *p == "b1").unwrap();
    assert_eq!(&payloads[a_start..a_start + 3], &first_message);
    assert_eq!(&payloads[b_start..b_start + 3], &second_message);

    let _ = first_ctl.send(Command::Stop);
    let _ = second_ctl.send(Command::Stop);
    let _ = listener_ctl.send(Command::Stop);
    reactor.shutdown();
}

#[compio::test]
async fn connector_retries_until_listener_appears() {
    let mut reactor = Reactor::new(1).unwrap();
    let port = portpicker::pick_unused_port().expect("no free port");
    let endpoint = Endpoint::resolve(&format!("tcp://127.0.0.1:{}", port), true).unwrap();
    let options = SocketOptions::default()
        .with_reconnect_ivl(Duration::from_millis(20))
        .with_reconnect_ivl_max(Duration::from_millis(200));

    let (events_tx, events_rx) = create_monitor();
    let (mut client, connector_ctl) = Connector::<TcpTransport>::spawn(
        reactor.choose(0),
        endpoint.clone(),
        options.clone(),
        Some(events_tx),
        false,
    )
    .unwrap();

    // Nothing is listening yet; the connector must start backing off.
    let mut saw_retry = false;
    let start = Instant::now();
    while start.elapsed() < TEST_DEADLINE {
        let event = compio::time::timeout(TEST_DEADLINE, events_rx.recv_async())
            .await
            .expect("timed out waiting for a retry event")
            .expect("connector dropped its monitor");
        if matches!(event, TransportEvent::ConnectRetried { .. }) {
            saw_retry = true;
            break;
        }
    }
    assert!(saw_retry, "expected at least one reconnect attempt");

    let (sink_tx, sink_rx) = mailbox();
    let (_, listener_ctl) =
        Listener::<TcpTransport>::spawn(reactor.choose(0), endpoint, options, sink_tx, None).unwrap();

    // The connector's next attempt should now land.
    let start = Instant::now();
    loop {
        assert!(start.elapsed() < TEST_DEADLINE, "never connected");
        let event = compio::time::timeout(TEST_DEADLINE, events_rx.recv_async())
            .await
            .expect("timed out waiting to connect")
            .expect("connector dropped its monitor");
        if matches!(event, TransportEvent::Connected(_)) {
            break;
        }
    }

    send_multipart(&mut client, &["after-retry"]);
    let mut server = accepted_pipe(&sink_rx).await;
    let frames = collect_frames(&mut server, 1).await;
    assert_eq!(frames[0].data(), b"after-retry");

    let _ = connector_ctl.send(Command::Stop);
    let _ = listener_ctl.send(Command::Stop);
    reactor.shutdown();
}

#[compio::test]
async fn heavy_traffic_preserves_frame_order() {
    const COUNT: u32 = 2000;
    let mut reactor = Reactor::new(1).unwrap();
    // Small HWMs so flow-control credits race active reads constantly.
    let options = SocketOptions::default().with_send_hwm(10).with_recv_hwm(10);

    let (sink_tx, sink_rx) = mailbox();
    let bind_to = Endpoint::resolve("tcp://127.0.0.1:0", true).unwrap();
    let (bound, listener_ctl) = Listener::<TcpTransport>::spawn(
        reactor.choose(0),
        bind_to,
        options.clone(),
        sink_tx,
        None,
    )
    .unwrap();

    let (mut client, connector_ctl) =
        Connector::<TcpTransport>::spawn(reactor.choose(0), bound, options, None, false).unwrap();
    let mut server = accepted_pipe(&sink_rx).await;

    let deadline = Duration::from_secs(10);
    let start = Instant::now();
    let mut sent: u32 = 0;
    let mut received: u32 = 0;
    while received < COUNT {
        assert!(
            start.elapsed() < deadline,
            "stalled after {received} of {COUNT} frames"
        );
        while sent < COUNT {
            let msg = Msg::from_bytes(Bytes::copy_from_slice(&sent.to_be_bytes()));
            if client.write(msg).is_err() {
                // Blocked on the high-water mark until the engine
                // drains some frames.
                break;
            }
            sent += 1;
        }
        client.flush();
        match server.read() {
            Ok(msg) => {
                let mut seq = [0u8; 4];
                seq.copy_from_slice(msg.data());
                assert_eq!(
                    u32::from_be_bytes(seq),
                    received,
                    "frames lost or reordered"
                );
                received += 1;
            }
            Err(_) => {
                compio::time::timeout(Duration::from_millis(200), server.wait())
                    .await
                    .ok();
            }
        }
    }

    let _ = connector_ctl.send(Command::Stop);
    let _ = listener_ctl.send(Command::Stop);
    reactor.shutdown();
}

#[compio::test]
async fn stop_with_linger_flushes_queued_frames() {
    let mut reactor = Reactor::new(1).unwrap();
    let options = SocketOptions::default().with_linger(Some(Duration::from_secs(5)));

    let (sink_tx, sink_rx) = mailbox();
    let bind_to = Endpoint::resolve("tcp://127.0.0.1:0", true).unwrap();
    let (bound, listener_ctl) = Listener::<TcpTransport>::spawn(
        reactor.choose(0),
        bind_to,
        options.clone(),
        sink_tx,
        None,
    )
    .unwrap();

    let (mut client, connector_ctl) =
        Connector::<TcpTransport>::spawn(reactor.choose(0), bound, options, None, false).unwrap();

    // Queue a message and stop immediately; the linger window must
    // get it onto the wire before the connector goes away.
    send_multipart(&mut client, &["l1", "l2", "l3"]);
    let _ = connector_ctl.send(Command::Stop);

    let mut server = accepted_pipe(&sink_rx).await;
    let frames = collect_frames(&mut server, 3).await;
    assert_eq!(frames[0].data(), b"l1");
    assert_eq!(frames[1].data(), b"l2");
    assert_eq!(frames[2].data(), b"l3");
    assert!(!frames[2].more());

    let _ = listener_ctl.send(Command::Stop);
    reactor.shutdown();
}

#[compio::test]
async fn peer_drop_terminates_the_session_pipe() {
    let mut reactor = Reactor::new(1).unwrap();
    let options = SocketOptions::default().with_reconnect_ivl(Duration::ZERO);

    let (sink_tx, sink_rx) = mailbox();
    let bind_to = Endpoint::resolve("tcp://127.0.0.1:0", true).unwrap();
    let (bound, listener_ctl) = Listener::<TcpTransport>::spawn(
        reactor.choose(0),
        bind_to,
        options.clone(),
        sink_tx,
        None,
    )
    .unwrap();

    let (mut client, _connector_ctl) =
        Connector::<TcpTransport>::spawn(reactor.choose(0), bound, options, None, false).unwrap();

    send_multipart(&mut client, &["hello"]);
    let mut server = accepted_pipe(&sink_rx).await;
    let frames = collect_frames(&mut server, 1).await;
    assert_eq!(frames[0].data(), b"hello");

    // Close the server end. With reconnects disabled the client side
    // must observe termination rather than hang.
    server.terminate(false);
    drop(server);
    let _ = listener_ctl.send(Command::Stop);

    let start = Instant::now();
    while !client.is_terminated() {
        assert!(
            start.elapsed() < TEST_DEADLINE,
            "client pipe never terminated"
        );
        compio::time::timeout(Duration::from_millis(200), client.wait())
            .await
            .ok();
    }

    reactor.shutdown();
}
