//! End-to-end scenarios: two real client engines talking through the
//! test exchange over TCP.

mod common;

use std::time::Duration;

use tokio::sync::mpsc;

use switchline_client::{
    Call, DialOptions, MessagePayload, RegisterOptions, Session, SessionOptions, SessionState,
    TunnelOptions,
};
use switchline_components::{Transform, TransformEndpoint};

use common::{ExchangeOptions, MiniExchange};

const WAIT: Duration = Duration::from_secs(5);

fn engine(url: &str) -> Session {
    Session::new(vec![url.to_string()], SessionOptions::default())
}

async fn recv_or_panic<T>(rx: &mut mpsc::UnboundedReceiver<T>, what: &str) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .unwrap_or_else(|| panic!("channel closed waiting for {what}"))
}

fn ring_channel(session: &Session) -> mpsc::UnboundedReceiver<Call> {
    let (tx, rx) = mpsc::unbounded_channel();
    // The listener stays registered for the session's lifetime.
    drop(session.on_ring(move |call| {
        let _ = tx.send(call.clone());
    }));
    rx
}

#[tokio::test]
async fn echo_text_round_trip() {
    let exchange = MiniExchange::start().await;

    let alice = engine(&exchange.url());
    let bob = engine(&exchange.url());
    let mut alice_rings = ring_channel(&alice);

    alice
        .register("alice@example.com", RegisterOptions::new())
        .await
        .unwrap();
    bob.register("bob@example.com", RegisterOptions::new())
        .await
        .unwrap();

    let dial = {
        let bob = bob.clone();
        tokio::spawn(async move { bob.dial("alice@example.com", DialOptions::new()).await })
    };

    let inbound = recv_or_panic(&mut alice_rings, "ring at alice").await;
    assert_eq!(inbound.peer().as_str(), "bob@example.com");
    inbound.answer().await.unwrap();

    let outbound = dial.await.unwrap().unwrap();

    // Alice echoes what she hears.
    let (echo_tx, mut echo_rx) = mpsc::unbounded_channel();
    let _alice_msg_sub = inbound.on_message(move |payload| {
        let _ = echo_tx.send(payload.clone());
    });
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    let _bob_msg_sub = outbound.on_message(move |payload| {
        let _ = reply_tx.send(payload.clone());
    });

    outbound.send("Hello switchline").await.unwrap();
    let heard = recv_or_panic(&mut echo_rx, "message at alice").await;
    assert_eq!(heard, MessagePayload::Text("Hello switchline".to_string()));

    inbound.send("Echo: Hello switchline").await.unwrap();
    let reply = recv_or_panic(&mut reply_rx, "echo at bob").await;
    assert_eq!(reply, MessagePayload::Text("Echo: Hello switchline".to_string()));

    // Bob hangs up; Alice observes it.
    let (hangup_tx, mut hangup_rx) = mpsc::unbounded_channel();
    let _hangup_sub = inbound.on_hangup(move |reason| {
        let _ = hangup_tx.send(reason.clone());
    });
    outbound.hangup(None).await.unwrap();
    recv_or_panic(&mut hangup_rx, "hangup at alice").await;

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn busy_rejection_for_unknown_address() {
    let exchange = MiniExchange::start().await;
    let bob = engine(&exchange.url());

    let err = bob
        .dial("nobody@example.com", DialOptions::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, switchline_client::SessionError::CallFailed(ref reason) if reason == "offline"),
        "unexpected error: {err}"
    );

    bob.close().await;
}

#[tokio::test]
async fn binary_stream_echo_with_eof_on_hangup() {
    let exchange = MiniExchange::start().await;

    let alice = engine(&exchange.url());
    let bob = engine(&exchange.url());
    let mut alice_rings = ring_channel(&alice);

    alice
        .register("alice@example.com", RegisterOptions::new())
        .await
        .unwrap();
    bob.register("bob@example.com", RegisterOptions::new())
        .await
        .unwrap();

    let dial = {
        let bob = bob.clone();
        tokio::spawn(async move { bob.dial("alice@example.com", DialOptions::new()).await })
    };
    let inbound = recv_or_panic(&mut alice_rings, "ring at alice").await;
    inbound.answer().await.unwrap();
    let outbound = dial.await.unwrap().unwrap();

    let mut alice_stream = inbound.stream().await.unwrap();
    let mut bob_stream = outbound.stream().await.unwrap();

    let payload = [0x68, 0x65, 0x6C, 0x6C, 0x6F];

    bob_stream.write(&payload).await.unwrap();
    let received = tokio::time::timeout(WAIT, alice_stream.read_chunk())
        .await
        .expect("bytes at alice")
        .expect("stream open");
    assert_eq!(received, payload);

    alice_stream.write(&received).await.unwrap();
    let echoed = tokio::time::timeout(WAIT, bob_stream.read_chunk())
        .await
        .expect("bytes at bob")
        .expect("stream open");
    assert_eq!(echoed, payload);

    // Hangup: both readable sides signal end-of-stream.
    outbound.hangup(None).await.unwrap();
    assert!(
        tokio::time::timeout(WAIT, bob_stream.read_chunk())
            .await
            .expect("local eof")
            .is_none()
    );
    assert!(
        tokio::time::timeout(WAIT, alice_stream.read_chunk())
            .await
            .expect("remote eof")
            .is_none()
    );

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn stdio_tunnelling_through_the_process_adapter() {
    let exchange = MiniExchange::start().await;

    let host = engine(&exchange.url());
    let caller = engine(&exchange.url());
    let mut host_rings = ring_channel(&host);

    host.register("shell@example.com", RegisterOptions::new())
        .await
        .unwrap();
    caller
        .register("user@example.com", RegisterOptions::new())
        .await
        .unwrap();

    let dial = {
        let caller = caller.clone();
        tokio::spawn(async move { caller.dial("shell@example.com", DialOptions::new()).await })
    };
    let inbound = recv_or_panic(&mut host_rings, "ring at host").await;
    inbound.answer().await.unwrap();
    let outbound = dial.await.unwrap().unwrap();

    let handle = inbound
        .tunnel(
            TransformEndpoint::new(Transform::Uppercase),
            TunnelOptions::new(),
        )
        .await
        .unwrap();

    let mut caller_stream = outbound.stream().await.unwrap();
    caller_stream.write(b"hello shells\n").await.unwrap();

    // The transform output may arrive split across chunks.
    let mut collected = Vec::new();
    while collected.len() < b"HELLO SHELLS\n".len() {
        let chunk = tokio::time::timeout(WAIT, caller_stream.read_chunk())
            .await
            .expect("transformed bytes")
            .expect("stream open");
        collected.extend_from_slice(&chunk);
    }
    assert_eq!(collected, b"HELLO SHELLS\n");

    // Caller hangup closes the adapter and stops the endpoint.
    outbound.hangup(None).await.unwrap();
    let deadline = tokio::time::Instant::now() + WAIT;
    while !handle.is_closed() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "tunnel handle never closed"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    host.close().await;
    caller.close().await;
}

#[tokio::test]
async fn heartbeat_timeout_disconnects_with_4000() {
    let exchange = MiniExchange::start_with(ExchangeOptions {
        ack_heartbeats: false,
    })
    .await;

    let session = Session::new(
        vec![exchange.url()],
        SessionOptions::new()
            .with_heartbeat_interval(Duration::from_millis(5))
            .with_heartbeat_timeout(Duration::from_millis(30))
            .with_auto_reconnect(false),
    );

    let (disc_tx, mut disc_rx) = mpsc::unbounded_channel();
    let _disc_sub = session.on_disconnected(move |disconnect| {
        let _ = disc_tx.send(disconnect.clone());
    });

    session
        .register("lonely@example.com", RegisterOptions::new())
        .await
        .unwrap();

    let disconnect = recv_or_panic(&mut disc_rx, "heartbeat disconnect").await;
    assert_eq!(disconnect.code, Some(4000));
    assert_eq!(disconnect.reason.as_deref(), Some("heartbeat_timeout"));

    // autoReconnect=false: the engine stays down.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.state(), SessionState::Disconnected);

    session.close().await;
}

#[tokio::test]
async fn auto_reconnect_reregisters() {
    let exchange = MiniExchange::start().await;

    let session = Session::new(
        vec![exchange.url()],
        SessionOptions::new()
            .with_reconnect_backoff(Duration::from_millis(20))
            .with_max_reconnect_backoff(Duration::from_millis(200)),
    );

    let (reg_tx, mut reg_rx) = mpsc::unbounded_channel();
    let _reg_sub = session.on_registered(move |address| {
        let _ = reg_tx.send(address.clone());
    });

    session
        .register("reconnect@example.com", RegisterOptions::new())
        .await
        .unwrap();
    let first = recv_or_panic(&mut reg_rx, "first registration").await;
    assert_eq!(first.as_str(), "reconnect@example.com");

    exchange.drop_connections();

    let second = recv_or_panic(&mut reg_rx, "re-registration").await;
    assert_eq!(second.as_str(), "reconnect@example.com");
    assert_eq!(session.state(), SessionState::Connected);

    session.close().await;
}
