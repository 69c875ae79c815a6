//! End-to-end gateway tests
//!
//! Real WebSockets against an in-process gateway backed by the in-memory
//! store and bus.

use anyhow::Result;
use gateway_client::{ClientConfig, ClientEvent, GatewayClient};
use gateway_common::GatewayTimingConfig;
use gateway_protocol::{GatewayFrame, OpCode};
use integration_tests::{
    dm_message, fast_timing, test_timing, typing, TestGateway, TestSocket, ALICE, BOB, LONER,
};
use std::time::Duration;

#[tokio::test]
async fn hello_is_sent_first_with_declared_interval() -> Result<()> {
    let gateway = TestGateway::start().await?;
    let mut socket = TestSocket::connect(&gateway).await?;

    let interval = socket.expect_hello().await?;
    assert_eq!(interval, test_timing().heartbeat_interval_ms);
    Ok(())
}

#[tokio::test]
async fn identify_yields_ready_with_subscriptions() -> Result<()> {
    let gateway = TestGateway::start().await?;
    let mut socket = TestSocket::connect(&gateway).await?;

    let ready = socket.identify(&gateway.token(ALICE, "alice")?).await?;
    assert!(!ready["session_id"].as_str().unwrap().is_empty());
    assert_eq!(ready["user"]["username"], "alice");
    assert_eq!(ready["dm_channel_ids"][0], "100");
    assert_eq!(ready["server_ids"][0], "200");
    Ok(())
}

#[tokio::test]
async fn bad_token_closes_with_4004() -> Result<()> {
    let gateway = TestGateway::start().await?;
    let mut socket = TestSocket::connect(&gateway).await?;

    socket.expect_hello().await?;
    socket
        .send_frame(&GatewayFrame::identify(&gateway_protocol::IdentifyPayload {
            token: "forged".to_string(),
        }))
        .await?;

    assert_eq!(socket.recv_close_code().await?, Some(4004));
    Ok(())
}

#[tokio::test]
async fn identify_window_elapses_into_4008() -> Result<()> {
    let gateway = TestGateway::start_with_timing(fast_timing()).await?;
    let mut socket = TestSocket::connect(&gateway).await?;

    socket.expect_hello().await?;
    // Say nothing; the 300ms window runs out
    assert_eq!(socket.recv_close_code().await?, Some(4008));
    Ok(())
}

#[tokio::test]
async fn missed_heartbeats_close_with_4009() -> Result<()> {
    let gateway = TestGateway::start_with_timing(fast_timing()).await?;
    let mut socket = TestSocket::connect(&gateway).await?;

    socket.identify(&gateway.token(ALICE, "alice")?).await?;
    // Identified but silent; 1.5x the interval passes without a heartbeat
    assert_eq!(socket.recv_close_code().await?, Some(4009));
    Ok(())
}

#[tokio::test]
async fn heartbeats_are_acked_and_keep_the_connection_alive() -> Result<()> {
    let gateway = TestGateway::start_with_timing(fast_timing()).await?;
    let mut socket = TestSocket::connect(&gateway).await?;

    socket.identify(&gateway.token(ALICE, "alice")?).await?;

    // Outlive the 300ms liveness bound by heartbeating on schedule
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        socket.send_frame(&GatewayFrame::heartbeat(Some(0))).await?;
        let ack = socket.recv_frame().await?;
        assert_eq!(ack.op, OpCode::HeartbeatAck);
    }
    Ok(())
}

#[tokio::test]
async fn malformed_frames_are_silently_ignored() -> Result<()> {
    let gateway = TestGateway::start().await?;
    let mut socket = TestSocket::connect(&gateway).await?;

    socket.identify(&gateway.token(ALICE, "alice")?).await?;
    socket.send_text("{definitely not json").await?;
    socket.send_text(r#"{"op":42,"d":{}}"#).await?;
    socket.send_frame(&GatewayFrame::reconnect()).await?;
    socket.expect_silence(Duration::from_millis(100)).await?;

    // Connection still works
    socket.send_frame(&GatewayFrame::heartbeat(None)).await?;
    assert_eq!(socket.recv_frame().await?.op, OpCode::HeartbeatAck);
    Ok(())
}

#[tokio::test]
async fn dispatched_events_carry_gapless_sequences() -> Result<()> {
    let gateway = TestGateway::start().await?;
    let mut socket = TestSocket::connect(&gateway).await?;

    socket.identify(&gateway.token(ALICE, "alice")?).await?;

    gateway.publish(&dm_message("one")).await?;
    gateway.publish(&dm_message("two")).await?;
    gateway.publish(&dm_message("three")).await?;

    for (expected_seq, content) in [(1, "one"), (2, "two"), (3, "three")] {
        let frame = socket.recv_frame().await?;
        assert_eq!(frame.op, OpCode::Dispatch);
        assert_eq!(frame.t.as_deref(), Some("MESSAGE_CREATE"));
        assert_eq!(frame.s, Some(expected_seq));
        assert_eq!(frame.d.unwrap()["content"], content);
    }
    Ok(())
}

#[tokio::test]
async fn events_fan_out_to_every_subscriber_but_not_outsiders() -> Result<()> {
    let gateway = TestGateway::start().await?;

    let mut alice = TestSocket::connect(&gateway).await?;
    alice.identify(&gateway.token(ALICE, "alice")?).await?;
    let mut bob = TestSocket::connect(&gateway).await?;
    bob.identify(&gateway.token(BOB, "bob")?).await?;
    let mut loner = TestSocket::connect(&gateway).await?;
    loner.identify(&gateway.token(LONER, "loner")?).await?;

    gateway.publish(&dm_message("hello")).await?;

    assert_eq!(alice.recv_frame().await?.s, Some(1));
    assert_eq!(bob.recv_frame().await?.s, Some(1));
    loner.expect_silence(Duration::from_millis(100)).await?;
    Ok(())
}

#[tokio::test]
async fn typing_start_skips_the_typist() -> Result<()> {
    let gateway = TestGateway::start().await?;

    let mut alice = TestSocket::connect(&gateway).await?;
    alice.identify(&gateway.token(ALICE, "alice")?).await?;
    let mut bob = TestSocket::connect(&gateway).await?;
    bob.identify(&gateway.token(BOB, "bob")?).await?;

    gateway.publish(&typing(ALICE)).await?;

    let frame = bob.recv_frame().await?;
    assert_eq!(frame.t.as_deref(), Some("TYPING_START"));
    alice.expect_silence(Duration::from_millis(100)).await?;
    Ok(())
}

#[tokio::test]
async fn resume_replays_missed_frames_and_continues_the_sequence() -> Result<()> {
    let gateway = TestGateway::start().await?;
    let token = gateway.token(ALICE, "alice")?;

    let mut first = TestSocket::connect(&gateway).await?;
    let ready = first.identify(&token).await?;
    let session_id = ready["session_id"].as_str().unwrap().to_string();

    gateway.publish(&dm_message("seen")).await?;
    gateway.publish(&dm_message("missed")).await?;

    // Read only the first frame, then vanish without a close handshake
    let seen = first.recv_frame().await?;
    assert_eq!(seen.s, Some(1));
    drop(first);

    // Let the replay writer land both entries
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The missed frame arrives first, exactly as originally sent, then
    // RESUMED marks the end of the backlog
    let mut second = TestSocket::connect(&gateway).await?;
    let replayed = second.resume(&token, &session_id, 1).await?;
    assert_eq!(replayed.s, Some(2));
    assert_eq!(replayed.d.unwrap()["content"], "missed");

    let resumed = second.recv_frame().await?;
    assert_eq!(resumed.t.as_deref(), Some("RESUMED"));
    assert!(resumed.s.is_none());

    // Live traffic continues the same sequence
    gateway.publish(&dm_message("fresh")).await?;
    let live = second.recv_frame().await?;
    assert_eq!(live.s, Some(3));
    assert_eq!(live.d.unwrap()["content"], "fresh");
    Ok(())
}

#[tokio::test]
async fn resume_with_unknown_session_invalidates_and_closes() -> Result<()> {
    let gateway = TestGateway::start().await?;
    let token = gateway.token(ALICE, "alice")?;

    let mut socket = TestSocket::connect(&gateway).await?;
    let answer = socket.resume(&token, "never-existed", 5).await?;
    assert_eq!(answer.op, OpCode::InvalidSession);
    assert_eq!(answer.invalid_session_resumable(), Some(false));
    assert_eq!(socket.recv_close_code().await?, Some(4006));

    // A fresh connection identifies fine
    let mut retry = TestSocket::connect(&gateway).await?;
    retry.identify(&token).await?;
    Ok(())
}

#[tokio::test]
async fn resuming_someone_elses_session_closes_with_4006() -> Result<()> {
    let gateway = TestGateway::start().await?;

    let mut alice = TestSocket::connect(&gateway).await?;
    let ready = alice.identify(&gateway.token(ALICE, "alice")?).await?;
    let session_id = ready["session_id"].as_str().unwrap().to_string();

    let mut thief = TestSocket::connect(&gateway).await?;
    thief.expect_hello().await?;
    thief
        .send_frame(&GatewayFrame::resume(&gateway_protocol::ResumePayload {
            token: gateway.token(BOB, "bob")?,
            session_id,
            seq: 0,
        }))
        .await?;
    assert_eq!(thief.recv_close_code().await?, Some(4006));
    Ok(())
}

#[tokio::test]
async fn health_endpoint_reports_connections() -> Result<()> {
    let gateway = TestGateway::start().await?;

    let mut socket = TestSocket::connect(&gateway).await?;
    socket.identify(&gateway.token(ALICE, "alice")?).await?;

    let body: serde_json::Value = reqwest::get(format!("{}/health", gateway.base_url()))
        .await?
        .json()
        .await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
    Ok(())
}

#[tokio::test]
async fn client_crate_connects_and_receives_dispatches() -> Result<()> {
    let timing = GatewayTimingConfig {
        heartbeat_interval_ms: 100,
        identify_timeout_ms: 5_000,
        session_ttl_secs: 60,
    };
    let gateway = TestGateway::start_with_timing(timing).await?;

    let mut config = ClientConfig::new(gateway.ws_url(), gateway.token(ALICE, "alice")?);
    config.backoff_base = Duration::from_millis(50);
    let (mut events, handle) = GatewayClient::connect(config);

    let ready = tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await?
        .unwrap();
    let ClientEvent::Ready(ready) = ready else {
        panic!("expected Ready, got {ready:?}");
    };
    assert_eq!(ready.user.username, "alice");

    gateway.publish(&dm_message("to the client")).await?;
    let event = tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await?
        .unwrap();
    let ClientEvent::Dispatch { event_type, seq, data } = event else {
        panic!("expected Dispatch, got {event:?}");
    };
    assert_eq!(event_type, "MESSAGE_CREATE");
    assert_eq!(seq, Some(1));
    assert_eq!(data["content"], "to the client");

    handle.abort();
    Ok(())
}

#[tokio::test]
async fn client_crate_stops_on_terminal_close() -> Result<()> {
    let gateway = TestGateway::start().await?;

    let config = ClientConfig::new(gateway.ws_url(), "forged-token");
    let (mut events, handle) = GatewayClient::connect(config);

    let event = tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await?
        .unwrap();
    let ClientEvent::Disconnected { code, terminal } = event else {
        panic!("expected Disconnected, got {event:?}");
    };
    assert_eq!(code, Some(4004));
    assert!(terminal);

    // The task exits on its own
    tokio::time::timeout(Duration::from_secs(1), handle).await??;
    Ok(())
}
