// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::link::{memory_pair, ByteLink, MemoryLink};
use crate::protocol::{codec, RawFrame};

use std::time::Duration;

fn test_config() -> StickConfig {
    StickConfig {
        message_retry: 3,
        message_timeout_ms: 120,
        write_gap_ms: 1,
        ..StickConfig::default()
    }
}

fn mac_a() -> Mac {
    Mac::parse("000D6F0001234567").unwrap()
}

struct Harness {
    controller: Arc<Controller>,
    peer: MemoryLink,
    _conn: Arc<Connection>,
    cancel: CancellationToken,
}

/// Controller over an in-memory link with the send worker running; the
/// peer end sees every transmitted frame.
fn harness(config: StickConfig) -> Harness {
    let (host, peer) = memory_pair();
    let cancel = CancellationToken::new();
    let (conn, _inbound) = Connection::new(Box::new(host), config.clone(), cancel.clone());
    let conn = Arc::new(conn);
    let controller = Controller::new(Arc::clone(&conn), config, cancel.clone());
    Arc::clone(&conn).spawn_writer();
    Arc::clone(&controller).spawn_send_worker();
    Harness { controller, peer, _conn: conn, cancel }
}

/// Read the next frame the controller put on the wire.
fn recv_frame(peer: &mut MemoryLink, timeout: Duration) -> Option<RawFrame> {
    let deadline = std::time::Instant::now() + timeout;
    let mut framer = crate::protocol::Framer::new();
    let mut buf = [0u8; 256];
    while std::time::Instant::now() < deadline {
        match peer.read(&mut buf) {
            Ok(n) => {
                framer.push(&buf[..n]);
                if let Some(chunk) = framer.next_chunk() {
                    return codec::split(&chunk).ok();
                }
            }
            Err(_) => continue,
        }
    }
    None
}

// ── sequence ids ──────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn in_flight_seq_ids_are_unique() {
    let mut h = harness(test_config());
    for _ in 0..20 {
        h.controller.handle().submit_forget(Request::NodePing { mac: mac_a() }, Priority::Foreground);
    }

    let mut seqs = Vec::new();
    while let Some(frame) = recv_frame(&mut h.peer, Duration::from_millis(300)) {
        seqs.push(frame.seq_id);
        if seqs.len() == 20 {
            break;
        }
    }
    assert_eq!(seqs.len(), 20);
    let mut deduped = seqs.clone();
    deduped.sort_unstable();
    deduped.dedup();
    assert_eq!(deduped.len(), 20, "duplicate in-flight seq id in {seqs:?}");

    let mut tracked = h.controller.pending_seqs();
    tracked.sort_unstable();
    assert_eq!(tracked, deduped, "pending table mirrors the wire");
    h.cancel.cancel();
}

// ── retries ───────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn unanswered_request_is_attempted_exactly_retry_times() {
    let config = test_config();
    let retries = u32::from(config.message_retry);
    let mut h = harness(config.clone());
    let (exhausted_tx, mut exhausted_rx) = tokio::sync::mpsc::unbounded_channel();
    Arc::clone(&h.controller).spawn_timeout_scanner(exhausted_tx);

    let started = std::time::Instant::now();
    let outcome = h
        .controller
        .handle()
        .submit(Request::NodePing { mac: mac_a() }, Priority::Foreground);

    let mut attempts = Vec::new();
    while let Some(frame) = recv_frame(&mut h.peer, config.message_timeout() * 2) {
        assert_eq!(frame.command, 0x000D);
        attempts.push(std::time::Instant::now());
    }
    assert_eq!(attempts.len() as u32, retries);

    let result = outcome.await.expect("responder must fire");
    assert_eq!(result, Err(RequestError::Timeout));

    // Failure latency: retry * timeout, give or take a poll tick.
    let elapsed = started.elapsed();
    let expected = config.message_timeout() * retries;
    assert!(elapsed >= expected - config.poll_tick());
    assert!(elapsed < expected + 4 * config.poll_tick() + Duration::from_millis(200));

    // The failed target is reported for availability bookkeeping.
    assert_eq!(exhausted_rx.recv().await, Some(mac_a()));
    assert_eq!(h.controller.pending_len(), 0);
    h.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_uses_fresh_seq_id() {
    let mut h = harness(test_config());
    let (exhausted_tx, _exhausted_rx) = tokio::sync::mpsc::unbounded_channel();
    Arc::clone(&h.controller).spawn_timeout_scanner(exhausted_tx);

    h.controller.handle().submit_forget(Request::NodePing { mac: mac_a() }, Priority::Foreground);

    let first = recv_frame(&mut h.peer, Duration::from_millis(500)).expect("first attempt");
    let second = recv_frame(&mut h.peer, Duration::from_millis(500)).expect("second attempt");
    assert_ne!(first.seq_id, second.seq_id);
    h.cancel.cancel();
}

// ── ack and response correlation ──────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn reject_ack_fails_request_immediately() {
    let mut h = harness(test_config());
    let outcome = h
        .controller
        .handle()
        .submit(Request::NodeInfo { mac: mac_a() }, Priority::Foreground);
    let frame = recv_frame(&mut h.peer, Duration::from_millis(500)).expect("request on wire");

    h.controller
        .resolve(&Response::StickAck { seq_id: frame.seq_id, code: AckCode::Reject });
    assert_eq!(outcome.await.expect("responder"), Err(RequestError::Rejected));
    assert_eq!(h.controller.pending_len(), 0);
    h.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn success_ack_completes_ack_terminal_request() {
    let mut h = harness(test_config());
    let outcome = h
        .controller
        .handle()
        .submit(Request::NodeAllowJoining { enable: true }, Priority::Foreground);
    let frame = recv_frame(&mut h.peer, Duration::from_millis(500)).expect("request on wire");

    h.controller
        .resolve(&Response::StickAck { seq_id: frame.seq_id, code: AckCode::Success });
    assert!(matches!(
        outcome.await.expect("responder"),
        Ok(Response::StickAck { code: AckCode::Success, .. })
    ));
    h.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn expected_response_completes_via_router_completion() {
    let mut h = harness(test_config());
    let outcome = h
        .controller
        .handle()
        .submit(Request::NodePing { mac: mac_a() }, Priority::Foreground);
    let frame = recv_frame(&mut h.peer, Duration::from_millis(500)).expect("request on wire");

    let response =
        Response::Ping { seq_id: frame.seq_id, mac: mac_a(), rssi_in: 40, rssi_out: 41, rtt_ms: 20 };
    match h.controller.resolve(&response) {
        Resolution::Dispatch { completion: Some(completion) } => {
            completion.send(Ok(response.clone())).ok();
        }
        _ => panic!("expected dispatch with completion"),
    }
    assert_eq!(outcome.await.expect("responder"), Ok(response));
    assert_eq!(h.controller.pending_len(), 0);
    h.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn response_before_ack_is_accepted() {
    let mut h = harness(test_config());
    let outcome = h
        .controller
        .handle()
        .submit(Request::NodePing { mac: mac_a() }, Priority::Foreground);
    let frame = recv_frame(&mut h.peer, Duration::from_millis(500)).expect("request on wire");

    // Response lands first, the (now stale) ack second.
    let response =
        Response::Ping { seq_id: frame.seq_id, mac: mac_a(), rssi_in: 1, rssi_out: 2, rtt_ms: 3 };
    if let Resolution::Dispatch { completion: Some(completion) } = h.controller.resolve(&response) {
        completion.send(Ok(response.clone())).ok();
    }
    h.controller
        .resolve(&Response::StickAck { seq_id: frame.seq_id, code: AckCode::Success });

    assert_eq!(outcome.await.expect("responder"), Ok(response));
    assert_eq!(h.controller.pending_len(), 0);
    h.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn mesh_timeout_reports_unreachable_target() {
    let mut h = harness(test_config());
    let outcome = h
        .controller
        .handle()
        .submit(Request::NodePing { mac: mac_a() }, Priority::Foreground);
    let frame = recv_frame(&mut h.peer, Duration::from_millis(500)).expect("request on wire");

    let ack = Response::NodeAck { seq_id: frame.seq_id, mac: mac_a(), code: AckCode::MeshTimeout };
    match h.controller.resolve(&ack) {
        Resolution::MarkUnreachable { mac } => assert_eq!(mac, mac_a()),
        _ => panic!("expected unreachable resolution"),
    }
    assert_eq!(outcome.await.expect("responder"), Err(RequestError::MeshTimeout));
    h.cancel.cancel();
}

// ── priorities ────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn foreground_overtakes_background() {
    let config = test_config();
    let (host, mut peer) = memory_pair();
    let cancel = CancellationToken::new();
    let (conn, _inbound) = Connection::new(Box::new(host), config.clone(), cancel.clone());
    let conn = Arc::new(conn);
    let controller = Controller::new(Arc::clone(&conn), config, cancel.clone());
    let handle = controller.handle();

    // Queue everything before the workers start, so the send worker sees
    // both queues populated.
    for _ in 0..3 {
        handle.submit_forget(Request::NodePing { mac: mac_a() }, Priority::Background);
    }
    handle.submit_forget(Request::NodeInfo { mac: mac_a() }, Priority::Foreground);

    Arc::clone(&conn).spawn_writer();
    Arc::clone(&controller).spawn_send_worker();

    let first = recv_frame(&mut peer, Duration::from_millis(500)).expect("first frame");
    assert_eq!(first.command, 0x0023, "foreground request must go first");
    cancel.cancel();
}

// ── cancellation ──────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn fail_all_fires_responders_with_cancellation() {
    let mut h = harness(test_config());
    let outcome = h
        .controller
        .handle()
        .submit(Request::NodePing { mac: mac_a() }, Priority::Foreground);
    recv_frame(&mut h.peer, Duration::from_millis(500)).expect("request on wire");

    h.controller.fail_all(RequestError::Cancelled);
    assert_eq!(outcome.await.expect("responder"), Err(RequestError::Cancelled));
    assert_eq!(h.controller.pending_len(), 0);
    h.cancel.cancel();
}
