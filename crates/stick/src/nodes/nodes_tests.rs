// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::config::StickConfig;
use crate::connection::Connection;
use crate::controller::Controller;
use crate::link::memory_pair;
use crate::protocol::responses::Calibration;
use crate::protocol::AckCode;

use super::circle::CircleNode;
use super::scan::ScanNode;
use super::sense::SenseNode;

use tokio_util::sync::CancellationToken;

fn mac(s: &str) -> Mac {
    Mac::parse(s).unwrap()
}

fn fixtures() -> (SendHandle, Arc<EventHub>) {
    let (host, _peer) = memory_pair();
    let cancel = CancellationToken::new();
    let (conn, _inbound) = Connection::new(Box::new(host), StickConfig::default(), cancel.clone());
    let controller = Controller::new(Arc::new(conn), StickConfig::default(), cancel);
    (controller.handle(), Arc::new(EventHub::new()))
}

// ── heartbeat window ──────────────────────────────────────────────────

#[test]
fn heartbeat_window_is_interval_plus_one_minute() {
    let last = Instant::now();
    let interval = Duration::from_secs(3_600);

    // Not overdue at interval + 59 s ...
    let just_inside = last + interval + Duration::from_secs(59);
    assert!(!heartbeat_overdue(last, interval, just_inside));
    // ... overdue at interval + 61 s.
    let just_outside = last + interval + Duration::from_secs(61);
    assert!(heartbeat_overdue(last, interval, just_outside));
}

#[tokio::test]
async fn heartbeat_expired_only_for_available_battery_nodes() {
    let (sender, events) = fixtures();
    let sensor = SenseNode::new(mac("000D6F0000000002"), 2, sender.clone(), Arc::clone(&events));
    let far_future = Instant::now() + Duration::from_secs(100_000);

    // Never seen: nothing to decay.
    assert!(!sensor.base().heartbeat_expired(far_future));

    sensor.base().mark_alive();
    assert!(sensor.base().heartbeat_expired(far_future));
    assert!(!sensor.base().heartbeat_expired(Instant::now()));

    // Mains nodes are not heartbeat-driven.
    let plug =
        CircleNode::new(mac("000D6F0000000001"), 1, NodeType::Circle, sender, Arc::clone(&events));
    plug.base().mark_alive();
    assert!(!plug.base().heartbeat_expired(far_future));
}

#[tokio::test]
async fn awake_notification_is_a_heartbeat() {
    let (sender, events) = fixtures();
    let sensor = SenseNode::new(mac("000D6F0000000002"), 2, sender, Arc::clone(&events));
    let mut rx = events.subscribe();

    sensor.handle_message(&Response::Awake { seq_id: 1, mac: sensor.base().mac(), kind: 0 });

    assert!(sensor.base().available());
    assert_eq!(
        rx.try_recv().unwrap(),
        StickEvent::Availability { mac: sensor.base().mac(), available: true }
    );
    assert_eq!(
        rx.try_recv().unwrap(),
        StickEvent::Node { mac: sensor.base().mac(), event: NodeEvent::Awake }
    );
}

// ── availability edges ────────────────────────────────────────────────

#[tokio::test]
async fn availability_events_fire_on_edges_only() {
    let (sender, events) = fixtures();
    let plug =
        CircleNode::new(mac("000D6F0000000001"), 1, NodeType::Circle, sender, Arc::clone(&events));
    let mut rx = events.subscribe();

    plug.base().mark_alive();
    plug.base().mark_alive();
    plug.base().mark_unavailable();
    plug.base().mark_unavailable();

    assert_eq!(
        rx.try_recv().unwrap(),
        StickEvent::Availability { mac: plug.base().mac(), available: true }
    );
    assert_eq!(
        rx.try_recv().unwrap(),
        StickEvent::Availability { mac: plug.base().mac(), available: false }
    );
    assert!(rx.try_recv().is_err());
}

// ── power conversion ──────────────────────────────────────────────────

#[tokio::test]
async fn power_events_use_calibration() {
    let (sender, events) = fixtures();
    let target = mac("000D6F0000000001");
    let plug = CircleNode::new(target, 1, NodeType::Circle, sender, Arc::clone(&events));

    // Identity calibration: corrected pulses == raw pulses.
    plug.handle_message(&Response::Calibration {
        seq_id: 1,
        mac: target,
        calibration: Calibration { gain_a: 1.0, gain_b: 0.0, off_total: 0.0, off_noise: 0.0 },
    });

    let mut rx = events.subscribe();
    plug.handle_message(&Response::PowerUsage {
        seq_id: 2,
        mac: target,
        pulse_1s: 469,
        pulse_8s: 8 * 469,
        pulse_hour: 0,
    });

    match rx.try_recv().unwrap() {
        StickEvent::Node { event: NodeEvent::Power { watts_1s, watts_8s }, .. } => {
            // 469 pulses/s through identity calibration is ~1 kW.
            assert!((watts_1s - 1000.13).abs() < 0.5, "watts_1s = {watts_1s}");
            assert!((watts_8s - 1000.13).abs() < 0.5, "watts_8s = {watts_8s}");
        }
        other => panic!("expected power event, got {other:?}"),
    }
}

#[tokio::test]
async fn power_without_calibration_keeps_raw_pulses_only() {
    let (sender, events) = fixtures();
    let target = mac("000D6F0000000001");
    let plug = CircleNode::new(target, 1, NodeType::Circle, sender, Arc::clone(&events));

    let mut rx = events.subscribe();
    plug.handle_message(&Response::PowerUsage {
        seq_id: 2,
        mac: target,
        pulse_1s: 12,
        pulse_8s: 96,
        pulse_hour: 0,
    });

    assert_eq!(plug.last_pulses(), Some((12, 96)));
    // Only the availability edge, no power event.
    assert_eq!(
        rx.try_recv().unwrap(),
        StickEvent::Availability { mac: target, available: true }
    );
    assert!(rx.try_recv().is_err());
}

// ── relay ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn relay_acks_update_state_once_per_change() {
    let (sender, events) = fixtures();
    let target = mac("000D6F0000000001");
    let plug = CircleNode::new(target, 1, NodeType::Circle, sender, Arc::clone(&events));
    plug.base().mark_alive();

    let mut rx = events.subscribe();
    plug.handle_message(&Response::NodeAck { seq_id: 1, mac: target, code: AckCode::RelayOn });
    plug.handle_message(&Response::NodeAck { seq_id: 2, mac: target, code: AckCode::RelayOn });
    plug.handle_message(&Response::NodeAck { seq_id: 3, mac: target, code: AckCode::RelayOff });

    assert_eq!(
        rx.try_recv().unwrap(),
        StickEvent::Node { mac: target, event: NodeEvent::Relay { on: true } }
    );
    assert_eq!(
        rx.try_recv().unwrap(),
        StickEvent::Node { mac: target, event: NodeEvent::Relay { on: false } }
    );
    assert!(rx.try_recv().is_err());
    assert_eq!(plug.relay_on(), Some(false));
}

// ── sense conversions ─────────────────────────────────────────────────

#[tokio::test]
async fn sense_report_converts_raw_words() {
    let (sender, events) = fixtures();
    let target = mac("000D6F0000000002");
    let sensor = SenseNode::new(target, 2, sender, Arc::clone(&events));
    sensor.base().mark_alive();

    let mut rx = events.subscribe();
    sensor.handle_message(&Response::SenseReport {
        seq_id: 1,
        mac: target,
        humidity_raw: 0x4000,
        temperature_raw: 0x8000,
    });

    match rx.try_recv().unwrap() {
        StickEvent::Node { event: NodeEvent::Sense { temperature, humidity }, .. } => {
            assert!((temperature - 41.01).abs() < 0.01, "temperature = {temperature}");
            assert!((humidity - 25.25).abs() < 0.01, "humidity = {humidity}");
        }
        other => panic!("expected sense event, got {other:?}"),
    }
}

// ── motion ────────────────────────────────────────────────────────────

#[tokio::test]
async fn switch_group_frames_become_motion_events() {
    let (sender, events) = fixtures();
    let target = mac("000D6F0000000003");
    let sensor = ScanNode::new(target, 3, sender, Arc::clone(&events));
    sensor.base().mark_alive();

    let mut rx = events.subscribe();
    sensor.handle_message(&Response::SwitchGroup { seq_id: 1, mac: target, group: 1, on: true });

    assert_eq!(
        rx.try_recv().unwrap(),
        StickEvent::Node { mac: target, event: NodeEvent::Motion { detected: true } }
    );
}

// ── kind flags ────────────────────────────────────────────────────────

#[test]
fn kind_flags_match_hardware() {
    assert!(NodeType::Circle.measures_power());
    assert!(!NodeType::Circle.is_battery_powered());
    assert!(NodeType::Sense.is_battery_powered());
    assert!(!NodeType::Sense.measures_power());
    assert!(NodeType::Stealth.is_supported());
    assert!(!NodeType::Switch.is_supported());
    assert!(!NodeType::CelsiusSed.is_supported());
    assert!(!NodeType::Unknown(42).is_supported());
}
