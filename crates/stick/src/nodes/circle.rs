// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Circle and Stealth plugs: relay plus power measurement.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use crate::controller::{Priority, SendHandle};
use crate::events::{EventHub, NodeEvent};
use crate::protocol::responses::Calibration;
use crate::protocol::{AckCode, ClockTime, Mac, NodeType, Request, Response};

use super::{NodeBase, NodeOps};

/// Pulses per kilowatt-second of the Circle's metering hardware.
const PULSES_PER_KW_SECOND: f32 = 468.938_5;

#[derive(Default)]
struct CircleState {
    relay_on: Option<bool>,
    calibration: Option<Calibration>,
    /// Raw counters from the last power-usage response, kept for hosts
    /// that want pulses rather than watts.
    last_pulses: Option<(u16, u16)>,
}

pub struct CircleNode {
    base: NodeBase,
    state: StdMutex<CircleState>,
}

impl CircleNode {
    pub(crate) fn new(
        mac: Mac,
        address: u8,
        kind: NodeType,
        sender: SendHandle,
        events: Arc<EventHub>,
    ) -> Self {
        let node = Self {
            base: NodeBase::new(mac, address, kind, sender, events),
            state: StdMutex::new(CircleState::default()),
        };
        // Power readings are meaningless until the plug's calibration
        // constants are in.
        node.base
            .sender
            .submit_forget(Request::Calibration { mac }, Priority::Foreground);
        node
    }

    pub fn relay_on(&self) -> Option<bool> {
        self.state.lock().ok().and_then(|s| s.relay_on)
    }

    pub fn last_pulses(&self) -> Option<(u16, u16)> {
        self.state.lock().ok().and_then(|s| s.last_pulses)
    }

    fn set_relay(&self, on: bool) {
        let changed = {
            let Ok(mut state) = self.state.lock() else { return };
            let changed = state.relay_on != Some(on);
            state.relay_on = Some(on);
            changed
        };
        if changed {
            self.base.emit_node_event(NodeEvent::Relay { on });
        }
    }

    /// Correct a raw pulse-per-second reading through the calibration
    /// polynomial and convert to watts.
    fn pulses_to_watts(&self, pulses_per_s: f32) -> Option<f32> {
        let calibration = self.state.lock().ok().and_then(|s| s.calibration)?;
        let value = pulses_per_s + calibration.off_noise;
        let corrected =
            value * value * calibration.gain_b + value * calibration.gain_a + calibration.off_total;
        Some(corrected / PULSES_PER_KW_SECOND * 1_000.0)
    }
}

impl NodeOps for CircleNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn handle_message(&self, response: &Response) {
        match response {
            Response::Ping { rtt_ms, .. } => {
                self.base.mark_alive();
                self.base.emit_node_event(NodeEvent::Ping { rtt_ms: *rtt_ms });
            }
            Response::PowerUsage { pulse_1s, pulse_8s, .. } => {
                self.base.mark_alive();
                if let Ok(mut state) = self.state.lock() {
                    state.last_pulses = Some((*pulse_1s, *pulse_8s));
                }
                let watts_1s = self.pulses_to_watts(f32::from(*pulse_1s));
                let watts_8s = self.pulses_to_watts(f32::from(*pulse_8s) / 8.0);
                if let (Some(watts_1s), Some(watts_8s)) = (watts_1s, watts_8s) {
                    self.base.emit_node_event(NodeEvent::Power { watts_1s, watts_8s });
                }
            }
            Response::Calibration { calibration, .. } => {
                self.base.mark_alive();
                if let Ok(mut state) = self.state.lock() {
                    state.calibration = Some(*calibration);
                }
            }
            Response::NodeAck { code: AckCode::RelayOn, .. } => {
                self.base.mark_alive();
                self.set_relay(true);
            }
            Response::NodeAck { code: AckCode::RelayOff, .. } => {
                self.base.mark_alive();
                self.set_relay(false);
            }
            Response::NodeAck { code: AckCode::ClockSet, .. } => {
                self.base.mark_alive();
            }
            Response::NodeInfo { relay_on, .. } => {
                self.base.mark_alive();
                self.set_relay(*relay_on);
            }
            Response::Clock { .. } => {
                self.base.mark_alive();
            }
            other => {
                tracing::trace!(
                    mac = %self.base.mac(),
                    command = other.command(),
                    "unhandled frame for plug"
                );
                self.base.mark_alive();
            }
        }
    }

    fn update_power_usage(&self) {
        let mac = self.base.mac();
        let needs_calibration = self
            .state
            .lock()
            .map(|s| s.calibration.is_none())
            .unwrap_or(true);
        if needs_calibration {
            self.base
                .sender
                .submit_forget(Request::Calibration { mac }, Priority::Foreground);
        }
        self.base
            .sender
            .submit_forget(Request::PowerUsage { mac }, Priority::Foreground);
    }

    fn sync_clock(&self) {
        self.base.sender.submit_forget(
            Request::ClockSet { mac: self.base.mac(), time: ClockTime::now() },
            Priority::Foreground,
        );
    }

    fn switch_relay(&self, on: bool) -> bool {
        self.base
            .sender
            .submit_forget(Request::SwitchRelay { mac: self.base.mac(), on }, Priority::Foreground);
        true
    }
}
