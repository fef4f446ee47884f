// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-node objects.
//!
//! Each supported node kind implements [`NodeOps`]; operations that make
//! no sense for a kind (pinging a battery node, reading power from a
//! sensor) fall through to default implementations that do nothing.

pub mod circle;
pub mod circle_plus;
pub mod scan;
pub mod sense;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use crate::controller::{Priority, SendHandle};
use crate::events::{EventHub, NodeEvent, StickEvent};
use crate::protocol::{Mac, NodeType, Request, Response};

/// Grace added to a SED's maintenance interval before it is considered
/// out of touch.
pub(crate) const SED_GRACE: Duration = Duration::from_secs(60);

/// Default wake schedule for sleepy end devices.
pub(crate) const SED_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// State common to every node kind.
pub struct NodeBase {
    mac: Mac,
    /// Slot in the coordinator membership table; 0 for the coordinator.
    address: u8,
    kind: NodeType,
    battery_powered: bool,
    measures_power: bool,
    maintenance_interval: StdMutex<Duration>,
    available: AtomicBool,
    last_update: StdMutex<Instant>,
    pub(crate) sender: SendHandle,
    pub(crate) events: Arc<EventHub>,
}

impl NodeBase {
    pub(crate) fn new(
        mac: Mac,
        address: u8,
        kind: NodeType,
        sender: SendHandle,
        events: Arc<EventHub>,
    ) -> Self {
        Self {
            mac,
            address,
            kind,
            battery_powered: kind.is_battery_powered(),
            measures_power: kind.measures_power(),
            maintenance_interval: StdMutex::new(SED_MAINTENANCE_INTERVAL),
            available: AtomicBool::new(false),
            last_update: StdMutex::new(Instant::now()),
            sender,
            events,
        }
    }

    pub fn mac(&self) -> Mac {
        self.mac
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn kind(&self) -> NodeType {
        self.kind
    }

    pub fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn battery_powered(&self) -> bool {
        self.battery_powered
    }

    pub fn measures_power(&self) -> bool {
        self.measures_power
    }

    pub fn maintenance_interval(&self) -> Duration {
        self.maintenance_interval
            .lock()
            .map(|i| *i)
            .unwrap_or(SED_MAINTENANCE_INTERVAL)
    }

    /// Override the expected wake schedule when the host knows a SED's
    /// configured sleep settings.
    pub fn set_maintenance_interval(&self, interval: Duration) {
        if let Ok(mut slot) = self.maintenance_interval.lock() {
            *slot = interval;
        }
    }

    pub fn last_update(&self) -> Instant {
        self.last_update.lock().map(|t| *t).unwrap_or_else(|_| Instant::now())
    }

    /// Any successful inbound frame proves the node is alive.
    pub(crate) fn mark_alive(&self) {
        if let Ok(mut last) = self.last_update.lock() {
            *last = Instant::now();
        }
        if !self.available.swap(true, Ordering::SeqCst) {
            self.events
                .emit(StickEvent::Availability { mac: self.mac, available: true });
        }
    }

    pub(crate) fn mark_unavailable(&self) {
        if self.available.swap(false, Ordering::SeqCst) {
            self.events
                .emit(StickEvent::Availability { mac: self.mac, available: false });
        }
    }

    /// SED heartbeat check used by the updater.
    pub(crate) fn heartbeat_expired(&self, now: Instant) -> bool {
        self.battery_powered
            && self.available()
            && heartbeat_overdue(self.last_update(), self.maintenance_interval(), now)
    }

    pub(crate) fn emit_node_event(&self, event: NodeEvent) {
        self.events.emit(StickEvent::Node { mac: self.mac, event });
    }
}

/// A SED last seen at `last` is overdue once `maintenance_interval`
/// plus the grace minute has passed.
pub(crate) fn heartbeat_overdue(last: Instant, interval: Duration, now: Instant) -> bool {
    now.saturating_duration_since(last) > interval + SED_GRACE
}

/// Operations every node object supports; irrelevant ones default to
/// no-ops.
pub trait NodeOps: Send + Sync {
    fn base(&self) -> &NodeBase;

    /// Downcast hook for kind-specific state (relay, readings).
    fn as_any(&self) -> &dyn std::any::Any;

    /// Consume a frame dispatched to this node, update state, notify
    /// subscribers.
    fn handle_message(&self, response: &Response);

    /// Reachability probe. Meaningless for battery nodes, which are
    /// never probed; their availability is inferred from heartbeats.
    fn request_ping(&self) {
        let base = self.base();
        if base.battery_powered() {
            return;
        }
        base.sender
            .submit_forget(Request::NodePing { mac: base.mac() }, Priority::Foreground);
    }

    /// Read current power draw; only power-measuring plugs respond.
    fn update_power_usage(&self) {}

    /// Push the host clock into the node; only power-measuring plugs
    /// keep a clock.
    fn sync_clock(&self) {}

    /// Drive the relay; only plugs have one. Returns false when the
    /// node kind does not support it.
    fn switch_relay(&self, _on: bool) -> bool {
        false
    }
}

/// SED frames common to Scan and Sense: the awake notification is the
/// heartbeat that keeps availability alive.
pub(crate) fn handle_sed_message(base: &NodeBase, response: &Response) -> bool {
    match response {
        Response::Awake { kind, .. } => {
            tracing::debug!(mac = %base.mac(), kind, "sed awake");
            base.mark_alive();
            base.emit_node_event(NodeEvent::Awake);
            true
        }
        Response::NodeAck { code, .. } if *code == crate::protocol::AckCode::SleepConfigAccepted => {
            base.mark_alive();
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod nodes_tests;
