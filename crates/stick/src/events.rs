// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host-facing event hub.
//!
//! Everything the mesh reports asynchronously fans out through one
//! broadcast channel; subscribers filter for the variants they care
//! about. Lagging subscribers lose oldest events, never block workers.

use tokio::sync::broadcast;

use crate::protocol::Mac;

/// Events delivered to host subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StickEvent {
    /// A node was positively identified and added to the registry.
    NodeDiscovered { mac: Mac },
    /// An unknown node asks to join and auto-accept is off; the host
    /// decides (typically by calling `node_join`).
    JoinRequest { mac: Mac },
    /// A node was unjoined and evicted from the registry.
    NodeRemoved { mac: Mac },
    /// A node's availability flipped.
    Availability { mac: Mac, available: bool },
    /// A per-node measurement or state change.
    Node { mac: Mac, event: NodeEvent },
}

/// Per-node happenings, carried inside [`StickEvent::Node`].
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Relay { on: bool },
    Power { watts_1s: f32, watts_8s: f32 },
    Ping { rtt_ms: u16 },
    Motion { detected: bool },
    Sense { temperature: f32, humidity: f32 },
    /// SED heartbeat.
    Awake,
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Fan-out hub for [`StickEvent`].
pub struct EventHub {
    tx: broadcast::Sender<StickEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StickEvent> {
        self.tx.subscribe()
    }

    /// Emit to all current subscribers; dropped silently when nobody
    /// listens.
    pub fn emit(&self, event: StickEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}
