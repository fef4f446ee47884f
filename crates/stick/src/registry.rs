// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node registry: every MAC the controller has positively identified,
//! plus the bookkeeping for the ones it has not.
//!
//! A `None` slot records a known-but-unsupported node type so it is not
//! rediscovered on every frame. Frames from senders that are not in the
//! registry at all are parked in arrival order and replayed once the
//! node-info response names a type.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use tokio::sync::RwLock;

use crate::controller::SendHandle;
use crate::events::{EventHub, StickEvent};
use crate::nodes::circle::CircleNode;
use crate::nodes::circle_plus::CirclePlusNode;
use crate::nodes::scan::ScanNode;
use crate::nodes::sense::SenseNode;
use crate::nodes::NodeOps;
use crate::protocol::{Mac, NodeType, Response};

/// Timestamps of node-info attempts for a MAC that has not answered yet.
/// Expected to stay populated for sleepy nodes until their next wake.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DiscoveryAttempts {
    pub first_request: Option<Instant>,
    pub last_request: Option<Instant>,
}

pub(crate) struct Registry {
    nodes: RwLock<HashMap<Mac, Option<Arc<dyn NodeOps>>>>,
    coordinator: StdMutex<Option<Arc<CirclePlusNode>>>,
    not_discovered: StdMutex<HashMap<Mac, DiscoveryAttempts>>,
    /// Membership table from the last scan: MAC to coordinator slot.
    to_discover: StdMutex<HashMap<Mac, u8>>,
    parked: StdMutex<VecDeque<Response>>,
    events: Arc<EventHub>,
}

impl Registry {
    pub fn new(events: Arc<EventHub>) -> Arc<Self> {
        Arc::new(Self {
            nodes: RwLock::new(HashMap::new()),
            coordinator: StdMutex::new(None),
            not_discovered: StdMutex::new(HashMap::new()),
            to_discover: StdMutex::new(HashMap::new()),
            parked: StdMutex::new(VecDeque::new()),
            events,
        })
    }

    pub async fn node(&self, mac: &Mac) -> Option<Arc<dyn NodeOps>> {
        self.nodes.read().await.get(mac).cloned().flatten()
    }

    /// Known means present in the registry, supported or not.
    pub async fn is_known(&self, mac: &Mac) -> bool {
        self.nodes.read().await.contains_key(mac)
    }

    /// MACs of discovered, supported nodes.
    pub async fn discovered_macs(&self) -> Vec<Mac> {
        let mut macs: Vec<Mac> = self
            .nodes
            .read()
            .await
            .iter()
            .filter_map(|(mac, slot)| slot.is_some().then_some(*mac))
            .collect();
        macs.sort();
        macs
    }

    pub async fn supported_nodes(&self) -> Vec<Arc<dyn NodeOps>> {
        self.nodes.read().await.values().flatten().cloned().collect()
    }

    pub fn coordinator(&self) -> Option<Arc<CirclePlusNode>> {
        self.coordinator.lock().ok().and_then(|c| c.clone())
    }

    /// Construct the node object named by a node-info response. Returns
    /// the node for frame delivery, or `None` for unsupported types
    /// (recorded so they are not rediscovered).
    pub async fn insert_from_info(
        &self,
        mac: Mac,
        node_type: NodeType,
        sender: &SendHandle,
    ) -> Option<Arc<dyn NodeOps>> {
        let address = self.address_for(&mac);
        let node: Option<Arc<dyn NodeOps>> = match node_type {
            NodeType::CirclePlus => {
                let coordinator =
                    Arc::new(CirclePlusNode::new(mac, sender.clone(), Arc::clone(&self.events)));
                if let Ok(mut slot) = self.coordinator.lock() {
                    *slot = Some(Arc::clone(&coordinator));
                }
                Some(coordinator)
            }
            NodeType::Circle | NodeType::Stealth => Some(Arc::new(CircleNode::new(
                mac,
                address,
                node_type,
                sender.clone(),
                Arc::clone(&self.events),
            ))),
            NodeType::Scan => {
                Some(Arc::new(ScanNode::new(mac, address, sender.clone(), Arc::clone(&self.events))))
            }
            NodeType::Sense => {
                Some(Arc::new(SenseNode::new(mac, address, sender.clone(), Arc::clone(&self.events))))
            }
            NodeType::Switch | NodeType::CelsiusSed | NodeType::CelsiusNr | NodeType::Unknown(_) => {
                tracing::warn!(mac = %mac, node_type = node_type.as_u8(), "unsupported node type");
                None
            }
        };

        self.nodes.write().await.insert(mac, node.clone());
        self.forget_undiscovered(&mac);

        if let Some(ref node) = node {
            if node.base().kind() != NodeType::CirclePlus {
                self.events.emit(StickEvent::NodeDiscovered { mac });
            }
            tracing::info!(mac = %mac, node_type = node_type.as_u8(), "node discovered");
        }
        node
    }

    pub async fn evict(&self, mac: &Mac) -> bool {
        let removed = self.nodes.write().await.remove(mac).is_some();
        if removed {
            self.events.emit(StickEvent::NodeRemoved { mac: *mac });
        }
        removed
    }

    /// An exhausted or mesh-rejected request: flip availability for
    /// mains nodes. SED availability is inferred from heartbeats only.
    pub async fn mark_unreachable(&self, mac: &Mac) {
        if let Some(node) = self.node(mac).await {
            if !node.base().battery_powered() {
                node.base().mark_unavailable();
            }
        }
    }

    // -- Discovery bookkeeping -------------------------------------------------

    pub fn set_to_discover(&self, members: &HashMap<Mac, u8>) {
        if let Ok(mut slot) = self.to_discover.lock() {
            *slot = members.clone();
        }
    }

    fn address_for(&self, mac: &Mac) -> u8 {
        self.to_discover.lock().ok().and_then(|t| t.get(mac).copied()).unwrap_or(0)
    }

    /// Record an info-request attempt. Returns false when the MAC has
    /// already been asked twice and the caller is not forcing another
    /// round, mirroring how sleepy nodes are left for their next wake.
    pub fn note_info_request(&self, mac: &Mac, force: bool) -> bool {
        let Ok(mut not_discovered) = self.not_discovered.lock() else { return false };
        let attempts = not_discovered.entry(*mac).or_default();
        if attempts.first_request.is_some() && attempts.last_request.is_some() && !force {
            return false;
        }
        let now = Instant::now();
        if attempts.first_request.is_none() {
            attempts.first_request = Some(now);
        } else {
            attempts.last_request = Some(now);
        }
        true
    }

    pub fn forget_undiscovered(&self, mac: &Mac) {
        if let Ok(mut not_discovered) = self.not_discovered.lock() {
            not_discovered.remove(mac);
        }
    }

    pub fn undiscovered_macs(&self) -> Vec<Mac> {
        self.not_discovered
            .lock()
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    // -- Parked frames ---------------------------------------------------------

    /// Hold a frame whose sender is not registered yet.
    pub fn park(&self, response: Response) {
        if let Ok(mut parked) = self.parked.lock() {
            parked.push_back(response);
        }
    }

    /// Drain parked frames for a newly registered MAC, in arrival order.
    pub fn take_parked(&self, mac: &Mac) -> Vec<Response> {
        let Ok(mut parked) = self.parked.lock() else { return Vec::new() };
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(parked.len());
        for response in parked.drain(..) {
            if response.mac() == Some(*mac) {
                taken.push(response);
            } else {
                kept.push_back(response);
            }
        }
        *parked = kept;
        taken
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod registry_tests;
