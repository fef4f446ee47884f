// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch: the single worker that turns validated frames into pending
//! completions, registry updates, and node state changes.
//!
//! One task consumes the connection's frame channel, so frames from a
//! given MAC reach the node object in arrival order. Request responders
//! fire only after dispatch has run, so a completed `NodeInfo` request
//! implies the node is already in the registry.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use crate::controller::{Controller, Priority, Resolution, SendHandle};
use crate::events::{EventHub, StickEvent};
use crate::protocol::{Mac, NodeType, RawFrame, Request, Response};
use crate::registry::Registry;
use crate::state::NetworkState;

pub(crate) struct Router {
    frames: AsyncMutex<mpsc::UnboundedReceiver<RawFrame>>,
    exhausted: AsyncMutex<mpsc::UnboundedReceiver<Mac>>,
    controller: Arc<Controller>,
    registry: Arc<Registry>,
    network: Arc<NetworkState>,
    events: Arc<EventHub>,
    sender: SendHandle,
    cancel: CancellationToken,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        frames: mpsc::UnboundedReceiver<RawFrame>,
        exhausted: mpsc::UnboundedReceiver<Mac>,
        controller: Arc<Controller>,
        registry: Arc<Registry>,
        network: Arc<NetworkState>,
        events: Arc<EventHub>,
        sender: SendHandle,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            frames: AsyncMutex::new(frames),
            exhausted: AsyncMutex::new(exhausted),
            controller,
            registry,
            network,
            events,
            sender,
            cancel,
        })
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let router = self;
        tokio::spawn(async move {
            let mut frames = router.frames.lock().await;
            let mut exhausted = router.exhausted.lock().await;
            tracing::debug!("router started");
            loop {
                tokio::select! {
                    _ = router.cancel.cancelled() => break,
                    Some(frame) = frames.recv() => router.process_frame(frame).await,
                    Some(mac) = exhausted.recv() => router.registry.mark_unreachable(&mac).await,
                }
            }
            tracing::debug!("router stopped");
        })
    }

    async fn process_frame(&self, frame: RawFrame) {
        let response = match Response::decode(&frame) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(command = frame.command, err = %e, "dropping undecodable frame");
                return;
            }
        };

        let resolution = self.controller.resolve(&response);
        let completion = match resolution {
            Resolution::Done { completion } => {
                if let Some(completion) = completion {
                    let _ = completion.send(Ok(response));
                }
                return;
            }
            Resolution::MarkUnreachable { mac } => {
                self.registry.mark_unreachable(&mac).await;
                return;
            }
            Resolution::Dispatch { completion } => completion,
        };

        self.dispatch(&response).await;

        // The responder fires after dispatch so completed discovery
        // requests see their node in the registry.
        if let Some(completion) = completion {
            let _ = completion.send(Ok(response));
        }
    }

    async fn dispatch(&self, response: &Response) {
        match response {
            Response::StickInit { mac, network_online, circle_plus_mac, network_id, .. } => {
                self.network
                    .record_init(*mac, *network_online, *circle_plus_mac, *network_id);
                tracing::info!(
                    mac = %mac,
                    online = network_online,
                    "stick initialized"
                );
            }
            Response::NodeInfo { mac, node_type, .. } => {
                self.handle_node_info(*mac, *node_type, response).await;
            }
            Response::JoinAvailable { mac, .. } => {
                self.handle_join_available(*mac).await;
            }
            Response::NodeRemove { removed_mac, ok, .. } => {
                self.handle_node_remove(*removed_mac, *ok).await;
            }
            other => {
                if let Some(mac) = other.mac() {
                    self.deliver(mac, other).await;
                }
            }
        }
    }

    /// Node-info responses both complete discovery and carry node state.
    async fn handle_node_info(&self, mac: Mac, node_type: NodeType, response: &Response) {
        if let Some(node) = self.registry.node(&mac).await {
            node.handle_message(response);
            return;
        }
        if self.registry.is_known(&mac).await {
            // Recorded as unsupported; nothing to update.
            return;
        }

        tracing::debug!(mac = %mac, node_type = node_type.as_u8(), "node info from unknown node");
        if node_type == NodeType::CirclePlus {
            self.network.mark_circle_plus_discovered();
        }
        let node = self.registry.insert_from_info(mac, node_type, &self.sender).await;

        if let Some(node) = node {
            node.handle_message(response);
        }
        // Replay frames that arrived before the node had a type, in
        // arrival order. Unsupported types drop their backlog.
        for parked in self.registry.take_parked(&mac) {
            self.deliver(mac, &parked).await;
        }
    }

    async fn handle_join_available(&self, mac: Mac) {
        if self.registry.node(&mac).await.is_some() {
            tracing::debug!(mac = %mac, "join request from already joined node");
            return;
        }
        let policy = self.network.join_policy();
        if policy.auto_accept {
            tracing::info!(mac = %mac, "auto-accepting join request");
            self.sender
                .submit_forget(Request::NodeAdd { mac, accept: true }, Priority::Foreground);
            self.registry.note_info_request(&mac, true);
        } else {
            tracing::debug!(mac = %mac, joining_enabled = policy.enabled, "join request deferred to host");
            self.events.emit(StickEvent::JoinRequest { mac });
        }
    }

    async fn handle_node_remove(&self, removed_mac: Mac, ok: bool) {
        if !ok {
            tracing::warn!(mac = %removed_mac, "node failed to unjoin");
            return;
        }
        if self.registry.evict(&removed_mac).await {
            tracing::info!(mac = %removed_mac, "node unjoined and evicted");
        } else {
            tracing::debug!(mac = %removed_mac, "unjoin confirmation for unknown node");
        }
    }

    /// Hand a frame to its node object; park it and schedule discovery
    /// when the sender is unknown.
    async fn deliver(&self, mac: Mac, response: &Response) {
        if let Some(node) = self.registry.node(&mac).await {
            node.handle_message(response);
            return;
        }
        if self.registry.is_known(&mac).await {
            tracing::trace!(mac = %mac, "frame for unsupported node dropped");
            return;
        }

        tracing::info!(mac = %mac, command = response.command(), "parking frame from undiscovered node");
        self.registry.park(response.clone());
        if self.registry.note_info_request(&mac, false) {
            self.sender
                .submit_forget(Request::NodeInfo { mac }, Priority::Foreground);
        }
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod router_tests;
