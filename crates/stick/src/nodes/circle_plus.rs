// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The coordinator: a Circle that also holds the network's membership
//! table.

use std::collections::HashMap;
use std::sync::Arc;

use crate::controller::{Priority, SendHandle};
use crate::error::RequestError;
use crate::events::EventHub;
use crate::protocol::{Mac, NodeType, Request, Response};

use super::circle::CircleNode;
use super::{NodeBase, NodeOps};

/// Slots in the coordinator association table.
const ASSOCIATION_SLOTS: u8 = 64;

pub struct CirclePlusNode {
    inner: CircleNode,
}

impl CirclePlusNode {
    pub(crate) fn new(mac: Mac, sender: SendHandle, events: Arc<EventHub>) -> Self {
        Self { inner: CircleNode::new(mac, 0, NodeType::CirclePlus, sender, events) }
    }

    /// Read the association table slot by slot and return the
    /// membership map `{mac: slot}`. Empty slots are skipped.
    pub async fn scan_for_nodes(&self) -> Result<HashMap<Mac, u8>, RequestError> {
        let coordinator = self.inner.base().mac();
        let mut members = HashMap::new();
        for index in 0..ASSOCIATION_SLOTS {
            let outcome = self
                .inner
                .base()
                .sender
                .submit(Request::ScanTable { coordinator, index }, Priority::Foreground);
            match outcome.await {
                Ok(Ok(Response::ScanTable { node_mac: Some(mac), .. })) => {
                    members.insert(mac, index);
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(RequestError::Cancelled),
            }
        }
        tracing::debug!(members = members.len(), "membership scan finished");
        Ok(members)
    }
}

impl NodeOps for CirclePlusNode {
    fn base(&self) -> &NodeBase {
        self.inner.base()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn handle_message(&self, response: &Response) {
        self.inner.handle_message(response);
    }

    fn update_power_usage(&self) {
        self.inner.update_power_usage();
    }

    fn sync_clock(&self) {
        self.inner.sync_clock();
    }

    fn switch_relay(&self, on: bool) -> bool {
        self.inner.switch_relay(on)
    }
}
