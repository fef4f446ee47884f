// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scan: battery-powered motion/illuminance sensor.

use std::sync::Arc;

use crate::controller::SendHandle;
use crate::events::{EventHub, NodeEvent};
use crate::protocol::{Mac, NodeType, Response};

use super::{handle_sed_message, NodeBase, NodeOps};

pub struct ScanNode {
    base: NodeBase,
}

impl ScanNode {
    pub(crate) fn new(mac: Mac, address: u8, sender: SendHandle, events: Arc<EventHub>) -> Self {
        Self { base: NodeBase::new(mac, address, NodeType::Scan, sender, events) }
    }
}

impl NodeOps for ScanNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn handle_message(&self, response: &Response) {
        if handle_sed_message(&self.base, response) {
            return;
        }
        match response {
            // Motion triggers arrive as switch-group frames.
            Response::SwitchGroup { on, group, .. } => {
                tracing::debug!(mac = %self.base.mac(), group, on, "motion report");
                self.base.mark_alive();
                self.base.emit_node_event(NodeEvent::Motion { detected: *on });
            }
            Response::NodeInfo { .. } => {
                self.base.mark_alive();
            }
            other => {
                tracing::trace!(
                    mac = %self.base.mac(),
                    command = other.command(),
                    "unhandled frame for scan"
                );
                self.base.mark_alive();
            }
        }
    }
}
