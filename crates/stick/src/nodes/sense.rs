// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sense: battery-powered temperature/humidity sensor.

use std::sync::Arc;

use crate::controller::SendHandle;
use crate::events::{EventHub, NodeEvent};
use crate::protocol::{Mac, NodeType, Response};

use super::{handle_sed_message, NodeBase, NodeOps};

pub struct SenseNode {
    base: NodeBase,
}

impl SenseNode {
    pub(crate) fn new(mac: Mac, address: u8, sender: SendHandle, events: Arc<EventHub>) -> Self {
        Self { base: NodeBase::new(mac, address, NodeType::Sense, sender, events) }
    }
}

/// Raw sensor words scale linearly; constants from the sensor datasheet.
fn temperature_celsius(raw: u16) -> f32 {
    175.72 * f32::from(raw) / 65_536.0 - 46.85
}

fn humidity_percent(raw: u16) -> f32 {
    125.0 * f32::from(raw) / 65_536.0 - 6.0
}

impl NodeOps for SenseNode {
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
            Response::SenseReport { temperature_raw, humidity_raw, .. } => {
                self.base.mark_alive();
                self.base.emit_node_event(NodeEvent::Sense {
                    temperature: temperature_celsius(*temperature_raw),
                    humidity: humidity_percent(*humidity_raw),
                });
            }
            Response::NodeInfo { .. } => {
                self.base.mark_alive();
            }
            other => {
                tracing::trace!(
                    mac = %self.base.mac(),
                    command = other.command(),
                    "unhandled frame for sense"
                );
                self.base.mark_alive();
            }
        }
    }
}
