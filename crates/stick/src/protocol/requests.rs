// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Requests the controller can put on the wire.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::codec::{assemble, hex_u8};
use super::{CommandId, Mac};

/// Wall-clock time pushed into a Circle's internal clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// 0 = Monday, 6 = Sunday.
    pub weekday: u8,
}

impl ClockTime {
    /// Current UTC time. The mesh has no timezone concept; the host is
    /// expected to keep all plugs on the same clock.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        let day_secs = secs % 86_400;
        // The epoch fell on a Thursday.
        let weekday = ((secs / 86_400 + 3) % 7) as u8;
        Self {
            hour: (day_secs / 3_600) as u8,
            minute: (day_secs % 3_600 / 60) as u8,
            second: (day_secs % 60) as u8,
            weekday,
        }
    }

    pub(crate) fn write_wire(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&hex_u8(self.hour));
        out.extend_from_slice(&hex_u8(self.minute));
        out.extend_from_slice(&hex_u8(self.second));
        out.extend_from_slice(&hex_u8(self.weekday));
    }
}

/// Every request kind the core encodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Initialize the stick; answered by the stick itself.
    StickInit,
    /// Ask a node for its type and state.
    NodeInfo { mac: Mac },
    /// Reachability probe for mains nodes.
    NodePing { mac: Mac },
    /// Register a MAC in the coordinator's membership table.
    NodeAdd { mac: Mac, accept: bool },
    /// Remove a MAC from the coordinator's membership table.
    NodeRemove { coordinator: Mac, mac: Mac },
    /// Open or close the network for join requests.
    NodeAllowJoining { enable: bool },
    /// Read current pulse counters from a power-measuring plug.
    PowerUsage { mac: Mac },
    /// Read the calibration constants of a power-measuring plug.
    Calibration { mac: Mac },
    /// Push the host clock into a plug.
    ClockSet { mac: Mac, time: ClockTime },
    /// Read a plug's internal clock.
    ClockGet { mac: Mac },
    /// Switch a plug's relay.
    SwitchRelay { mac: Mac, on: bool },
    /// Read one slot of the coordinator's 64-entry association table.
    ScanTable { coordinator: Mac, index: u8 },
}

impl Request {
    pub fn command(&self) -> CommandId {
        match self {
            Self::StickInit => CommandId::StickInit,
            Self::NodeInfo { .. } => CommandId::NodeInfo,
            Self::NodePing { .. } => CommandId::NodePing,
            Self::NodeAdd { .. } => CommandId::NodeAdd,
            Self::NodeRemove { .. } => CommandId::NodeRemove,
            Self::NodeAllowJoining { .. } => CommandId::NodeAllowJoining,
            Self::PowerUsage { .. } => CommandId::PowerUsage,
            Self::Calibration { .. } => CommandId::Calibration,
            Self::ClockSet { .. } => CommandId::ClockSet,
            Self::ClockGet { .. } => CommandId::ClockGet,
            Self::SwitchRelay { .. } => CommandId::SwitchRelay,
            Self::ScanTable { .. } => CommandId::ScanTable,
        }
    }

    /// The node this request is about, used to update availability when
    /// the request exhausts its retries. Stick-level requests have none.
    pub fn target_mac(&self) -> Option<Mac> {
        match self {
            Self::StickInit | Self::NodeAllowJoining { .. } | Self::NodeAdd { .. } => None,
            Self::NodeInfo { mac }
            | Self::NodePing { mac }
            | Self::PowerUsage { mac }
            | Self::Calibration { mac }
            | Self::ClockSet { mac, .. }
            | Self::ClockGet { mac }
            | Self::SwitchRelay { mac, .. }
            | Self::NodeRemove { mac, .. } => Some(*mac),
            Self::ScanTable { coordinator, .. } => Some(*coordinator),
        }
    }

    /// Command id of the response that completes this request, or `None`
    /// when the stick ack is terminal (nothing further comes back).
    pub fn response_command(&self) -> Option<CommandId> {
        match self {
            Self::StickInit => Some(CommandId::StickInitResponse),
            Self::NodeInfo { .. } => Some(CommandId::NodeInfoResponse),
            Self::NodePing { .. } => Some(CommandId::NodePingResponse),
            Self::PowerUsage { .. } => Some(CommandId::PowerUsageResponse),
            Self::Calibration { .. } => Some(CommandId::CalibrationResponse),
            Self::ClockGet { .. } => Some(CommandId::ClockGetResponse),
            Self::ScanTable { .. } => Some(CommandId::ScanTableResponse),
            Self::NodeRemove { .. } => Some(CommandId::NodeRemoveResponse),
            Self::NodeAdd { .. }
            | Self::NodeAllowJoining { .. }
            | Self::ClockSet { .. }
            | Self::SwitchRelay { .. } => None,
        }
    }

    /// Encode the full wire frame under the given sequence id.
    pub fn encode(&self, seq_id: u16) -> Vec<u8> {
        let mut body = Vec::with_capacity(24);
        match self {
            Self::StickInit => {}
            Self::NodeInfo { mac }
            | Self::NodePing { mac }
            | Self::PowerUsage { mac }
            | Self::Calibration { mac }
            | Self::ClockGet { mac } => body.extend_from_slice(mac.as_bytes()),
            Self::NodeAdd { mac, accept } => {
                body.extend_from_slice(&hex_u8(u8::from(*accept)));
                body.extend_from_slice(mac.as_bytes());
            }
            Self::NodeRemove { coordinator, mac } => {
                body.extend_from_slice(coordinator.as_bytes());
                body.extend_from_slice(mac.as_bytes());
            }
            Self::NodeAllowJoining { enable } => {
                body.extend_from_slice(&hex_u8(u8::from(*enable)));
            }
            Self::ClockSet { mac, time } => {
                body.extend_from_slice(mac.as_bytes());
                time.write_wire(&mut body);
            }
            Self::SwitchRelay { mac, on } => {
                body.extend_from_slice(mac.as_bytes());
                body.extend_from_slice(&hex_u8(u8::from(*on)));
            }
            Self::ScanTable { coordinator, index } => {
                body.extend_from_slice(coordinator.as_bytes());
                body.extend_from_slice(&hex_u8(*index));
            }
        }
        assemble(self.command().as_u16(), seq_id, &body)
    }
}
