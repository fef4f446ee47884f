// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed decoding of inbound frames.
//!
//! Known commands decode into structured variants; anything with a valid
//! CRC but an unknown command id becomes [`Response::Generic`] and is
//! routed to the node object untouched.

use super::codec::{parse_hex_u16, parse_hex_u32, parse_hex_u8, MalformedFrame, RawFrame};
use super::requests::ClockTime;
use super::{CommandId, Mac, NodeType};

/// Acknowledgement codes carried by command `0000`.
///
/// `Success`/`Reject`/`MeshTimeout` terminate or advance a pending
/// request; the remaining codes report node state changes and are routed
/// to the node object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCode {
    Success,
    Reject,
    MeshTimeout,
    ClockSet,
    RelayOn,
    JoinAccepted,
    RelayOff,
    SleepConfigAccepted,
    Unknown(u16),
}

impl AckCode {
    pub fn from_u16(raw: u16) -> Self {
        match raw {
            0x00C1 => Self::Success,
            0x00C2 => Self::Reject,
            0x00E1 => Self::MeshTimeout,
            0x00D7 => Self::ClockSet,
            0x00D8 => Self::RelayOn,
            0x00D9 => Self::JoinAccepted,
            0x00DE => Self::RelayOff,
            0x00F6 => Self::SleepConfigAccepted,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Self::Success => 0x00C1,
            Self::Reject => 0x00C2,
            Self::MeshTimeout => 0x00E1,
            Self::ClockSet => 0x00D7,
            Self::RelayOn => 0x00D8,
            Self::JoinAccepted => 0x00D9,
            Self::RelayOff => 0x00DE,
            Self::SleepConfigAccepted => 0x00F6,
            Self::Unknown(other) => other,
        }
    }

    /// Codes that carry node state rather than protocol flow.
    pub fn is_state_action(self) -> bool {
        matches!(
            self,
            Self::ClockSet | Self::RelayOn | Self::RelayOff | Self::SleepConfigAccepted
        )
    }
}

/// Calibration constants of a power-measuring plug, sent as IEEE-754
/// bit patterns on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub gain_a: f32,
    pub gain_b: f32,
    pub off_total: f32,
    pub off_noise: f32,
}

/// Every inbound message the core decodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Stick-level ack for a submitted request.
    StickAck { seq_id: u16, code: AckCode },
    /// Node-level ack; state-action codes update the node object.
    NodeAck { seq_id: u16, mac: Mac, code: AckCode },
    StickInit {
        seq_id: u16,
        mac: Mac,
        network_online: bool,
        circle_plus_mac: Mac,
        network_id: u16,
    },
    NodeInfo {
        seq_id: u16,
        mac: Mac,
        relay_on: bool,
        hertz: u8,
        firmware: u32,
        node_type: NodeType,
    },
    Ping { seq_id: u16, mac: Mac, rssi_in: u8, rssi_out: u8, rtt_ms: u16 },
    PowerUsage { seq_id: u16, mac: Mac, pulse_1s: u16, pulse_8s: u16, pulse_hour: u32 },
    Calibration { seq_id: u16, mac: Mac, calibration: Calibration },
    Clock { seq_id: u16, mac: Mac, time: ClockTime },
    /// One slot of the coordinator association table; `node_mac` is
    /// `None` for an empty slot (all-`F` on the wire).
    ScanTable { seq_id: u16, mac: Mac, index: u8, node_mac: Option<Mac> },
    JoinAvailable { seq_id: u16, mac: Mac },
    NodeRemove { seq_id: u16, mac: Mac, removed_mac: Mac, ok: bool },
    Awake { seq_id: u16, mac: Mac, kind: u8 },
    SwitchGroup { seq_id: u16, mac: Mac, group: u8, on: bool },
    SenseReport { seq_id: u16, mac: Mac, humidity_raw: u16, temperature_raw: u16 },
    /// Valid frame with a command id the core does not interpret.
    Generic { seq_id: u16, command: u16, mac: Option<Mac>, payload: Vec<u8> },
}

impl Response {
    pub fn seq_id(&self) -> u16 {
        match self {
            Self::StickAck { seq_id, .. }
            | Self::NodeAck { seq_id, .. }
            | Self::StickInit { seq_id, .. }
            | Self::NodeInfo { seq_id, .. }
            | Self::Ping { seq_id, .. }
            | Self::PowerUsage { seq_id, .. }
            | Self::Calibration { seq_id, .. }
            | Self::Clock { seq_id, .. }
            | Self::ScanTable { seq_id, .. }
            | Self::JoinAvailable { seq_id, .. }
            | Self::NodeRemove { seq_id, .. }
            | Self::Awake { seq_id, .. }
            | Self::SwitchGroup { seq_id, .. }
            | Self::SenseReport { seq_id, .. }
            | Self::Generic { seq_id, .. } => *seq_id,
        }
    }

    /// The sender MAC, when the frame carries one.
    pub fn mac(&self) -> Option<Mac> {
        match self {
            Self::StickAck { .. } => None,
            Self::Generic { mac, .. } => *mac,
            Self::NodeAck { mac, .. }
            | Self::StickInit { mac, .. }
            | Self::NodeInfo { mac, .. }
            | Self::Ping { mac, .. }
            | Self::PowerUsage { mac, .. }
            | Self::Calibration { mac, .. }
            | Self::Clock { mac, .. }
            | Self::ScanTable { mac, .. }
            | Self::JoinAvailable { mac, .. }
            | Self::NodeRemove { mac, .. }
            | Self::Awake { mac, .. }
            | Self::SwitchGroup { mac, .. }
            | Self::SenseReport { mac, .. } => Some(*mac),
        }
    }

    pub fn command(&self) -> u16 {
        match self {
            Self::StickAck { .. } | Self::NodeAck { .. } => CommandId::Ack.as_u16(),
            Self::StickInit { .. } => CommandId::StickInitResponse.as_u16(),
            Self::NodeInfo { .. } => CommandId::NodeInfoResponse.as_u16(),
            Self::Ping { .. } => CommandId::NodePingResponse.as_u16(),
            Self::PowerUsage { .. } => CommandId::PowerUsageResponse.as_u16(),
            Self::Calibration { .. } => CommandId::CalibrationResponse.as_u16(),
            Self::Clock { .. } => CommandId::ClockGetResponse.as_u16(),
            Self::ScanTable { .. } => CommandId::ScanTableResponse.as_u16(),
            Self::JoinAvailable { .. } => CommandId::NodeJoinAvailable.as_u16(),
            Self::NodeRemove { .. } => CommandId::NodeRemoveResponse.as_u16(),
            Self::Awake { .. } => CommandId::NodeAwake.as_u16(),
            Self::SwitchGroup { .. } => CommandId::NodeSwitchGroup.as_u16(),
            Self::SenseReport { .. } => CommandId::SenseReport.as_u16(),
            Self::Generic { command, .. } => *command,
        }
    }

    /// Decode a validated frame into a typed response.
    pub fn decode(frame: &RawFrame) -> Result<Self, MalformedFrame> {
        let seq_id = frame.seq_id;
        let mut cursor = Cursor::new(&frame.body);

        let Some(command) = CommandId::from_u16(frame.command) else {
            // Unknown command: best-effort MAC extraction, opaque payload.
            let mac = if frame.body.len() >= 16 { Mac::from_wire(&frame.body[..16]) } else { None };
            let payload = if mac.is_some() { frame.body[16..].to_vec() } else { frame.body.clone() };
            return Ok(Self::Generic { seq_id, command: frame.command, mac, payload });
        };

        let response = match command {
            CommandId::Ack => {
                if frame.body.len() >= 20 {
                    let mac = cursor.mac()?;
                    let code = AckCode::from_u16(cursor.u16()?);
                    Self::NodeAck { seq_id, mac, code }
                } else {
                    let code = AckCode::from_u16(cursor.u16()?);
                    Self::StickAck { seq_id, code }
                }
            }
            CommandId::StickInitResponse => {
                let mac = cursor.mac()?;
                let network_online = cursor.u8()? == 1;
                let circle_plus_mac = cursor.mac()?;
                let network_id = cursor.u16()?;
                Self::StickInit { seq_id, mac, network_online, circle_plus_mac, network_id }
            }
            CommandId::NodeInfoResponse => {
                let mac = cursor.mac()?;
                let relay_on = cursor.u8()? == 1;
                let hertz = cursor.u8()?;
                let firmware = cursor.u32()?;
                let node_type = NodeType::from_u8(cursor.u8()?);
                Self::NodeInfo { seq_id, mac, relay_on, hertz, firmware, node_type }
            }
            CommandId::NodePingResponse => {
                let mac = cursor.mac()?;
                let rssi_in = cursor.u8()?;
                let rssi_out = cursor.u8()?;
                let rtt_ms = cursor.u16()?;
                Self::Ping { seq_id, mac, rssi_in, rssi_out, rtt_ms }
            }
            CommandId::PowerUsageResponse => {
                let mac = cursor.mac()?;
                let pulse_1s = cursor.u16()?;
                let pulse_8s = cursor.u16()?;
                let pulse_hour = cursor.u32()?;
                Self::PowerUsage { seq_id, mac, pulse_1s, pulse_8s, pulse_hour }
            }
            CommandId::CalibrationResponse => {
                let mac = cursor.mac()?;
                let calibration = Calibration {
                    gain_a: f32::from_bits(cursor.u32()?),
                    gain_b: f32::from_bits(cursor.u32()?),
                    off_total: f32::from_bits(cursor.u32()?),
                    off_noise: f32::from_bits(cursor.u32()?),
                };
                Self::Calibration { seq_id, mac, calibration }
            }
            CommandId::ClockGetResponse => {
                let mac = cursor.mac()?;
                let time = ClockTime {
                    hour: cursor.u8()?,
                    minute: cursor.u8()?,
                    second: cursor.u8()?,
                    weekday: cursor.u8()?,
                };
                Self::Clock { seq_id, mac, time }
            }
            CommandId::ScanTableResponse => {
                let mac = cursor.mac()?;
                let slot = cursor.take(16)?;
                let node_mac = if slot == b"FFFFFFFFFFFFFFFF" { None } else { Mac::from_wire(slot) };
                let index = cursor.u8()?;
                Self::ScanTable { seq_id, mac, index, node_mac }
            }
            CommandId::NodeJoinAvailable => {
                let mac = cursor.mac()?;
                Self::JoinAvailable { seq_id, mac }
            }
            CommandId::NodeRemoveResponse => {
                let mac = cursor.mac()?;
                let removed_mac = cursor.mac()?;
                let ok = cursor.u8()? == 1;
                Self::NodeRemove { seq_id, mac, removed_mac, ok }
            }
            CommandId::NodeAwake => {
                let mac = cursor.mac()?;
                let kind = cursor.u8()?;
                Self::Awake { seq_id, mac, kind }
            }
            CommandId::NodeSwitchGroup => {
                let mac = cursor.mac()?;
                let group = cursor.u8()?;
                let on = cursor.u8()? == 1;
                Self::SwitchGroup { seq_id, mac, group, on }
            }
            CommandId::SenseReport => {
                let mac = cursor.mac()?;
                let humidity_raw = cursor.u16()?;
                let temperature_raw = cursor.u16()?;
                Self::SenseReport { seq_id, mac, humidity_raw, temperature_raw }
            }
            // Request ids coming back at us: treat as opaque.
            _ => {
                let mac = if frame.body.len() >= 16 { Mac::from_wire(&frame.body[..16]) } else { None };
                let payload = if mac.is_some() { frame.body[16..].to_vec() } else { frame.body.clone() };
                Self::Generic { seq_id, command: frame.command, mac, payload }
            }
        };
        Ok(response)
    }
}

/// Field cursor over an ASCII frame body.
struct Cursor<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(body: &'a [u8]) -> Self {
        Self { body, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], MalformedFrame> {
        if self.pos + len > self.body.len() {
            return Err(MalformedFrame::TooShort { len: self.body.len() });
        }
        let field = &self.body[self.pos..self.pos + len];
        self.pos += len;
        Ok(field)
    }

    fn mac(&mut self) -> Result<Mac, MalformedFrame> {
        Mac::from_wire(self.take(16)?).ok_or(MalformedFrame::BadHex)
    }

    fn u8(&mut self) -> Result<u8, MalformedFrame> {
        parse_hex_u8(self.take(2)?)
    }

    fn u16(&mut self) -> Result<u16, MalformedFrame> {
        parse_hex_u16(self.take(4)?)
    }

    fn u32(&mut self) -> Result<u32, MalformedFrame> {
        parse_hex_u32(self.take(8)?)
    }
}
