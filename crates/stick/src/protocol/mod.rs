// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol for the Plugwise USB stick: command-id table, frame
//! codec, request encoding, and response decoding.
//!
//! Everything here is pure — no I/O, no shared state. The serial layer
//! feeds raw frames in and takes encoded bytes out.

pub mod codec;
pub mod mac;
pub mod requests;
pub mod responses;

pub use codec::{crc16, Framer, MalformedFrame, RawFrame};
pub use mac::Mac;
pub use requests::{ClockTime, Request};
pub use responses::{AckCode, Response};

/// Command identifiers understood by the stick firmware.
///
/// This table is the compatibility contract: the hex discriminants must
/// match the firmware, the symbolic names are ours.
///
/// | id   | direction | message                                    |
/// |------|-----------|--------------------------------------------|
/// | 0000 | in        | ack (stick-level, or node-level with MAC)  |
/// | 0006 | in        | node join available                        |
/// | 0007 | out       | node add (join)                            |
/// | 0008 | out       | node allow joining                         |
/// | 000A | out       | stick init request                         |
/// | 0011 | in        | stick init response                        |
/// | 000D | out       | node ping request                          |
/// | 000E | in        | node ping response                         |
/// | 0012 | out       | circle power usage request                 |
/// | 0013 | in        | circle power usage response                |
/// | 0016 | out       | circle clock set request                   |
/// | 0017 | out       | circle switch relay request                |
/// | 0018 | out       | circle+ association table request          |
/// | 0019 | in        | circle+ association table response         |
/// | 001C | out       | node remove (unjoin) request               |
/// | 001D | in        | node remove response                       |
/// | 0023 | out       | node info request                          |
/// | 0024 | in        | node info response                         |
/// | 0026 | out       | circle calibration request                 |
/// | 0027 | in        | circle calibration response                |
/// | 003E | out       | circle clock get request                   |
/// | 003F | in        | circle clock get response                  |
/// | 004F | in        | node awake notification (SED heartbeat)    |
/// | 0056 | in        | node switch group                          |
/// | 0105 | in        | sense report (temperature/humidity)        |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandId {
    Ack = 0x0000,
    NodeJoinAvailable = 0x0006,
    NodeAdd = 0x0007,
    NodeAllowJoining = 0x0008,
    StickInit = 0x000A,
    StickInitResponse = 0x0011,
    NodePing = 0x000D,
    NodePingResponse = 0x000E,
    PowerUsage = 0x0012,
    PowerUsageResponse = 0x0013,
    ClockSet = 0x0016,
    SwitchRelay = 0x0017,
    ScanTable = 0x0018,
    ScanTableResponse = 0x0019,
    NodeRemove = 0x001C,
    NodeRemoveResponse = 0x001D,
    NodeInfo = 0x0023,
    NodeInfoResponse = 0x0024,
    Calibration = 0x0026,
    CalibrationResponse = 0x0027,
    ClockGet = 0x003E,
    ClockGetResponse = 0x003F,
    NodeAwake = 0x004F,
    NodeSwitchGroup = 0x0056,
    SenseReport = 0x0105,
}

impl CommandId {
    pub fn from_u16(raw: u16) -> Option<Self> {
        Some(match raw {
            0x0000 => Self::Ack,
            0x0006 => Self::NodeJoinAvailable,
            0x0007 => Self::NodeAdd,
            0x0008 => Self::NodeAllowJoining,
            0x000A => Self::StickInit,
            0x0011 => Self::StickInitResponse,
            0x000D => Self::NodePing,
            0x000E => Self::NodePingResponse,
            0x0012 => Self::PowerUsage,
            0x0013 => Self::PowerUsageResponse,
            0x0016 => Self::ClockSet,
            0x0017 => Self::SwitchRelay,
            0x0018 => Self::ScanTable,
            0x0019 => Self::ScanTableResponse,
            0x001C => Self::NodeRemove,
            0x001D => Self::NodeRemoveResponse,
            0x0023 => Self::NodeInfo,
            0x0024 => Self::NodeInfoResponse,
            0x0026 => Self::Calibration,
            0x0027 => Self::CalibrationResponse,
            0x003E => Self::ClockGet,
            0x003F => Self::ClockGetResponse,
            0x004F => Self::NodeAwake,
            0x0056 => Self::NodeSwitchGroup,
            0x0105 => Self::SenseReport,
            _ => return None,
        })
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Node type enumerants reported in the node-info response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    CirclePlus,
    Circle,
    Switch,
    Sense,
    Scan,
    CelsiusSed,
    CelsiusNr,
    Stealth,
    Unknown(u8),
}

impl NodeType {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::CirclePlus,
            2 => Self::Circle,
            3 => Self::Switch,
            5 => Self::Sense,
            6 => Self::Scan,
            7 => Self::CelsiusSed,
            8 => Self::CelsiusNr,
            9 => Self::Stealth,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::CirclePlus => 1,
            Self::Circle => 2,
            Self::Switch => 3,
            Self::Sense => 5,
            Self::Scan => 6,
            Self::CelsiusSed => 7,
            Self::CelsiusNr => 8,
            Self::Stealth => 9,
            Self::Unknown(other) => other,
        }
    }

    /// Types the registry instantiates. Unsupported types are recorded
    /// as empty slots so they are not rediscovered.
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            Self::CirclePlus | Self::Circle | Self::Sense | Self::Scan | Self::Stealth
        )
    }

    /// Sleepy end devices wake on a maintenance schedule and cannot be
    /// probed.
    pub fn is_battery_powered(self) -> bool {
        matches!(self, Self::Sense | Self::Scan | Self::CelsiusSed)
    }

    /// Mains plugs carry power-measurement hardware.
    pub fn measures_power(self) -> bool {
        matches!(self, Self::CirclePlus | Self::Circle | Self::Stealth)
    }
}
