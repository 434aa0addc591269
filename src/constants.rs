// Protocol constants for Telink mesh devices

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;
use uuid::Uuid;

/// GATT service exposing the three mesh characteristics
pub const INFO_SERVICE_UUID: Uuid = Uuid::from_u128(0x00010203_0405_0607_0809_0a0b0c0d1910);

/// Notification characteristic (device → host)
pub const NOTIFICATION_CHAR_UUID: Uuid = Uuid::from_u128(0x00010203_0405_0607_0809_0a0b0c0d1911);

/// Command characteristic (host → device)
pub const COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0x00010203_0405_0607_0809_0a0b0c0d1912);

/// Pairing characteristic (handshake exchange)
pub const PAIR_CHAR_UUID: Uuid = Uuid::from_u128(0x00010203_0405_0607_0809_0a0b0c0d1914);

/// Every application-layer packet is exactly this long
pub const PACKET_SIZE: usize = 20;

/// Maximum payload carried by a command packet
pub const MAX_PAYLOAD_SIZE: usize = 10;

/// Offset of the payload inside a command or notification packet
pub const PAYLOAD_OFFSET: usize = 10;

/// Length of name, password, combined identity and session key
pub const KEY_SIZE: usize = 16;

/// Length of each pairing nonce
pub const NONCE_SIZE: usize = 8;

/// Vendor code designating Telink
pub const TELINK_VENDOR: u16 = 0x0211;

/// Pairing request opcode (host → device)
pub const PAIR_REQUEST: u8 = 0x0C;

/// Pairing accepted opcode (device → host)
pub const PAIR_ACCEPTED: u8 = 0x0D;

/// Value written to the notification characteristic to turn notifications on
pub const ENABLE_NOTIFICATIONS: &[u8] = &[0x01];

/// Individual mesh addresses
pub const MESH_ID_DEVICE_MIN: u16 = 1;
pub const MESH_ID_DEVICE_MAX: u16 = 254;

/// Reserved block of group mesh addresses
pub const MESH_ID_GROUP_MIN: u16 = 0x8000;
pub const MESH_ID_GROUP_MAX: u16 = 0x80FF;

/// Command codes understood by Telink mesh firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Command {
    OtaUpdate = 0xC6,
    QueryOtaState = 0xC7,
    OtaStatusReport = 0xC8,
    GroupIdQuery = 0xDD,
    GroupIdReport = 0xD4,
    GroupEdit = 0xD7,
    StatusQuery = 0xDA,
    StatusReport = 0xDB,
    OnlineStatusReport = 0xDC,
    AddressEdit = 0xE0,
    AddressReport = 0xE1,
    Reset = 0xE3,
    TimeSet = 0xE4,
    TimeQuery = 0xE8,
    TimeReport = 0xE9,
    DeviceInfoQuery = 0xEA,
    DeviceInfoReport = 0xEB,
    LightOnOff = 0xF0,
    LightAttributes = 0xF1,
    LightModeLoad = 0xF2,
}

impl Command {
    /// True for codes the device sends back as notifications
    pub fn is_report(&self) -> bool {
        matches!(
            self,
            Command::OtaStatusReport
                | Command::GroupIdReport
                | Command::StatusReport
                | Command::OnlineStatusReport
                | Command::AddressReport
                | Command::TimeReport
                | Command::DeviceInfoReport
        )
    }

    /// The report a query is answered with, if any
    pub fn expected_report(&self) -> Option<Command> {
        match self {
            Command::QueryOtaState => Some(Command::OtaStatusReport),
            Command::GroupIdQuery => Some(Command::GroupIdReport),
            Command::StatusQuery => Some(Command::StatusReport),
            Command::AddressEdit => Some(Command::AddressReport),
            Command::TimeQuery => Some(Command::TimeReport),
            Command::DeviceInfoQuery => Some(Command::DeviceInfoReport),
            _ => None,
        }
    }
}
