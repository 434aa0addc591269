use crate::constants::{Command, MAX_PAYLOAD_SIZE, PACKET_SIZE};
use crate::error::TelinkError;
use bytes::Bytes;
use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Plaintext layout of a host → device command packet.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct CommandFrame {
    pub counter: U16,      // Packet counter, starts at 1
    pub reserved: u8,      // Always 0
    pub mac: [u8; 2],      // Filled in by encryption
    pub destination: U16,  // Mesh or group address, 0 = connected node
    pub command: u8,       // Command code
    pub vendor: U16,       // Vendor code
    pub payload: [u8; MAX_PAYLOAD_SIZE],
}

/// Decrypted layout of a device → host notification.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct NotificationFrame {
    pub sequence: [u8; 3],
    pub source: U16, // Mesh address of the reporting node
    pub mac: [u8; 2],
    pub command: u8,
    pub vendor: U16,
    pub data: [u8; MAX_PAYLOAD_SIZE],
}

/// Per-session sequence number stamped on every outbound packet.
///
/// Runs from 1 to 0xFFFF then wraps back to 1; 0 is never sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketCounter(u16);

impl PacketCounter {
    pub fn new() -> Self {
        Self(1)
    }

    /// Value the next packet will carry
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Take the current value and move on to the next one
    pub fn advance(&mut self) -> u16 {
        let current = self.0;
        self.0 = if current == u16::MAX { 1 } else { current + 1 };
        current
    }

    pub fn reset(&mut self) {
        self.0 = 1;
    }
}

impl Default for PacketCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Logical command packet before encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    pub counter: u16,
    pub command: Command,
    pub destination: u16,
    pub vendor: u16,
    pub payload: Bytes,
}

impl CommandPacket {
    pub fn new(
        counter: u16,
        command: Command,
        destination: u16,
        vendor: u16,
        payload: &[u8],
    ) -> Result<Self, TelinkError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TelinkError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self {
            counter,
            command,
            destination,
            vendor,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    /// Serialize to the fixed 20-byte plaintext, zero-padding the payload
    pub fn to_bytes(&self) -> [u8; PACKET_SIZE] {
        let mut payload = [0u8; MAX_PAYLOAD_SIZE];
        payload[..self.payload.len()].copy_from_slice(&self.payload);
        let frame = CommandFrame {
            counter: U16::new(self.counter),
            reserved: 0,
            mac: [0; 2],
            destination: U16::new(self.destination),
            command: self.command.into(),
            vendor: U16::new(self.vendor),
            payload,
        };
        let mut out = [0u8; PACKET_SIZE];
        out.copy_from_slice(frame.as_bytes());
        out
    }
}

impl TryFrom<&[u8]> for CommandPacket {
    type Error = TelinkError;

    /// Parse a decrypted command packet. The payload keeps all 10 bytes,
    /// padding included, since the wire form does not carry its length.
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let frame = CommandFrame::ref_from_bytes(bytes).map_err(|_| TelinkError::InvalidPacketLength {
            expected: PACKET_SIZE,
            actual: bytes.len(),
        })?;
        let command = Command::try_from(frame.command).map_err(|_| TelinkError::UnknownCommand(frame.command))?;
        Ok(Self {
            counter: frame.counter.get(),
            command,
            destination: frame.destination.get(),
            vendor: frame.vendor.get(),
            payload: Bytes::copy_from_slice(&frame.payload),
        })
    }
}

/// A decrypted notification with its header fields split out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub sequence: u32,
    pub source: u16,
    /// Raw command byte; may be a code this crate does not know
    pub command: u8,
    pub vendor: u16,
    pub data: [u8; MAX_PAYLOAD_SIZE],
}

impl Notification {
    pub fn parse(bytes: &[u8]) -> Result<Self, TelinkError> {
        let frame = NotificationFrame::ref_from_bytes(bytes).map_err(|_| TelinkError::InvalidPacketLength {
            expected: PACKET_SIZE,
            actual: bytes.len(),
        })?;
        let [s0, s1, s2] = frame.sequence;
        Ok(Self {
            sequence: u32::from_le_bytes([s0, s1, s2, 0]),
            source: frame.source.get(),
            command: frame.command,
            vendor: frame.vendor.get(),
            data: frame.data,
        })
    }

    /// Recognized command code, if any
    pub fn command(&self) -> Option<Command> {
        Command::try_from(self.command).ok()
    }

    /// Build the plaintext of a notification, as a device would before encrypting it
    pub fn to_bytes(&self) -> [u8; PACKET_SIZE] {
        let [s0, s1, s2, _] = self.sequence.to_le_bytes();
        let frame = NotificationFrame {
            sequence: [s0, s1, s2],
            source: U16::new(self.source),
            mac: [0; 2],
            command: self.command,
            vendor: U16::new(self.vendor),
            data: self.data,
        };
        let mut out = [0u8; PACKET_SIZE];
        out.copy_from_slice(frame.as_bytes());
        out
    }
}
