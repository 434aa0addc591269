//! Per-packet encryption of 20-byte Telink packets
//!
//! Outbound command packets carry a 2-byte MAC at bytes 3-4 and are encrypted
//! from byte 5 on with a keystream seeded by the packet counter and the
//! device address. Inbound notifications are encrypted from byte 7 on with a
//! keystream seeded by their own 5-byte header.
//!
//! The byte-level transform is vendor-defined, so it sits behind
//! [`PacketCipher`] and can be swapped for a capture-verified variant.

use crate::constants::{KEY_SIZE, PACKET_SIZE};
use crate::crypto::{SessionKey, aes_reversed};
use crate::error::TelinkError;

/// Bytes of a command packet covered by MAC and keystream
const COMMAND_BODY: std::ops::Range<usize> = 5..PACKET_SIZE;

/// Bytes of a notification covered by the keystream
const NOTIFICATION_BODY: std::ops::Range<usize> = 7..PACKET_SIZE;

/// Length-check a buffer into a fixed-size packet
pub fn as_packet(bytes: &[u8]) -> Result<[u8; PACKET_SIZE], TelinkError> {
    bytes.try_into().map_err(|_| TelinkError::InvalidPacketLength {
        expected: PACKET_SIZE,
        actual: bytes.len(),
    })
}

/// Symmetric transform applied to every application-layer packet.
///
/// `reverse_address` is the device MAC in little-endian order.
pub trait PacketCipher: Send + Sync {
    /// Encrypt a host → device packet
    fn encrypt(
        &self,
        key: &SessionKey,
        reverse_address: &[u8; 6],
        packet: &[u8],
    ) -> Result<[u8; PACKET_SIZE], TelinkError>;

    /// Inverse of [`PacketCipher::encrypt`]
    fn decrypt(
        &self,
        key: &SessionKey,
        reverse_address: &[u8; 6],
        packet: &[u8],
    ) -> Result<[u8; PACKET_SIZE], TelinkError>;

    /// Decrypt a device → host notification
    fn decrypt_notification(
        &self,
        key: &SessionKey,
        reverse_address: &[u8; 6],
        packet: &[u8],
    ) -> Result<[u8; PACKET_SIZE], TelinkError>;

    /// Encrypt a notification the way a device does
    fn encrypt_notification(
        &self,
        key: &SessionKey,
        reverse_address: &[u8; 6],
        packet: &[u8],
    ) -> Result<[u8; PACKET_SIZE], TelinkError>;
}

/// The cipher used by stock Telink mesh firmware.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelinkCipher;

impl TelinkCipher {
    fn command_mac(key: &SessionKey, reverse_address: &[u8; 6], packet: &[u8; PACKET_SIZE]) -> [u8; 2] {
        let mut nonce = [0u8; KEY_SIZE];
        nonce[0..4].copy_from_slice(&reverse_address[0..4]);
        nonce[4] = 0x01;
        nonce[5..8].copy_from_slice(&packet[0..3]);
        nonce[8] = 0x0F;

        let mut auth = aes_reversed(key.as_bytes(), &nonce);
        for (a, p) in auth.iter_mut().zip(&packet[COMMAND_BODY]) {
            *a ^= p;
        }
        let mac = aes_reversed(key.as_bytes(), &auth);
        [mac[0], mac[1]]
    }

    fn command_keystream(key: &SessionKey, reverse_address: &[u8; 6], packet: &[u8; PACKET_SIZE]) -> [u8; KEY_SIZE] {
        let mut iv = [0u8; KEY_SIZE];
        iv[1..5].copy_from_slice(&reverse_address[0..4]);
        iv[5] = 0x01;
        iv[6..9].copy_from_slice(&packet[0..3]);
        aes_reversed(key.as_bytes(), &iv)
    }

    /// Involution: applying it twice gives the input back
    fn notification_transform(
        key: &SessionKey,
        reverse_address: &[u8; 6],
        packet: &[u8],
    ) -> Result<[u8; PACKET_SIZE], TelinkError> {
        let mut packet = as_packet(packet)?;
        let mut iv = [0u8; KEY_SIZE];
        iv[1..4].copy_from_slice(&reverse_address[0..3]);
        iv[4..9].copy_from_slice(&packet[0..5]);
        let keystream = aes_reversed(key.as_bytes(), &iv);
        for (p, k) in packet[NOTIFICATION_BODY].iter_mut().zip(keystream.iter()) {
            *p ^= k;
        }
        Ok(packet)
    }
}

impl PacketCipher for TelinkCipher {
    fn encrypt(
        &self,
        key: &SessionKey,
        reverse_address: &[u8; 6],
        packet: &[u8],
    ) -> Result<[u8; PACKET_SIZE], TelinkError> {
        let mut packet = as_packet(packet)?;
        let mac = Self::command_mac(key, reverse_address, &packet);
        packet[3..5].copy_from_slice(&mac);

        let keystream = Self::command_keystream(key, reverse_address, &packet);
        for (p, k) in packet[COMMAND_BODY].iter_mut().zip(keystream.iter()) {
            *p ^= k;
        }
        Ok(packet)
    }

    fn decrypt(
        &self,
        key: &SessionKey,
        reverse_address: &[u8; 6],
        packet: &[u8],
    ) -> Result<[u8; PACKET_SIZE], TelinkError> {
        let mut packet = as_packet(packet)?;
        let keystream = Self::command_keystream(key, reverse_address, &packet);
        for (p, k) in packet[COMMAND_BODY].iter_mut().zip(keystream.iter()) {
            *p ^= k;
        }

        if Self::command_mac(key, reverse_address, &packet) != packet[3..5] {
            return Err(TelinkError::AuthenticationFailed);
        }
        packet[3..5].fill(0);
        Ok(packet)
    }

    fn decrypt_notification(
        &self,
        key: &SessionKey,
        reverse_address: &[u8; 6],
        packet: &[u8],
    ) -> Result<[u8; PACKET_SIZE], TelinkError> {
        Self::notification_transform(key, reverse_address, packet)
    }

    fn encrypt_notification(
        &self,
        key: &SessionKey,
        reverse_address: &[u8; 6],
        packet: &[u8],
    ) -> Result<[u8; PACKET_SIZE], TelinkError> {
        Self::notification_transform(key, reverse_address, packet)
    }
}
