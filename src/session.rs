use crate::codec::PacketCipher;
use crate::constants::{
    Command, KEY_SIZE, MAX_PAYLOAD_SIZE, MESH_ID_DEVICE_MAX, MESH_ID_DEVICE_MIN, MESH_ID_GROUP_MAX, MESH_ID_GROUP_MIN,
    NONCE_SIZE, PACKET_SIZE, TELINK_VENDOR,
};
use crate::crypto::{self, SessionKey};
use crate::error::TelinkError;
use crate::identity::{DeviceIdentity, MacAddress};
use crate::packet::{CommandPacket, PacketCounter};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// 16-bit protocol vendor code written into every packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VendorCode(pub u16);

impl Default for VendorCode {
    fn default() -> Self {
        VendorCode(TELINK_VENDOR)
    }
}

impl fmt::Display for VendorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// A mesh address accepted by the address-edit command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(u16);

impl MeshId {
    /// 1-254 addresses a single device, 0x8000-0x80ff a group
    pub fn new(value: u32) -> Result<Self, TelinkError> {
        let in_range = |min: u16, max: u16| (u32::from(min)..=u32::from(max)).contains(&value);
        if in_range(MESH_ID_DEVICE_MIN, MESH_ID_DEVICE_MAX) || in_range(MESH_ID_GROUP_MIN, MESH_ID_GROUP_MAX) {
            Ok(MeshId(value as u16))
        } else {
            Err(TelinkError::InvalidMeshId(value))
        }
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    pub fn is_group(&self) -> bool {
        self.0 >= MESH_ID_GROUP_MIN
    }

    pub fn to_le_bytes(&self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

/// Whether a query is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchState {
    #[default]
    Idle,
    /// Waiting for a report with this command code
    AwaitingResponse(Command),
}

/// Everything mutable about one device session.
///
/// Shared between the command path and the notification path behind a
/// single mutex (see [`lock`]).
#[derive(Debug)]
pub struct SessionState {
    identity: DeviceIdentity,
    vendor: VendorCode,
    mesh_id: u16,
    counter: PacketCounter,
    key: Option<SessionKey>,
    groups: BTreeSet<u8>,
    dispatch: DispatchState,
}

impl SessionState {
    pub fn new(identity: DeviceIdentity, vendor: VendorCode) -> Self {
        Self {
            identity,
            vendor,
            mesh_id: 0,
            counter: PacketCounter::new(),
            key: None,
            groups: BTreeSet::new(),
            dispatch: DispatchState::Idle,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// The key is bound to the address, so the address is fixed while one is held
    pub fn set_address(&mut self, address: MacAddress) -> Result<(), TelinkError> {
        if self.key.is_some() {
            return Err(TelinkError::AlreadyConnected);
        }
        self.identity.set_address(address);
        Ok(())
    }

    pub fn vendor(&self) -> VendorCode {
        self.vendor
    }

    pub fn set_vendor(&mut self, vendor: VendorCode) {
        self.vendor = vendor;
    }

    /// Mesh address of the connected node, 0 while unknown
    pub fn mesh_id(&self) -> u16 {
        self.mesh_id
    }

    pub(crate) fn set_reported_mesh_id(&mut self, mesh_id: u16) {
        self.mesh_id = mesh_id;
    }

    /// Counter value the next packet will carry
    pub fn packet_counter(&self) -> u16 {
        self.counter.value()
    }

    pub fn key(&self) -> Option<&SessionKey> {
        self.key.as_ref()
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub fn set_key(&mut self, key: SessionKey) {
        self.key = Some(key);
    }

    pub fn groups(&self) -> &BTreeSet<u8> {
        &self.groups
    }

    pub(crate) fn replace_groups(&mut self, groups: impl IntoIterator<Item = u8>) {
        self.groups = groups.into_iter().collect();
    }

    pub fn dispatch_state(&self) -> DispatchState {
        self.dispatch
    }

    /// Mark `report` as the answer being waited for
    pub fn await_report(&mut self, report: Command) {
        self.dispatch = DispatchState::AwaitingResponse(report);
    }

    /// Back to idle if `report` is the one being waited for
    pub(crate) fn settle(&mut self, report: Command) {
        if self.dispatch == DispatchState::AwaitingResponse(report) {
            self.dispatch = DispatchState::Idle;
        }
    }

    pub fn combine_identity(&self) -> [u8; KEY_SIZE] {
        crypto::combine_identity(&self.identity)
    }

    pub fn encrypt_identity(&self, key: &[u8]) -> Result<[u8; KEY_SIZE], TelinkError> {
        crypto::encrypt_identity(&self.identity, key)
    }

    /// Derive and store the shared key, replacing any previous one
    pub fn derive_shared_key(&mut self, nonce_a: &[u8; NONCE_SIZE], nonce_b: &[u8; NONCE_SIZE]) -> &SessionKey {
        self.key.insert(crypto::derive_shared_key(&self.identity, nonce_a, nonce_b))
    }

    /// Assemble and encrypt a command packet.
    ///
    /// The counter only moves when the packet is actually produced, and it
    /// stays moved whatever happens to the bytes afterwards.
    pub fn build_packet(
        &mut self,
        cipher: &dyn PacketCipher,
        command: Command,
        payload: &[u8],
    ) -> Result<[u8; PACKET_SIZE], TelinkError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TelinkError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let Some(key) = self.key.as_ref() else {
            return Err(TelinkError::NoSessionKey);
        };

        let counter = self.counter.advance();
        let packet = CommandPacket::new(counter, command, self.mesh_id, self.vendor.0, payload)?;
        let plaintext = packet.to_bytes();
        debug!(%command, counter, plaintext = %hex::encode(plaintext), "Building packet");
        cipher.encrypt(key, &self.identity.reverse_address(), &plaintext)
    }

    pub fn encrypt_packet(&self, cipher: &dyn PacketCipher, plaintext: &[u8]) -> Result<[u8; PACKET_SIZE], TelinkError> {
        let key = self.key.as_ref().ok_or(TelinkError::NoSessionKey)?;
        cipher.encrypt(key, &self.identity.reverse_address(), plaintext)
    }

    pub fn decrypt_packet(&self, cipher: &dyn PacketCipher, ciphertext: &[u8]) -> Result<[u8; PACKET_SIZE], TelinkError> {
        let key = self.key.as_ref().ok_or(TelinkError::NoSessionKey)?;
        cipher.decrypt(key, &self.identity.reverse_address(), ciphertext)
    }

    pub fn decrypt_notification(
        &self,
        cipher: &dyn PacketCipher,
        ciphertext: &[u8],
    ) -> Result<[u8; PACKET_SIZE], TelinkError> {
        let key = self.key.as_ref().ok_or(TelinkError::NoSessionKey)?;
        cipher.decrypt_notification(key, &self.identity.reverse_address(), ciphertext)
    }

    /// Fresh state for a new connection: counter 1, mesh ID unknown, no key
    pub fn reset(&mut self) {
        self.counter.reset();
        self.mesh_id = 0;
        self.key = None;
        self.groups.clear();
        self.dispatch = DispatchState::Idle;
    }

    /// Snapshot left behind by a disconnect: key gone, nothing outstanding
    pub fn end(&mut self) {
        self.key = None;
        self.dispatch = DispatchState::Idle;
    }
}

/// Lock the session, recovering from a poisoned mutex since the state is plain data
pub fn lock(session: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TelinkCipher;

    fn session() -> SessionState {
        let identity = DeviceIdentity::parse("A4:C1:38:00:11:22", "dev", "pass1234").unwrap();
        SessionState::new(identity, VendorCode::default())
    }

    #[test]
    fn test_mesh_id_bounds() {
        for rejected in [0, 255, 0x7FFF, 0x8100, 0x1_0001] {
            assert!(matches!(MeshId::new(rejected), Err(TelinkError::InvalidMeshId(v)) if v == rejected));
        }
        for accepted in [1, 254, 0x8000, 0x80FF] {
            assert_eq!(MeshId::new(accepted).unwrap().value() as u32, accepted);
        }
        assert!(MeshId::new(0x8001).unwrap().is_group());
        assert!(!MeshId::new(7).unwrap().is_group());
    }

    #[test]
    fn test_build_without_key_fails_and_keeps_counter() {
        let mut session = session();
        let result = session.build_packet(&TelinkCipher, Command::TimeQuery, &[0x10]);
        assert!(matches!(result, Err(TelinkError::NoSessionKey)));
        assert_eq!(session.packet_counter(), 1);
    }

    #[test]
    fn test_oversized_payload_keeps_counter() {
        let mut session = session();
        session.derive_shared_key(&[0; 8], &[1; 8]);
        let result = session.build_packet(&TelinkCipher, Command::TimeSet, &[0; 11]);
        assert!(matches!(result, Err(TelinkError::PayloadTooLarge { .. })));
        assert_eq!(session.packet_counter(), 1);
    }

    #[test]
    fn test_derive_overwrites_previous_key() {
        let mut session = session();
        let first = session.derive_shared_key(&[0; 8], &[1; 8]).clone();
        let second = session.derive_shared_key(&[2; 8], &[3; 8]).clone();
        assert_ne!(first, second);
        assert_eq!(session.key(), Some(&second));
    }

    #[test]
    fn test_reset_and_end() {
        let mut session = session();
        session.derive_shared_key(&[0; 8], &[1; 8]);
        session.build_packet(&TelinkCipher, Command::TimeQuery, &[0x10]).unwrap();
        session.set_reported_mesh_id(12);
        session.replace_groups([1, 2]);
        session.await_report(Command::TimeReport);

        session.end();
        assert!(!session.has_key());
        assert_eq!(session.dispatch_state(), DispatchState::Idle);
        assert_eq!(session.packet_counter(), 2);
        assert_eq!(session.mesh_id(), 12);

        session.reset();
        assert_eq!(session.packet_counter(), 1);
        assert_eq!(session.mesh_id(), 0);
        assert!(session.groups().is_empty());
    }

    #[test]
    fn test_address_locked_while_keyed() {
        let mut session = session();
        let other: MacAddress = "11:22:33:44:55:66".parse().unwrap();
        session.derive_shared_key(&[0; 8], &[1; 8]);
        assert!(matches!(session.set_address(other), Err(TelinkError::AlreadyConnected)));
        assert_eq!(session.identity().reverse_address(), [0x22, 0x11, 0x00, 0x38, 0xC1, 0xA4]);

        session.end();
        session.set_address(other).unwrap();
        assert_eq!(session.identity().address(), other);
    }

    #[test]
    fn test_settle_only_matching_report() {
        let mut session = session();
        session.await_report(Command::TimeReport);
        session.settle(Command::AddressReport);
        assert_eq!(session.dispatch_state(), DispatchState::AwaitingResponse(Command::TimeReport));
        session.settle(Command::TimeReport);
        assert_eq!(session.dispatch_state(), DispatchState::Idle);
    }
}
