//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#![allow(dead_code, unused_imports)]

pub use bytes::Bytes;
pub use hex;
pub use telink_rs::constants::{
    COMMAND_CHAR_UUID, NOTIFICATION_CHAR_UUID, PACKET_SIZE, PAIR_ACCEPTED, PAIR_CHAR_UUID, TELINK_VENDOR,
};
pub use telink_rs::report::Report;
pub use telink_rs::{
    Command, DeviceIdentity, MacAddress, ReportHandler, SessionState, TelinkError, TelinkMesh, Transport,
    TransportError,
};

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use telink_rs::codec::{PacketCipher, TelinkCipher};
use telink_rs::crypto::{self, SessionKey};
use telink_rs::packet::{CommandPacket, Notification};
use telink_rs::report::{
    AddressReport, DeviceInfoReport, GroupIdReport, OnlineStatusReport, OtaStatusReport, StatusReport, TimeReport,
};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

pub const ADDRESS: &str = "A4:C1:38:12:34:56";
pub const NAME: &str = "dev";
pub const PASSWORD: &str = "pass1234";

/// nonce_b the mock device answers the pairing request with
pub const DEVICE_NONCE: [u8; 8] = [0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F];

/// Decode hex string to bytes for testing
pub fn hex_to_bytes(hex_data: &str) -> Bytes {
    Bytes::from(hex::decode(hex_data.replace(' ', "")).expect("Failed to decode hex"))
}

pub fn identity() -> DeviceIdentity {
    DeviceIdentity::parse(ADDRESS, NAME, PASSWORD).expect("Failed to parse address")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockHandle(u32);

#[derive(Debug, Default)]
struct MockState {
    writes: Vec<(Uuid, Vec<u8>)>,
    pair_response: Option<Vec<u8>>,
    notify_tx: Option<mpsc::Sender<Bytes>>,
    connected: bool,
    connects: u32,
    disconnects: u32,
    fail_connect: bool,
    fail_command_writes: bool,
    missing_characteristic: Option<Uuid>,
}

/// In-memory stand-in for a Telink peripheral.
///
/// Records every write, answers the pairing read and lets the test push
/// notification values. Clones share state, so the test keeps one while the
/// mesh owns another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    pub fn set_pair_response(&self, response: &[u8]) {
        self.state().pair_response = Some(response.to_vec());
    }

    pub fn fail_connect(&self) {
        self.state().fail_connect = true;
    }

    pub fn fail_command_writes(&self, fail: bool) {
        self.state().fail_command_writes = fail;
    }

    pub fn hide_characteristic(&self, uuid: Uuid) {
        self.state().missing_characteristic = Some(uuid);
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.state().writes.clone()
    }

    pub fn writes_to(&self, uuid: Uuid) -> Vec<Vec<u8>> {
        self.state()
            .writes
            .iter()
            .filter(|(target, _)| *target == uuid)
            .map(|(_, data)| data.clone())
            .collect()
    }

    pub fn disconnects(&self) -> u32 {
        self.state().disconnects
    }

    /// Key the device side derived, recovered from the recorded pair request
    pub fn session_key(&self) -> SessionKey {
        let request = self
            .writes_to(PAIR_CHAR_UUID)
            .pop()
            .expect("no pair request was written");
        let nonce_a: [u8; 8] = request[1..9].try_into().unwrap();
        crypto::derive_shared_key(&identity(), &nonce_a, &DEVICE_NONCE)
    }

    /// Encrypt a notification as the device would and deliver it
    pub async fn notify(&self, notification: Notification) {
        let sealed = TelinkCipher
            .encrypt_notification(&self.session_key(), &identity().reverse_address(), &notification.to_bytes())
            .expect("Failed to encrypt notification");
        self.notify_raw(&sealed).await;
    }

    pub async fn notify_raw(&self, value: &[u8]) {
        let tx = self.state().notify_tx.clone().expect("nobody subscribed");
        tx.send(Bytes::copy_from_slice(value)).await.expect("notification channel closed");
    }

    /// Decrypt every command packet written so far
    pub fn sent_packets(&self) -> Vec<CommandPacket> {
        let key = self.session_key();
        self.writes_to(COMMAND_CHAR_UUID)
            .iter()
            .map(|packet| {
                let plaintext = TelinkCipher
                    .decrypt(&key, &identity().reverse_address(), packet)
                    .expect("Failed to decrypt packet");
                CommandPacket::try_from(&plaintext[..]).expect("Failed to parse packet")
            })
            .collect()
    }
}

impl Transport for MockTransport {
    type Handle = MockHandle;
    type Characteristic = Uuid;

    async fn discover_and_connect(&self, address: &MacAddress) -> Result<MockHandle, TransportError> {
        let mut state = self.state();
        if state.fail_connect {
            return Err(TransportError::ConnectionFailed(format!("{address} not found")));
        }
        state.connected = true;
        state.connects += 1;
        Ok(MockHandle(state.connects))
    }

    async fn resolve_characteristic(&self, _handle: &MockHandle, uuid: Uuid) -> Result<Uuid, TransportError> {
        if self.state().missing_characteristic == Some(uuid) {
            return Err(TransportError::CharacteristicNotFound(uuid));
        }
        Ok(uuid)
    }

    async fn write(&self, _handle: &MockHandle, characteristic: &Uuid, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.writes.push((*characteristic, data.to_vec()));
        if state.fail_command_writes && *characteristic == COMMAND_CHAR_UUID {
            return Err(TransportError::WriteFailed("link busy".to_string()));
        }
        Ok(())
    }

    async fn read(&self, _handle: &MockHandle, characteristic: &Uuid) -> Result<Bytes, TransportError> {
        let state = self.state();
        if *characteristic != PAIR_CHAR_UUID {
            return Err(TransportError::ReadFailed("not readable".to_string()));
        }
        let response = state.pair_response.clone().unwrap_or_else(|| {
            let mut response = vec![PAIR_ACCEPTED];
            response.extend_from_slice(&DEVICE_NONCE);
            response.extend_from_slice(&[0; 8]);
            response
        });
        Ok(Bytes::from(response))
    }

    async fn subscribe(&self, _handle: &MockHandle, _characteristic: &Uuid) -> Result<mpsc::Receiver<Bytes>, TransportError> {
        let (tx, rx) = mpsc::channel(16);
        self.state().notify_tx = Some(tx);
        Ok(rx)
    }

    async fn disconnect(&self, _handle: &MockHandle) -> Result<(), TransportError> {
        let mut state = self.state();
        state.connected = false;
        state.disconnects += 1;
        state.notify_tx = None;
        Ok(())
    }

    async fn is_connected(&self, _handle: &MockHandle) -> bool {
        self.state().connected
    }
}

/// Plaintext notification from node `source`
pub fn notification(source: u16, command: Command, data: [u8; 10]) -> Notification {
    Notification {
        sequence: 0x000102,
        source,
        command: command.into(),
        vendor: TELINK_VENDOR,
        data,
    }
}

/// Wait for the next report, failing the test after a second
pub async fn next_report(reports: &mut broadcast::Receiver<Report>) -> Report {
    tokio::time::timeout(Duration::from_secs(1), reports.recv())
        .await
        .expect("timed out waiting for report")
        .expect("report channel closed")
}

/// Handler that keeps every report it is given
#[derive(Debug, Default)]
pub struct RecordingHandler {
    reports: Mutex<Vec<Report>>,
}

impl RecordingHandler {
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }

    fn record(&self, report: Report) {
        self.reports.lock().unwrap().push(report);
    }
}

impl ReportHandler for RecordingHandler {
    fn on_time_report(&self, report: &TimeReport) {
        self.record(Report::Time(*report));
    }

    fn on_address_report(&self, report: &AddressReport) {
        self.record(Report::Address(*report));
    }

    fn on_device_info_report(&self, report: &DeviceInfoReport) {
        self.record(Report::DeviceInfo(report.clone()));
    }

    fn on_group_id_report(&self, report: &GroupIdReport) {
        self.record(Report::GroupId(report.clone()));
    }

    fn on_online_status_report(&self, report: &OnlineStatusReport) {
        self.record(Report::OnlineStatus(*report));
    }

    fn on_status_report(&self, report: &StatusReport) {
        self.record(Report::Status(*report));
    }

    fn on_ota_status_report(&self, report: &OtaStatusReport) {
        self.record(Report::OtaStatus(*report));
    }
}

/// Connected mesh over a fresh mock, plus the mock for inspection
pub async fn connected_mesh() -> (TelinkMesh<MockTransport>, MockTransport) {
    let transport = MockTransport::new();
    let mut mesh = TelinkMesh::new(transport.clone(), identity());
    mesh.connect().await.expect("Failed to connect");
    (mesh, transport)
}
