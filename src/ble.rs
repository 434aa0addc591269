//! btleplug-backed [`Transport`]
//!
//! Scans on the first Bluetooth adapter until the target address shows up,
//! then talks GATT to it. Notifications from the peripheral are forwarded
//! into an mpsc channel by a background task.

use crate::error::TransportError;
use crate::identity::MacAddress;
use crate::transport::Transport;
use btleplug::api::{BDAddr, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures_lite::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);
const NOTIFICATION_QUEUE: usize = 32;

#[derive(Debug, Clone)]
pub struct BleTransport {
    adapter: Adapter,
    scan_timeout: Duration,
}

impl BleTransport {
    /// Use the first adapter the platform reports
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await.map_err(connection_failed)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(connection_failed)?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::ConnectionFailed("No Bluetooth adapter found".to_string()))?;
        Ok(Self::with_adapter(adapter))
    }

    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }

    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.scan_timeout = scan_timeout;
        self
    }

    async fn find_peripheral(&self, address: BDAddr) -> Result<Peripheral, TransportError> {
        let deadline = Instant::now() + self.scan_timeout;
        loop {
            for peripheral in self.adapter.peripherals().await.map_err(connection_failed)? {
                if peripheral.address() == address {
                    return Ok(peripheral);
                }
            }
            if Instant::now() >= deadline {
                return Err(TransportError::ConnectionFailed(format!("{address} not found")));
            }
            sleep(SCAN_POLL_INTERVAL).await;
        }
    }
}

impl Transport for BleTransport {
    type Handle = Peripheral;
    type Characteristic = Characteristic;

    async fn discover_and_connect(&self, address: &MacAddress) -> Result<Peripheral, TransportError> {
        let address = BDAddr::from(address.bytes());
        info!(%address, "Scanning...");
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(connection_failed)?;
        let found = self.find_peripheral(address).await;
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {e}");
        }
        let peripheral = found?;

        peripheral.connect().await.map_err(connection_failed)?;
        if let Err(e) = peripheral.discover_services().await {
            let _ = peripheral.disconnect().await;
            return Err(connection_failed(e));
        }
        debug!(%address, services = peripheral.services().len(), "Services discovered");
        Ok(peripheral)
    }

    async fn resolve_characteristic(&self, handle: &Peripheral, uuid: Uuid) -> Result<Characteristic, TransportError> {
        handle
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }

    async fn write(
        &self,
        handle: &Peripheral,
        characteristic: &Characteristic,
        data: &[u8],
    ) -> Result<(), TransportError> {
        handle
            .write(characteristic, data, WriteType::WithResponse)
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    async fn read(&self, handle: &Peripheral, characteristic: &Characteristic) -> Result<Bytes, TransportError> {
        handle
            .read(characteristic)
            .await
            .map(Bytes::from)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))
    }

    async fn subscribe(
        &self,
        handle: &Peripheral,
        characteristic: &Characteristic,
    ) -> Result<mpsc::Receiver<Bytes>, TransportError> {
        let subscribe_failed = |e: btleplug::Error| TransportError::SubscribeFailed(e.to_string());
        handle.subscribe(characteristic).await.map_err(subscribe_failed)?;
        let mut stream = handle.notifications().await.map_err(subscribe_failed)?;

        let uuid = characteristic.uuid;
        let (tx, rx) = mpsc::channel(NOTIFICATION_QUEUE);
        tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != uuid {
                    continue;
                }
                if tx.send(Bytes::from(notification.value)).await.is_err() {
                    break;
                }
            }
            debug!(%uuid, "Notification forwarding stopped");
        });
        Ok(rx)
    }

    async fn disconnect(&self, handle: &Peripheral) -> Result<(), TransportError> {
        handle.disconnect().await.map_err(connection_failed)
    }

    async fn is_connected(&self, handle: &Peripheral) -> bool {
        handle.is_connected().await.unwrap_or(false)
    }
}

fn connection_failed(e: btleplug::Error) -> TransportError {
    TransportError::ConnectionFailed(e.to_string())
}
