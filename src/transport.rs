use crate::error::TransportError;
use crate::identity::MacAddress;
use bytes::Bytes;
use std::future::Future;
use tokio::sync::mpsc;
use uuid::Uuid;

/// The Bluetooth LE link a [`TelinkMesh`](crate::TelinkMesh) drives.
///
/// Implementations own discovery, GATT access and the notification stream.
/// Nothing here knows about Telink packets: everything written or read is
/// opaque bytes.
pub trait Transport: Send + Sync + 'static {
    /// An established connection to one peripheral
    type Handle: Send + Sync + 'static;
    /// A resolved GATT characteristic on that connection
    type Characteristic: Clone + Send + Sync + 'static;

    fn discover_and_connect(
        &self,
        address: &MacAddress,
    ) -> impl Future<Output = Result<Self::Handle, TransportError>> + Send;

    fn resolve_characteristic(
        &self,
        handle: &Self::Handle,
        uuid: Uuid,
    ) -> impl Future<Output = Result<Self::Characteristic, TransportError>> + Send;

    fn write(
        &self,
        handle: &Self::Handle,
        characteristic: &Self::Characteristic,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn read(
        &self,
        handle: &Self::Handle,
        characteristic: &Self::Characteristic,
    ) -> impl Future<Output = Result<Bytes, TransportError>> + Send;

    /// Start notifications; each value arrives on the returned channel.
    /// The channel closes when the link goes away.
    fn subscribe(
        &self,
        handle: &Self::Handle,
        characteristic: &Self::Characteristic,
    ) -> impl Future<Output = Result<mpsc::Receiver<Bytes>, TransportError>> + Send;

    fn disconnect(&self, handle: &Self::Handle) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn is_connected(&self, handle: &Self::Handle) -> impl Future<Output = bool> + Send;
}
