use crate::codec::{PacketCipher, TelinkCipher};
use crate::config::MeshConfig;
use crate::constants::{COMMAND_CHAR_UUID, Command, ENABLE_NOTIFICATIONS, NOTIFICATION_CHAR_UUID, PAIR_CHAR_UUID};
use crate::crypto;
use crate::dispatcher::{CommandDispatcher, NoopHandler, ReportHandler};
use crate::error::TelinkError;
use crate::identity::{DeviceIdentity, MacAddress};
use crate::report::Report;
use crate::session::{self, DispatchState, MeshId, SessionState, VendorCode};
use crate::transport::Transport;
use bytes::Bytes;
use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Payload asking a device for its mesh address instead of changing it
const QUERY_MESH_ID: [u8; 2] = [0xFF, 0xFF];

/// Generic "report please" payload for queries
const QUERY: [u8; 1] = [0x10];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingState {
    #[default]
    Unpaired,
    Pairing,
    Paired,
}

struct Characteristics<C> {
    notification: C,
    command: C,
    pair: C,
}

struct Link<T: Transport> {
    handle: T::Handle,
    characteristics: Characteristics<T::Characteristic>,
    pump: JoinHandle<()>,
}

/// A Telink mesh node reached over a Bluetooth LE transport.
///
/// Owns the connection lifecycle and the pairing handshake, and turns mesh
/// commands into encrypted packets. Reports coming back are dispatched to the
/// [`ReportHandler`] and to [`TelinkMesh::subscribe_reports`] receivers.
pub struct TelinkMesh<T: Transport> {
    transport: Arc<T>,
    session: Arc<Mutex<SessionState>>,
    cipher: Arc<dyn PacketCipher>,
    dispatcher: CommandDispatcher,
    link: Option<Link<T>>,
    connection: ConnectionState,
    pairing: PairingState,
}

impl<T: Transport> TelinkMesh<T> {
    pub fn new(transport: T, identity: DeviceIdentity) -> Self {
        Self::with_cipher(
            transport,
            identity,
            VendorCode::default(),
            Arc::new(TelinkCipher),
            Arc::new(NoopHandler),
        )
    }

    /// Build from a loaded configuration file
    pub fn with_config(
        transport: T,
        config: &MeshConfig,
        handler: Arc<dyn ReportHandler>,
    ) -> Result<Self, TelinkError> {
        Ok(Self::with_cipher(
            transport,
            config.identity()?,
            config.vendor(),
            Arc::new(TelinkCipher),
            handler,
        ))
    }

    pub fn with_handler(transport: T, identity: DeviceIdentity, handler: Arc<dyn ReportHandler>) -> Self {
        Self::with_cipher(transport, identity, VendorCode::default(), Arc::new(TelinkCipher), handler)
    }

    /// Full constructor, for firmware that needs a different per-packet cipher
    pub fn with_cipher(
        transport: T,
        identity: DeviceIdentity,
        vendor: VendorCode,
        cipher: Arc<dyn PacketCipher>,
        handler: Arc<dyn ReportHandler>,
    ) -> Self {
        let session = Arc::new(Mutex::new(SessionState::new(identity, vendor)));
        let dispatcher = CommandDispatcher::new(session.clone(), cipher.clone(), handler);
        Self {
            transport: Arc::new(transport),
            session,
            cipher,
            dispatcher,
            link: None,
            connection: ConnectionState::Disconnected,
            pairing: PairingState::Unpaired,
        }
    }

    /// Connect, pair and start listening for notifications.
    ///
    /// On any failure the link is torn down again and the error returned.
    pub async fn connect(&mut self) -> Result<(), TelinkError> {
        if self.link.is_some() {
            return Err(TelinkError::AlreadyConnected);
        }

        let address = {
            let mut state = session::lock(&self.session);
            state.reset();
            state.identity().address()
        };
        self.connection = ConnectionState::Connecting;
        info!(%address, "Connecting...");

        let handle = match self.transport.discover_and_connect(&address).await {
            Ok(handle) => handle,
            Err(e) => {
                self.connection = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };

        match self.establish(&handle).await {
            Ok((characteristics, pump)) => {
                self.link = Some(Link {
                    handle,
                    characteristics,
                    pump,
                });
                self.connection = ConnectionState::Connected;
                info!(%address, "Connected and paired");
                Ok(())
            }
            Err(e) => {
                warn!(%address, "Connection setup failed: {e}");
                if let Err(e) = self.transport.disconnect(&handle).await {
                    warn!("Disconnect after failed setup also failed: {e}");
                }
                session::lock(&self.session).end();
                self.connection = ConnectionState::Disconnected;
                self.pairing = PairingState::Unpaired;
                Err(e)
            }
        }
    }

    async fn establish(
        &mut self,
        handle: &T::Handle,
    ) -> Result<(Characteristics<T::Characteristic>, JoinHandle<()>), TelinkError> {
        let characteristics = Characteristics {
            notification: self.transport.resolve_characteristic(handle, NOTIFICATION_CHAR_UUID).await?,
            command: self.transport.resolve_characteristic(handle, COMMAND_CHAR_UUID).await?,
            pair: self.transport.resolve_characteristic(handle, PAIR_CHAR_UUID).await?,
        };

        self.pair(handle, &characteristics.pair).await?;

        let notifications = self.transport.subscribe(handle, &characteristics.notification).await?;
        let pump = self.spawn_notification_pump(notifications);
        if let Err(e) = self
            .transport
            .write(handle, &characteristics.notification, ENABLE_NOTIFICATIONS)
            .await
        {
            pump.abort();
            return Err(e.into());
        }
        Ok((characteristics, pump))
    }

    async fn pair(&mut self, handle: &T::Handle, characteristic: &T::Characteristic) -> Result<(), TelinkError> {
        self.pairing = PairingState::Pairing;
        let nonce_a = crypto::random_nonce();
        let request = crypto::build_pair_request(session::lock(&self.session).identity(), &nonce_a)?;

        debug!(request = %hex::encode(request), "Sending pair request");
        self.transport.write(handle, characteristic, &request).await?;
        let response = self.transport.read(handle, characteristic).await?;
        debug!(response = %hex::encode(&response), "Pair response");

        let nonce_b = crypto::parse_pair_response(&response)?;
        session::lock(&self.session).derive_shared_key(&nonce_a, &nonce_b);
        self.pairing = PairingState::Paired;
        info!("Pairing complete");
        Ok(())
    }

    fn spawn_notification_pump(&self, mut notifications: mpsc::Receiver<Bytes>) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            while let Some(value) = notifications.recv().await {
                dispatcher.on_notification(&value);
            }
            debug!("Notification stream closed");
        })
    }

    /// Drop the link and the session key. Safe to call when not connected.
    pub async fn disconnect(&mut self) -> Result<(), TelinkError> {
        self.connection = ConnectionState::Disconnected;
        self.pairing = PairingState::Unpaired;
        let Some(link) = self.link.take() else {
            return Ok(());
        };

        link.pump.abort();
        session::lock(&self.session).end();
        let result = self.transport.disconnect(&link.handle).await;
        info!("Disconnected");
        result.map_err(TelinkError::from)
    }

    pub async fn is_connected(&self) -> bool {
        match &self.link {
            Some(link) => self.transport.is_connected(&link.handle).await,
            None => false,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn pairing_state(&self) -> PairingState {
        self.pairing
    }

    /// Build, encrypt and write one command packet.
    ///
    /// The packet counter advances as soon as the packet is built, so a
    /// failed write followed by a retry never reuses a counter value.
    pub async fn send_packet(&self, command: Command, payload: &[u8]) -> Result<(), TelinkError> {
        let packet = {
            let mut state = session::lock(&self.session);
            let packet = state.build_packet(self.cipher.as_ref(), command, payload)?;
            if let Some(report) = command.expected_report() {
                state.await_report(report);
            }
            packet
        };

        let link = self.link.as_ref().ok_or(TelinkError::NotConnected)?;
        debug!(%command, packet = %hex::encode(packet), "Sending packet");
        self.transport
            .write(&link.handle, &link.characteristics.command, &packet)
            .await?;
        Ok(())
    }

    pub async fn query_mesh_id(&self) -> Result<(), TelinkError> {
        self.send_packet(Command::AddressEdit, &QUERY_MESH_ID).await
    }

    /// Ask the node to take a new mesh address.
    ///
    /// The local mesh ID only changes once the node confirms with an address report.
    pub async fn set_mesh_id(&self, mesh_id: u32) -> Result<(), TelinkError> {
        let mesh_id = MeshId::new(mesh_id)?;
        self.send_packet(Command::AddressEdit, &mesh_id.to_le_bytes()).await
    }

    pub async fn query_groups(&self) -> Result<(), TelinkError> {
        self.send_packet(Command::GroupIdQuery, &[0x0A, 0x01]).await
    }

    pub async fn add_group(&self, group_id: u8) -> Result<(), TelinkError> {
        self.send_packet(Command::GroupEdit, &[0x01, group_id, 0x00]).await
    }

    pub async fn delete_group(&self, group_id: u8) -> Result<(), TelinkError> {
        self.send_packet(Command::GroupEdit, &[0x00, group_id, 0x00]).await
    }

    pub async fn query_time(&self) -> Result<(), TelinkError> {
        self.send_packet(Command::TimeQuery, &QUERY).await
    }

    /// Set the node clock to local time
    pub async fn set_time(&self) -> Result<(), TelinkError> {
        self.set_time_to(Local::now().naive_local()).await
    }

    pub async fn set_time_to(&self, datetime: NaiveDateTime) -> Result<(), TelinkError> {
        let [year_lo, year_hi] = (datetime.year().clamp(0, i32::from(u16::MAX)) as u16).to_le_bytes();
        let payload = [
            year_lo,
            year_hi,
            datetime.month() as u8,
            datetime.day() as u8,
            datetime.hour() as u8,
            datetime.minute() as u8,
            datetime.second() as u8,
        ];
        self.send_packet(Command::TimeSet, &payload).await
    }

    pub async fn query_device_info(&self) -> Result<(), TelinkError> {
        self.send_packet(Command::DeviceInfoQuery, &QUERY).await
    }

    pub async fn query_device_version(&self) -> Result<(), TelinkError> {
        self.send_packet(Command::DeviceInfoQuery, &[0x10, 0x02]).await
    }

    /// Factory-reset the node
    pub async fn reset(&self) -> Result<(), TelinkError> {
        self.send_packet(Command::Reset, &[]).await
    }

    pub async fn query_ota_state(&self) -> Result<(), TelinkError> {
        self.send_packet(Command::QueryOtaState, &QUERY).await
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<Report> {
        self.dispatcher.subscribe()
    }

    pub fn identity(&self) -> DeviceIdentity {
        session::lock(&self.session).identity().clone()
    }

    /// Retarget to another node before the next connect.
    ///
    /// Fails with `AlreadyConnected` while a link is up.
    pub fn set_address(&self, address: MacAddress) -> Result<(), TelinkError> {
        if self.link.is_some() {
            return Err(TelinkError::AlreadyConnected);
        }
        session::lock(&self.session).set_address(address)
    }

    pub fn vendor(&self) -> VendorCode {
        session::lock(&self.session).vendor()
    }

    pub fn mesh_id(&self) -> u16 {
        session::lock(&self.session).mesh_id()
    }

    pub fn groups(&self) -> Vec<u8> {
        session::lock(&self.session).groups().iter().copied().collect()
    }

    pub fn packet_counter(&self) -> u16 {
        session::lock(&self.session).packet_counter()
    }

    pub fn dispatch_state(&self) -> DispatchState {
        session::lock(&self.session).dispatch_state()
    }
}

impl<T: Transport> Drop for TelinkMesh<T> {
    fn drop(&mut self) {
        if let Some(link) = &self.link {
            link.pump.abort();
        }
    }
}

impl<T: Transport> std::fmt::Debug for TelinkMesh<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelinkMesh")
            .field("session", &self.session)
            .field("connection", &self.connection)
            .field("pairing", &self.pairing)
            .finish_non_exhaustive()
    }
}
