pub mod codec;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod light;
pub mod packet;
pub mod report;
pub mod session;
pub mod transport;

#[cfg(feature = "ble")]
pub mod ble;


// Re-export the main types for easy access
pub use codec::{PacketCipher, TelinkCipher};
pub use config::MeshConfig;
pub use constants::Command;
pub use device::{ConnectionState, PairingState, TelinkMesh};
pub use dispatcher::{CommandDispatcher, NoopHandler, ReportHandler};
pub use error::{ConfigError, ErrorKind, TelinkError, TransportError};
pub use identity::{DeviceIdentity, MacAddress};
pub use light::TelinkLight;
pub use report::Report;
pub use session::{DispatchState, MeshId, SessionState, VendorCode};
pub use transport::Transport;
