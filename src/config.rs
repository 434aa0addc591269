use crate::constants::TELINK_VENDOR;
use crate::error::{ConfigError, TelinkError};
use crate::identity::DeviceIdentity;
use crate::session::VendorCode;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_vendor() -> u16 {
    TELINK_VENDOR
}

/// Credentials and addressing for one mesh node.
///
/// ```json
/// { "address": "A4:C1:38:00:11:22", "name": "telink_mesh1", "password": "123" }
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshConfig {
    pub address: String,
    pub name: String,
    pub password: String,
    #[serde(default = "default_vendor")]
    pub vendor: u16,
}

impl MeshConfig {
    pub fn new(address: impl Into<String>, name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            password: password.into(),
            vendor: TELINK_VENDOR,
        }
    }

    pub fn with_vendor(mut self, vendor: u16) -> Self {
        self.vendor = vendor;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn vendor(&self) -> VendorCode {
        VendorCode(self.vendor)
    }

    /// Fails with `InvalidAddress` if the address string is malformed
    pub fn identity(&self) -> Result<DeviceIdentity, TelinkError> {
        DeviceIdentity::parse(&self.address, self.name.clone(), self.password.clone())
    }
}

impl std::fmt::Debug for MeshConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshConfig")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .field("vendor", &format_args!("{:#06x}", self.vendor))
            .finish()
    }
}
