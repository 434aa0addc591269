use crate::constants::KEY_SIZE;
use crate::error::TelinkError;
use std::fmt;
use std::str::FromStr;

/// 6-byte Bluetooth MAC address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }

    /// Address in little-endian byte order, as used in cipher nonces
    pub fn reversed(&self) -> [u8; 6] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }
}

impl FromStr for MacAddress {
    type Err = TelinkError;

    /// Parses the canonical `AA:BB:CC:DD:EE:FF` form (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TelinkError::InvalidAddress(s.to_string());
        let mut bytes = [0u8; 6];
        let mut parts = s.trim().split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(MacAddress(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Who we talk to and how we prove it.
///
/// `reverse_address` is kept private and recomputed on every address change,
/// so it always mirrors `address`.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    address: MacAddress,
    reverse_address: [u8; 6],
    name: String,
    password: String,
}

impl DeviceIdentity {
    pub fn new(address: MacAddress, name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            address,
            reverse_address: address.reversed(),
            name: name.into(),
            password: password.into(),
        }
    }

    /// Build from the colon-hex address string
    pub fn parse(address: &str, name: impl Into<String>, password: impl Into<String>) -> Result<Self, TelinkError> {
        Ok(Self::new(address.parse()?, name, password))
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn reverse_address(&self) -> [u8; 6] {
        self.reverse_address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_address(&mut self, address: MacAddress) {
        self.address = address;
        self.reverse_address = address.reversed();
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = password.into();
    }

    /// Name truncated or zero-padded to 16 bytes
    pub fn padded_name(&self) -> [u8; KEY_SIZE] {
        pad(self.name.as_bytes())
    }

    /// Password truncated or zero-padded to 16 bytes
    pub fn padded_password(&self) -> [u8; KEY_SIZE] {
        pad(self.password.as_bytes())
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("address", &self.address.to_string())
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn pad(input: &[u8]) -> [u8; KEY_SIZE] {
    let mut out = [0u8; KEY_SIZE];
    let len = input.len().min(KEY_SIZE);
    out[..len].copy_from_slice(&input[..len]);
    out
}
