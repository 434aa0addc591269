//! Key derivation for the Telink pairing handshake
//!
//! All Telink cryptography is AES-128-ECB on single 16-byte blocks, with the
//! twist that key, input and output are byte-reversed around the cipher call
//! (the firmware works little-endian).
//!
//! # Handshake
//!
//! 1. Host picks an 8-byte `nonce_a` and proves it knows the mesh password by
//!    encrypting the combined name/password under `nonce_a ‖ 0×8`.
//! 2. Host writes `0x0C ‖ nonce_a ‖ proof[0..8]` to the pairing characteristic.
//! 3. Device answers `0x0D ‖ nonce_b ‖ …` on the same characteristic.
//! 4. Both sides derive the session key as
//!    `AES(combined_identity, nonce_a ‖ nonce_b)`.

use crate::constants::{KEY_SIZE, NONCE_SIZE, PAIR_ACCEPTED, PAIR_REQUEST};
use crate::error::TelinkError;
use crate::identity::DeviceIdentity;
use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit};
use std::fmt;
use zeroize::Zeroize;

/// Size of the pairing request written to the pairing characteristic
pub const PAIR_REQUEST_SIZE: usize = 1 + NONCE_SIZE + NONCE_SIZE;

/// 16-byte shared key established by a successful pairing.
///
/// Wiped from memory when dropped; `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; KEY_SIZE]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Accepts any slice but only a 16-byte one succeeds
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TelinkError> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| TelinkError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// AES-128-ECB on one block with key, input and output byte-reversed
pub fn aes_reversed(key: &[u8; KEY_SIZE], block: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let mut key = *key;
    key.reverse();
    let cipher = Aes128::new((&key).into());
    key.zeroize();

    let mut output = *block;
    output.reverse();
    cipher.encrypt_block((&mut output).into());
    output.reverse();
    output
}

/// XOR of the 16-byte padded name and password.
///
/// Fixed length whatever the inputs: both are truncated or zero-padded first.
pub fn combine_identity(identity: &DeviceIdentity) -> [u8; KEY_SIZE] {
    let name = identity.padded_name();
    let password = identity.padded_password();
    let mut combined = [0u8; KEY_SIZE];
    for (out, (n, p)) in combined.iter_mut().zip(name.iter().zip(password.iter())) {
        *out = n ^ p;
    }
    combined
}

/// Shared key from the two handshake nonces and the combined identity
pub fn derive_shared_key(
    identity: &DeviceIdentity,
    nonce_a: &[u8; NONCE_SIZE],
    nonce_b: &[u8; NONCE_SIZE],
) -> SessionKey {
    let mut combined = combine_identity(identity);
    let mut nonces = [0u8; KEY_SIZE];
    nonces[..NONCE_SIZE].copy_from_slice(nonce_a);
    nonces[NONCE_SIZE..].copy_from_slice(nonce_b);
    let key = SessionKey(aes_reversed(&combined, &nonces));
    combined.zeroize();
    key
}

/// Encrypt the combined name/password under `key` to prove we know the password
pub fn encrypt_identity(identity: &DeviceIdentity, key: &[u8]) -> Result<[u8; KEY_SIZE], TelinkError> {
    let key: [u8; KEY_SIZE] = key.try_into().map_err(|_| TelinkError::InvalidKeyLength {
        expected: KEY_SIZE,
        actual: key.len(),
    })?;
    let mut combined = combine_identity(identity);
    let proof = aes_reversed(&key, &combined);
    combined.zeroize();
    Ok(proof)
}

/// Fresh random nonce for the host side of the handshake
pub fn random_nonce() -> [u8; NONCE_SIZE] {
    rand::random()
}

/// Build the 17-byte pairing request for `nonce_a`
pub fn build_pair_request(
    identity: &DeviceIdentity,
    nonce_a: &[u8; NONCE_SIZE],
) -> Result<[u8; PAIR_REQUEST_SIZE], TelinkError> {
    // Provisional key: the nonce followed by zeroes
    let mut provisional = [0u8; KEY_SIZE];
    provisional[..NONCE_SIZE].copy_from_slice(nonce_a);
    let proof = encrypt_identity(identity, &provisional)?;

    let mut request = [0u8; PAIR_REQUEST_SIZE];
    request[0] = PAIR_REQUEST;
    request[1..1 + NONCE_SIZE].copy_from_slice(nonce_a);
    request[1 + NONCE_SIZE..].copy_from_slice(&proof[..NONCE_SIZE]);
    Ok(request)
}

/// Extract `nonce_b` from the device's pairing response
pub fn parse_pair_response(response: &[u8]) -> Result<[u8; NONCE_SIZE], TelinkError> {
    let opcode = *response.first().ok_or(TelinkError::InvalidPairingResponse(0))?;
    if opcode != PAIR_ACCEPTED {
        return Err(TelinkError::PairingRejected(opcode));
    }
    response
        .get(1..1 + NONCE_SIZE)
        .and_then(|nonce| nonce.try_into().ok())
        .ok_or(TelinkError::InvalidPairingResponse(response.len()))
}
