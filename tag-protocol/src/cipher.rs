// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! AES-256-GCM payload encryption.
//!
//! A payload is stored as `nonce || ciphertext || tag`. The nonce is always
//! chosen by the caller so that a run can be replayed exactly; the engine
//! never draws randomness itself.

use {
    crate::Error,
    aes_gcm::{
        aead::{generic_array::GenericArray, AeadInPlace, KeyInit},
        Aes256Gcm,
    },
    consts::{AEAD_TAG_SIZE, MAX_RECORD_SIZE, NONCE_SIZE, SHARED_KEY_SIZE},
    heapless::Vec,
    hmac::{Hmac, Mac},
    sha2::Sha256,
};

/// Plaintext or payload buffer, bounded by what fits on a tag.
pub type Buffer = Vec<u8, MAX_RECORD_SIZE>;

/// Symmetric key shared between the issuer and one reader (StepAuth) or all
/// readers (Baseline).
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey([u8; SHARED_KEY_SIZE]);

impl SharedKey {
    pub const fn new(bytes: [u8; SHARED_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let bytes = bytes.try_into().map_err(|_| Error::InvalidKey)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SHARED_KEY_SIZE] {
        &self.0
    }

    /// Derive a key for a different purpose, so the AES key is never reused
    /// as a MAC key.
    pub fn derive(&self, label: &[u8]) -> Self {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.0).expect("any key length");
        mac.update(label);
        Self(mac.finalize().into_bytes().into())
    }
}

impl core::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

impl Drop for SharedKey {
    fn drop(&mut self) {
        self.0.fill(0);
    }
}

/// Smallest possible payload: a nonce and a tag around an empty message.
pub const MIN_PAYLOAD_SIZE: usize = NONCE_SIZE + AEAD_TAG_SIZE;

/// Decrypt and authenticate a payload. `aad` is authenticated but not
/// encrypted.
///
/// Nothing of the plaintext is returned when the integrity check fails.
pub fn decrypt(key: &SharedKey, aad: &[u8], payload: &[u8]) -> Result<Buffer, Error> {
    if payload.len() < MIN_PAYLOAD_SIZE {
        return Err(Error::MalformedRecord);
    }
    let (nonce, rest) = payload.split_at(NONCE_SIZE);
    let (ciphertext, tag) = rest.split_at(rest.len() - AEAD_TAG_SIZE);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| Error::InvalidKey)?;
    let mut buffer = Buffer::from_slice(ciphertext).map_err(|_| Error::CapacityExceeded)?;
    match cipher.decrypt_in_place_detached(
        GenericArray::from_slice(nonce),
        aad,
        &mut buffer,
        GenericArray::from_slice(tag),
    ) {
        Ok(()) => Ok(buffer),
        Err(_) => {
            buffer.fill(0);
            Err(Error::DecryptFailed)
        }
    }
}

/// Encrypt a plaintext under the caller-supplied nonce.
pub fn encrypt(
    key: &SharedKey,
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Buffer, Error> {
    if plaintext.len() + MIN_PAYLOAD_SIZE > MAX_RECORD_SIZE {
        return Err(Error::CapacityExceeded);
    }
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| Error::InvalidKey)?;

    let mut payload = Buffer::new();
    payload
        .extend_from_slice(nonce)
        .map_err(|_| Error::CapacityExceeded)?;
    payload
        .extend_from_slice(plaintext)
        .map_err(|_| Error::CapacityExceeded)?;
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, &mut payload[NONCE_SIZE..])
        .map_err(|_| Error::CapacityExceeded)?;
    payload
        .extend_from_slice(&tag)
        .map_err(|_| Error::CapacityExceeded)?;
    Ok(payload)
}
