// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Record authentication.
//!
//! StepAuth records carry an ECDSA P-256 signature of the issuer over
//! `reader_id || next_reader_id || payload`. Baseline records carry an
//! HMAC-SHA256 over the same bytes, keyed with a key derived from the shared
//! key, so that readers can re-authenticate the record after updating it.

use {
    crate::{cipher::SharedKey, Error},
    consts::{ECDSA_SIGNATURE_SIZE, HMAC_SIZE},
    hmac::{Hmac, Mac},
    p256::ecdsa::{signature::Verifier, Signature, VerifyingKey},
    sha2::Sha256,
};

/// Verification result.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum VerificationResult {
    // The values are arbitrary, but chosen to be different by more than one bit to make glitching
    // attacks more difficult.
    Valid = 0xcafebabe,
    Invalid = 0xdeadbeef,
}

impl VerificationResult {
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }
}

/// Label for deriving the Baseline MAC key from the shared key.
const MAC_KEY_LABEL: &[u8] = b"baseline record mac";

/// Issuer public key as provisioned on a StepAuth reader.
#[derive(Debug, Clone)]
pub struct IssuerKey(VerifyingKey);

impl IssuerKey {
    /// Parse a SEC1 encoded (compressed or uncompressed) P-256 public key.
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, Error> {
        VerifyingKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| Error::InvalidKey)
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.0
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> VerificationResult {
        verify(&self.0, message, signature)
    }
}

impl From<VerifyingKey> for IssuerKey {
    fn from(key: VerifyingKey) -> Self {
        Self(key)
    }
}

/// Verify a raw `r || s` ECDSA P-256 signature over `message` (hashed with
/// SHA-256).
///
/// The check runs to completion for any message and well-formed signature;
/// there is no early exit tied to how much of the signature matches.
pub fn verify(public_key: &VerifyingKey, message: &[u8], signature: &[u8]) -> VerificationResult {
    const CF1: u32 = 13;
    const CF2: u32 = 7;
    let mut control_flow_integrity_counter = 0;

    if signature.len() != ECDSA_SIGNATURE_SIZE {
        return VerificationResult::Invalid;
    }
    let Ok(signature) = Signature::from_slice(signature) else {
        return VerificationResult::Invalid;
    };
    control_flow_integrity_counter += CF1;

    if public_key.verify(message, &signature).is_ok() {
        control_flow_integrity_counter += CF2;
        if core::hint::black_box(control_flow_integrity_counter) == CF1 + CF2 {
            return VerificationResult::Valid;
        }
    }
    VerificationResult::Invalid
}

/// Compute the Baseline record MAC.
pub fn mac(key: &SharedKey, message: &[u8]) -> [u8; HMAC_SIZE] {
    let mut mac = mac_instance(key);
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Verify a Baseline record MAC in constant time.
pub fn verify_mac(key: &SharedKey, message: &[u8], tag: &[u8]) -> VerificationResult {
    let mut mac = mac_instance(key);
    mac.update(message);
    match mac.verify_slice(tag) {
        Ok(()) => VerificationResult::Valid,
        Err(_) => VerificationResult::Invalid,
    }
}

fn mac_instance(key: &SharedKey) -> Hmac<Sha256> {
    let mac_key = key.derive(MAC_KEY_LABEL);
    <Hmac<Sha256> as Mac>::new_from_slice(mac_key.as_bytes()).expect("any key length")
}
