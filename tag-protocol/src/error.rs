// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

/// Everything that can stop a scan cycle or an issuing operation.
///
/// Only [`Error::HardwareInitFailure`] is fatal; all the others end the
/// current cycle and are reported with the matching
/// [`CycleOutcome`](crate::CycleOutcome).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Length or field boundaries of the tag content are inconsistent.
    MalformedRecord,
    /// The record signature or MAC does not verify.
    SignatureInvalid,
    /// The payload failed its AEAD integrity check.
    DecryptFailed,
    /// A ciphertext point is not on the curve.
    InvalidCiphertext,
    /// The tag is addressed to another reader, or this reader already
    /// processed it.
    IdentityMismatch,
    /// The reader could not read the tag.
    ReadError,
    /// The reader could not write the tag, or the read-back differs.
    WriteError,
    /// The reader hardware did not come up.
    HardwareInitFailure,
    /// The encoded content does not fit on the tag.
    CapacityExceeded,
    /// Provisioned key material could not be parsed.
    InvalidKey,
    /// An issuing path is empty or names an unknown reader.
    InvalidPath,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MalformedRecord => write!(f, "malformed tag record"),
            Self::SignatureInvalid => write!(f, "invalid tag signature"),
            Self::DecryptFailed => write!(f, "tag payload failed to decrypt"),
            Self::InvalidCiphertext => write!(f, "tag ciphertext is not on the curve"),
            Self::IdentityMismatch => write!(f, "tag is not addressed to this reader"),
            Self::ReadError => write!(f, "failed to read tag"),
            Self::WriteError => write!(f, "failed to write tag"),
            Self::HardwareInitFailure => write!(f, "reader hardware failed to initialize"),
            Self::CapacityExceeded => write!(f, "content exceeds tag capacity"),
            Self::InvalidKey => write!(f, "invalid key material"),
            Self::InvalidPath => write!(f, "invalid reader path"),
        }
    }
}
